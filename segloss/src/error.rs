use thiserror::Error;

/// The error type for segmentation loss evaluation.
#[derive(Error, Debug)]
pub enum SegLossError {
    /// Error for when a loss is asked for a reduction mode it does not
    /// implement. OHEM cross-entropy only supports `Mean` and `Sum`.
    #[error("Unsupported reduction for OHEM cross-entropy: {reduction}")]
    UnsupportedReduction {
        /// The rejected reduction mode.
        reduction: String,
    },
}

/// A specialized `Result` type for segmentation loss operations.
pub type SegLossResult<T> = Result<T, SegLossError>;
