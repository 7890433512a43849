//! Loss functions for semantic segmentation training.
//!
//! This crate provides the pixel-wise and auxiliary losses used to train
//! semantic segmentation models with the Burn deep learning framework. Every
//! loss is a pure function of `(predictions, targets, configuration)` with no
//! cross-call state, so instances can be shared freely across batches.
//!
//! ## Pixel-wise losses
//! - **[`CrossEntropyLoss`]**: weighted cross-entropy with an ignore index,
//!   after nearest-neighbor label downsampling
//! - **[`OhemCrossEntropyLoss`]**: online hard example mining — cross-entropy
//!   restricted to low-confidence pixels
//! - **[`FocalLoss`]**: cross-entropy down-weighting well-classified pixels
//!
//! ## Auxiliary losses
//! - **[`EncodingLoss`]**: multi-label class-presence classification over
//!   grid cells
//! - **[`EmbeddingLoss`]**: discriminative pixel-embedding loss pulling pixels
//!   toward their class center and pushing class centers apart
//!
//! Label maps may be coarser or finer than the logits; [`scale_target`]
//! resamples them with nearest-neighbor interpolation so integer class
//! indices survive exactly.
//!
//! Each loss follows Burn's configuration pattern: a `Config` struct with
//! explicit defaults, validated once in `init`, producing a `Module` that is
//! backend-agnostic over `B: Backend`.

mod cross_entropy;
mod embedding;
mod encoding;
mod error;
mod focal;
mod ohem;
mod resample;

pub use cross_entropy::{CrossEntropyLoss, CrossEntropyLossConfig};
pub use embedding::{EmbeddingLoss, EmbeddingLossConfig};
pub use encoding::{EncodingLoss, EncodingLossConfig};
pub use error::{SegLossError, SegLossResult};
pub use focal::{FocalLoss, FocalLossConfig};
pub use ohem::{OhemCrossEntropyLoss, OhemCrossEntropyLossConfig};
pub use resample::scale_target;
