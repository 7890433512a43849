//! Label map resampling and flattening shared by the pixel-wise losses.

use burn::tensor::{
    backend::Backend,
    module::interpolate,
    ops::{InterpolateMode, InterpolateOptions},
    Int, Tensor,
};

/// Resample an integer label map to a new spatial size with nearest-neighbor
/// interpolation.
///
/// Nearest-neighbor copies values instead of blending them, so every output
/// pixel holds a class index that exists in the input map and sentinel values
/// such as the ignore label survive the resample exactly.
///
/// # Shapes
///
/// - targets: `[batch_size, height, width]`
/// - output: `[batch_size, size[0], size[1]]`
pub fn scale_target<B: Backend>(targets: Tensor<B, 3, Int>, size: [usize; 2]) -> Tensor<B, 3, Int> {
    let resized = interpolate(
        targets.float().unsqueeze_dim::<4>(1),
        size,
        InterpolateOptions::new(InterpolateMode::Nearest),
    );
    resized.squeeze::<3>(1).int()
}

/// Flatten `[batch_size, num_classes, height, width]` logits into one row per
/// pixel: `[batch_size * height * width, num_classes]`.
pub(crate) fn flatten_logits<B: Backend>(logits: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch_size, num_classes, height, width] = logits.dims();
    logits
        .reshape([batch_size, num_classes, height * width])
        .permute([0, 2, 1])
        .reshape([batch_size * height * width, num_classes])
}

/// Flatten a `[batch_size, height, width]` label map into one entry per pixel.
pub(crate) fn flatten_labels<B: Backend>(labels: Tensor<B, 3, Int>) -> Tensor<B, 1, Int> {
    let [batch_size, height, width] = labels.dims();
    labels.reshape([batch_size * height * width])
}
