//! Weighted cross-entropy loss over logit maps.
//!
//! Targets are resampled to the prediction resolution with nearest-neighbor
//! interpolation before comparison, and pixels carrying the ignore label are
//! excluded from both the loss and the mean normalizer.
//!
//! The per-pixel loss is computed as:
//! ```text
//! loss(p) = -weight[t_p] * log_softmax(pred_p)[t_p]
//! ```

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    nn::loss::Reduction,
    tensor::{activation::log_softmax, backend::Backend, Bool, Int, Tensor},
};

use crate::resample::{flatten_labels, flatten_logits, scale_target};

/// Configuration for creating a [cross-entropy loss](CrossEntropyLoss).
#[derive(Config, Debug)]
pub struct CrossEntropyLossConfig {
    /// Per-class rescaling weights, one entry per class.
    ///
    /// The loss of a pixel is multiplied by the weight of its target class.
    pub weights: Option<Vec<f32>>,

    /// Target value excluded from the loss. Default: -100
    #[config(default = "-100")]
    pub ignore_index: i64,
}

impl CrossEntropyLossConfig {
    /// Initialize [cross-entropy loss](CrossEntropyLoss).
    pub fn init<B: Backend>(&self, device: &B::Device) -> CrossEntropyLoss<B> {
        self.assertions();
        CrossEntropyLoss {
            weights: self
                .weights
                .as_ref()
                .map(|weights| Tensor::<B, 1>::from_floats(weights.as_slice(), device)),
            ignore_index: self.ignore_index,
        }
    }

    fn assertions(&self) {
        if let Some(weights) = self.weights.as_ref() {
            assert!(
                weights.iter().all(|weight| *weight > 0.0),
                "Class weights for CrossEntropyLoss must be positive, got {weights:?}"
            );
        }
    }
}

/// Cross-entropy loss for dense semantic segmentation.
///
/// Supports per-class weights and an ignore index. Label maps that do not
/// match the prediction resolution are downsampled with nearest-neighbor
/// interpolation first.
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct CrossEntropyLoss<B: Backend> {
    /// Per-class rescaling weights.
    pub weights: Option<Tensor<B, 1>>,
    /// Target value excluded from the loss.
    pub ignore_index: i64,
}

impl<B: Backend> ModuleDisplay for CrossEntropyLoss<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("weights", &self.weights)
            .add("ignore_index", &self.ignore_index)
            .optional()
    }
}

impl<B: Backend> CrossEntropyLoss<B> {
    /// Create a new cross-entropy loss with default configuration.
    pub fn new(device: &B::Device) -> Self {
        CrossEntropyLossConfig::new().init(device)
    }

    /// Compute the criterion on the input tensor with reduction.
    ///
    /// `Mean` (and `Auto`) normalize by the summed weights of the non-ignored
    /// pixels; an all-ignored batch yields exactly zero instead of NaN.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, num_classes, height, width]`
    /// - targets: `[batch_size, target_height, target_width]`
    /// - output: `[1]`
    pub fn forward(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let (losses, pixel_weights, valid) = self.per_pixel(predictions, targets);
        match reduction {
            Reduction::Sum => losses.sum(),
            Reduction::Mean | Reduction::Auto => {
                let empty_guard = valid.float().sum().equal_elem(0.0).float();
                losses.sum() / (pixel_weights.sum() + empty_guard)
            }
        }
    }

    /// Compute the per-pixel loss map without reduction.
    ///
    /// Ignored pixels hold zero.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, num_classes, height, width]`
    /// - targets: `[batch_size, target_height, target_width]`
    /// - output: `[batch_size, height, width]`
    pub fn forward_no_reduction(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> Tensor<B, 3> {
        let [batch_size, _, height, width] = predictions.dims();
        let (losses, _, _) = self.per_pixel(predictions, targets);
        losses.reshape([batch_size, height, width])
    }

    /// Per-pixel weighted losses, per-pixel weights, and the valid mask, each
    /// flattened to one entry per prediction pixel. Ignored pixels carry zero
    /// loss and zero weight.
    fn per_pixel(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> (Tensor<B, 1>, Tensor<B, 1>, Tensor<B, 1, Bool>) {
        let [_, _, height, width] = predictions.dims();
        let device = predictions.device();
        let targets = scale_target(targets, [height, width]);

        let logits = flatten_logits(predictions);
        let labels = flatten_labels(targets);
        let total = labels.dims()[0];

        let valid = labels.clone().not_equal_elem(self.ignore_index);
        // Ignored pixels are gathered at class 0 to stay in range, then
        // zeroed through their weight.
        let safe_labels = labels.mask_fill(valid.clone().bool_not(), 0);

        let log_probs = log_softmax(logits, 1)
            .gather(1, safe_labels.clone().reshape([total, 1]))
            .reshape([total]);

        let pixel_weights = match &self.weights {
            Some(weights) => weights.clone().gather(0, safe_labels),
            None => Tensor::ones([total], &device),
        }
        .mask_fill(valid.clone().bool_not(), 0.0);

        let losses = log_probs.neg() * pixel_weights.clone();
        (losses, pixel_weights, valid)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::tests::TestBackend;

    // Two classes, one 1x2 image: pixel 0 has logits (1, 0) with target 0,
    // pixel 1 has logits (0, 2) with target 1.
    fn fixture(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        Tensor::from_data(TensorData::from([[[[1.0, 0.0]], [[0.0, 2.0]]]]), device)
    }

    const LOSS_PIXEL_0: f64 = 0.313_261_687_518_222_8; // ln(1 + e^-1)
    const LOSS_PIXEL_1: f64 = 0.126_928_011_042_972_6; // ln(1 + e^-2)

    #[test]
    fn ce_loss_forward_matches_hand_computed_values() {
        let device = Default::default();
        let loss = CrossEntropyLoss::<TestBackend>::new(&device);

        let predictions = fixture(&device);
        let targets =
            Tensor::<TestBackend, 3, Int>::from_data(TensorData::from([[[0, 1]]]), &device);

        let mean = loss.forward(predictions.clone(), targets.clone(), Reduction::Mean);
        let sum = loss.forward(predictions, targets, Reduction::Sum);

        let expected_mean = TensorData::from([((LOSS_PIXEL_0 + LOSS_PIXEL_1) / 2.0) as f32]);
        let expected_sum = TensorData::from([(LOSS_PIXEL_0 + LOSS_PIXEL_1) as f32]);
        mean.into_data()
            .assert_approx_eq::<f32>(&expected_mean, Tolerance::default());
        sum.into_data()
            .assert_approx_eq::<f32>(&expected_sum, Tolerance::default());
    }

    #[test]
    fn ce_loss_weighted_mean_normalizes_by_weight_sum() {
        let device = Default::default();
        let loss = CrossEntropyLossConfig::new()
            .with_weights(Some(vec![0.5, 2.0]))
            .init::<TestBackend>(&device);

        let predictions = fixture(&device);
        let targets =
            Tensor::<TestBackend, 3, Int>::from_data(TensorData::from([[[0, 1]]]), &device);

        let mean = loss.forward(predictions, targets, Reduction::Mean);

        let expected = (0.5 * LOSS_PIXEL_0 + 2.0 * LOSS_PIXEL_1) / (0.5 + 2.0);
        mean.into_data()
            .assert_approx_eq::<f32>(&TensorData::from([expected as f32]), Tolerance::default());
    }

    #[test]
    fn ce_loss_ignored_pixels_do_not_contribute() {
        let device = Default::default();
        let loss = CrossEntropyLoss::<TestBackend>::new(&device);

        let predictions = fixture(&device);
        let targets =
            Tensor::<TestBackend, 3, Int>::from_data(TensorData::from([[[0, -100]]]), &device);

        let mean = loss.forward(predictions.clone(), targets.clone(), Reduction::Mean);
        let sum = loss.forward(predictions, targets, Reduction::Sum);

        let expected = TensorData::from([LOSS_PIXEL_0 as f32]);
        mean.into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
        sum.into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn ce_loss_all_ignored_targets_yield_zero() {
        let device = Default::default();
        let loss = CrossEntropyLoss::<TestBackend>::new(&device);

        let predictions = fixture(&device);
        let targets =
            Tensor::<TestBackend, 3, Int>::from_data(TensorData::from([[[-100, -100]]]), &device);

        let sum = loss.forward(predictions.clone(), targets.clone(), Reduction::Sum);
        let mean = loss.forward(predictions, targets, Reduction::Mean);

        let expected = TensorData::from([0.0_f32]);
        sum.into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
        mean.into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn ce_loss_downsamples_targets_to_prediction_resolution() {
        let device = Default::default();
        let loss = CrossEntropyLoss::<TestBackend>::new(&device);

        let predictions = fixture(&device);
        // Target map at twice the prediction resolution, constant per block.
        let targets = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::from([[[0, 0, 1, 1], [0, 0, 1, 1]]]),
            &device,
        );

        let mean = loss.forward(predictions, targets, Reduction::Mean);

        let expected = TensorData::from([((LOSS_PIXEL_0 + LOSS_PIXEL_1) / 2.0) as f32]);
        mean.into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn ce_loss_forward_no_reduction_zeroes_ignored_pixels() {
        let device = Default::default();
        let loss = CrossEntropyLoss::<TestBackend>::new(&device);

        let predictions = fixture(&device);
        let targets =
            Tensor::<TestBackend, 3, Int>::from_data(TensorData::from([[[0, -100]]]), &device);

        let losses = loss.forward_no_reduction(predictions, targets);

        assert_eq!(losses.dims(), [1, 1, 2]);
        losses.into_data().assert_approx_eq::<f32>(
            &TensorData::from([[[LOSS_PIXEL_0 as f32, 0.0]]]),
            Tolerance::default(),
        );
    }

    #[test]
    #[should_panic = "Class weights for CrossEntropyLoss must be positive"]
    fn ce_loss_config_non_positive_weight_panics() {
        let device = Default::default();
        let _loss = CrossEntropyLossConfig::new()
            .with_weights(Some(vec![1.0, -0.5]))
            .init::<TestBackend>(&device);
    }

    #[test]
    fn ce_loss_display_shows_ignore_index() {
        let device = Default::default();
        let loss = CrossEntropyLossConfig::new()
            .with_ignore_index(255)
            .init::<TestBackend>(&device);

        let display = format!("{loss}");
        assert!(display.contains("CrossEntropyLoss"));
        assert!(display.contains("ignore_index: 255"));
    }
}
