//! Focal loss for dense classification.
//!
//! Down-weights well-classified pixels so training concentrates on the hard
//! ones:
//! ```text
//! loss(p) = -alpha * (1 - P_t)^gamma * log(P_t)
//! ```
//! where `P_t` is the softmax probability of the true class. At `gamma = 0`
//! this degenerates to plain cross-entropy scaled by `alpha`.
//!
//! Unlike the cross-entropy losses, targets are not resampled here; the
//! caller must match the prediction resolution.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{
        activation::{log_softmax, softmax},
        backend::Backend,
        Int, Tensor,
    },
};

use crate::resample::{flatten_labels, flatten_logits};

/// Balancing factor applied to every pixel, fixed as in the original
/// formulation.
const ALPHA: f64 = 0.25;

/// Configuration for creating a [focal loss](FocalLoss).
#[derive(Config, Debug)]
pub struct FocalLossConfig {
    /// Focusing exponent. Default: 2.0
    #[config(default = 2.0)]
    pub gamma: f64,
}

impl FocalLossConfig {
    /// Initialize [focal loss](FocalLoss).
    pub fn init(&self) -> FocalLoss {
        self.assertions();
        FocalLoss { gamma: self.gamma }
    }

    fn assertions(&self) {
        assert!(
            self.gamma >= 0.0,
            "Focusing exponent for FocalLoss must be non-negative, got {}",
            self.gamma
        );
    }
}

/// Focal loss with a configurable focusing exponent.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct FocalLoss {
    /// Focusing exponent.
    pub gamma: f64,
}

impl Default for FocalLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for FocalLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("gamma", &self.gamma).optional()
    }
}

impl FocalLoss {
    /// Create a new focal loss with default configuration.
    pub fn new() -> Self {
        FocalLossConfig::new().init()
    }

    /// Compute the criterion on the input tensor, reduced by mean.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, num_classes, height, width]`
    /// - targets: `[batch_size, height, width]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> Tensor<B, 1> {
        self.forward_no_reduction(predictions, targets).mean()
    }

    /// Compute the per-pixel loss map without reduction.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, num_classes, height, width]`
    /// - targets: `[batch_size, height, width]`
    /// - output: `[batch_size, height, width]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> Tensor<B, 3> {
        let [batch_size, _, height, width] = predictions.dims();
        let logits = flatten_logits(predictions);
        let labels = flatten_labels(targets);
        let total = labels.dims()[0];
        let indices = labels.reshape([total, 1]);

        let probs = softmax(logits.clone(), 1)
            .gather(1, indices.clone())
            .reshape([total]);
        let nll = log_softmax(logits, 1)
            .gather(1, indices)
            .reshape([total])
            .neg();

        let focus = (probs.clone().ones_like() - probs).powf_scalar(self.gamma);
        (focus * nll)
            .mul_scalar(ALPHA)
            .reshape([batch_size, height, width])
    }
}

#[cfg(test)]
mod tests {
    use burn::{nn::loss::Reduction, tensor::{TensorData, Tolerance}};

    use super::*;
    use crate::{tests::TestBackend, CrossEntropyLoss};

    fn fixture(
        device: &<TestBackend as Backend>::Device,
    ) -> (Tensor<TestBackend, 4>, Tensor<TestBackend, 3, Int>) {
        let predictions = Tensor::from_data(
            TensorData::from([[[[1.0, 0.0]], [[0.0, 2.0]]]]),
            device,
        );
        let targets = Tensor::from_data(TensorData::from([[[0, 1]]]), device);
        (predictions, targets)
    }

    #[test]
    fn focal_loss_gamma_zero_equals_scaled_cross_entropy() {
        let device = Default::default();
        let loss = FocalLossConfig::new().with_gamma(0.0).init();

        let (predictions, targets) = fixture(&device);
        let focal = loss.forward(predictions.clone(), targets.clone());

        let ce = CrossEntropyLoss::<TestBackend>::new(&device).forward(
            predictions,
            targets,
            Reduction::Mean,
        );
        let expected = ce.mul_scalar(0.25);

        focal
            .into_data()
            .assert_approx_eq::<f32>(&expected.into_data(), Tolerance::default());
    }

    #[test]
    fn focal_loss_matches_hand_computed_values() {
        let device = Default::default();
        let loss = FocalLoss::new();

        let (predictions, targets) = fixture(&device);
        let result = loss.forward(predictions, targets);

        // Pixel 0: P_t = sigmoid(1), pixel 1: P_t = sigmoid(2).
        let p0 = 1.0 / (1.0 + (-1.0_f64).exp());
        let p1 = 1.0 / (1.0 + (-2.0_f64).exp());
        let term = |p: f64| 0.25 * (1.0 - p).powi(2) * -p.ln();
        let expected = (term(p0) + term(p1)) / 2.0;

        result.into_data().assert_approx_eq::<f32>(
            &TensorData::from([expected as f32]),
            Tolerance::default(),
        );
    }

    #[test]
    fn focal_loss_down_weights_confident_pixels() {
        let device = Default::default();
        let loss = FocalLoss::new();

        // Same target, one confident prediction and one uncertain one.
        let confident = Tensor::<TestBackend, 4>::from_data(
            TensorData::from([[[[6.0]], [[0.0]]]]),
            &device,
        );
        let uncertain = Tensor::<TestBackend, 4>::from_data(
            TensorData::from([[[[0.2]], [[0.0]]]]),
            &device,
        );
        let targets =
            Tensor::<TestBackend, 3, Int>::from_data(TensorData::from([[[0]]]), &device);

        let confident_loss = loss
            .forward(confident, targets.clone())
            .into_data()
            .iter::<f32>()
            .next()
            .expect("scalar loss");
        let uncertain_loss = loss
            .forward(uncertain, targets)
            .into_data()
            .iter::<f32>()
            .next()
            .expect("scalar loss");

        assert!(confident_loss < uncertain_loss);
    }

    #[test]
    fn focal_loss_forward_no_reduction_keeps_spatial_shape() {
        let device = Default::default();
        let loss = FocalLoss::new();

        let (predictions, targets) = fixture(&device);
        let losses = loss.forward_no_reduction(predictions, targets);

        assert_eq!(losses.dims(), [1, 1, 2]);
    }

    #[test]
    #[should_panic = "Focusing exponent for FocalLoss must be non-negative"]
    fn focal_loss_config_negative_gamma_panics() {
        let _loss = FocalLossConfig::new().with_gamma(-1.0).init();
    }

    #[test]
    fn focal_loss_display_shows_gamma() {
        let loss = FocalLossConfig::new().with_gamma(3.0).init();
        assert_eq!(format!("{loss}"), "FocalLoss {gamma: 3}");
    }
}
