//! Online hard example mining (OHEM) cross-entropy loss.
//!
//! Instead of averaging over every pixel, only the "hard" pixels contribute:
//! those whose softmax probability for the true class falls below a
//! confidence threshold. The threshold is the maximum of a configured floor
//! and the probability found at rank `min_kept` of the ascending per-pixel
//! confidences, so at least `min_kept` pixels stay in play even when the
//! fixed floor alone would select fewer.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    nn::loss::Reduction,
    tensor::{
        activation::{log_softmax, softmax},
        backend::Backend,
        Bool, ElementConversion, Int, Tensor,
    },
};

use crate::{
    error::{SegLossError, SegLossResult},
    resample::{flatten_labels, flatten_logits, scale_target},
};

/// Configuration for creating an [OHEM cross-entropy loss](OhemCrossEntropyLoss).
#[derive(Config, Debug)]
pub struct OhemCrossEntropyLossConfig {
    /// Confidence floor: pixels with a true-class probability below the
    /// effective threshold are treated as hard.
    pub thresh: f64,

    /// Minimum number of pixels whose confidence is considered when raising
    /// the threshold above the floor. Clamped to at least 1.
    pub min_kept: usize,

    /// Per-class rescaling weights, one entry per class.
    pub weights: Option<Vec<f32>>,

    /// Target value excluded from the loss. Default: -100
    #[config(default = "-100")]
    pub ignore_index: i64,
}

impl OhemCrossEntropyLossConfig {
    /// Initialize [OHEM cross-entropy loss](OhemCrossEntropyLoss).
    pub fn init<B: Backend>(&self, device: &B::Device) -> OhemCrossEntropyLoss<B> {
        self.assertions();
        OhemCrossEntropyLoss {
            thresh: self.thresh,
            min_kept: self.min_kept.max(1),
            weights: self
                .weights
                .as_ref()
                .map(|weights| Tensor::<B, 1>::from_floats(weights.as_slice(), device)),
            ignore_index: self.ignore_index,
        }
    }

    fn assertions(&self) {
        assert!(
            (0.0..=1.0).contains(&self.thresh),
            "Threshold for OhemCrossEntropyLoss must be a probability in [0, 1], got {}",
            self.thresh
        );
        if let Some(weights) = self.weights.as_ref() {
            assert!(
                weights.iter().all(|weight| *weight > 0.0),
                "Class weights for OhemCrossEntropyLoss must be positive, got {weights:?}"
            );
        }
    }
}

/// Cross-entropy loss restricted to hard (low-confidence) pixels.
///
/// Ignored pixels never count as hard. When no pixel is selected the loss is
/// zero for every reduction; otherwise only `Mean` and `Sum` are supported
/// and any other reduction fails with
/// [`SegLossError::UnsupportedReduction`].
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct OhemCrossEntropyLoss<B: Backend> {
    /// Confidence floor for the hard-pixel threshold.
    pub thresh: f64,
    /// Minimum number of pixels kept by the adaptive threshold.
    pub min_kept: usize,
    /// Per-class rescaling weights.
    pub weights: Option<Tensor<B, 1>>,
    /// Target value excluded from the loss.
    pub ignore_index: i64,
}

impl<B: Backend> ModuleDisplay for OhemCrossEntropyLoss<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("thresh", &self.thresh)
            .add("min_kept", &self.min_kept)
            .add("weights", &self.weights)
            .add("ignore_index", &self.ignore_index)
            .optional()
    }
}

impl<B: Backend> OhemCrossEntropyLoss<B> {
    /// Compute the criterion on the input tensor with reduction.
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
    ) -> SegLossResult<Tensor<B, 1>> {
        let [_, _, height, width] = predictions.dims();
        let device = predictions.device();
        let targets = scale_target(targets, [height, width]);

        let logits = flatten_logits(predictions);
        let labels = flatten_labels(targets);
        let total = labels.dims()[0];

        let valid = labels.clone().not_equal_elem(self.ignore_index);
        // Ignored pixels are gathered at class 0 to stay in range; the valid
        // mask drops them from both threshold search and selection.
        let safe_labels = labels.mask_fill(valid.clone().bool_not(), 0);
        let indices = safe_labels.clone().reshape([total, 1]);

        let probs = softmax(logits.clone(), 1)
            .gather(1, indices.clone())
            .reshape([total]);

        let threshold = self.effective_threshold(probs.clone(), valid.clone());

        let log_probs = log_softmax(logits, 1).gather(1, indices).reshape([total]);
        let pixel_weights = match &self.weights {
            Some(weights) => weights.clone().gather(0, safe_labels),
            None => Tensor::ones([total], &device),
        };
        let losses = log_probs.neg() * pixel_weights;

        let hard = valid.int().mul(probs.lower_elem(threshold).int()).bool();
        let hard_count = hard.clone().int().sum().into_scalar().elem::<i64>();
        if hard_count == 0 {
            // Nothing selected: defined zero contribution, any reduction.
            return Ok(Tensor::zeros([1], &device));
        }

        let selected = losses.mask_fill(hard.bool_not(), 0.0);
        match reduction {
            Reduction::Sum => Ok(selected.sum()),
            Reduction::Mean => Ok(selected.sum().div_scalar(hard_count as f32)),
            Reduction::Auto => Err(SegLossError::UnsupportedReduction {
                reduction: "Auto".to_owned(),
            }),
        }
    }

    /// The confidence cutoff: the valid-pixel probability at rank `min_kept`
    /// (clamped to the last valid rank), floored by the configured threshold.
    fn effective_threshold(&self, probs: Tensor<B, 1>, valid: Tensor<B, 1, Bool>) -> f32 {
        let valid_count = valid.clone().int().sum().into_scalar().elem::<i64>() as usize;
        if valid_count == 0 {
            return self.thresh as f32;
        }

        // Invalid pixels sort last, above any reachable probability.
        let sorted = probs.mask_fill(valid.bool_not(), 2.0).sort(0);
        let rank = self.min_kept.min(valid_count - 1);
        let candidate = sorted.slice([rank..rank + 1]).into_scalar().elem::<f32>();

        candidate.max(self.thresh as f32)
    }
}
