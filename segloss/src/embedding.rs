//! Discriminative pixel-embedding loss.
//!
//! Works on a per-pixel embedding tensor instead of class logits. For every
//! class present in the batch a center is computed as the mean embedding of
//! its pixels, then two cosine-embedding terms are accumulated:
//!
//! - **pull**: every pixel should resemble its own class center
//!   (similarity target +1);
//! - **push**: each center is compared against all class slots, with target
//!   +1 only at its own slot and -1 everywhere else (zero margin).
//!
//! Total loss = Σ pull + Σ push, which rewards intra-class compactness and
//! inter-class separation. The push term is a dense pairwise comparison, so
//! a forward call costs O(num_classes²).

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Bool, ElementConversion, Int, Tensor},
};

use crate::resample::flatten_labels;

/// Norm-product floor of the cosine similarity, matching PyTorch's
/// cosine-embedding loss.
const EPS: f64 = 1e-8;

/// Configuration for creating an [embedding loss](EmbeddingLoss).
#[derive(Config, Debug)]
pub struct EmbeddingLossConfig {
    /// Number of semantic classes, including the background class 0.
    pub num_classes: usize,
}

impl EmbeddingLossConfig {
    /// Initialize [embedding loss](EmbeddingLoss).
    pub fn init(&self) -> EmbeddingLoss {
        self.assertions();
        EmbeddingLoss {
            num_classes: self.num_classes,
        }
    }

    fn assertions(&self) {
        assert!(
            self.num_classes > 0,
            "Number of classes for EmbeddingLoss must be positive"
        );
    }
}

/// Cosine pull/push loss over per-pixel embeddings and class centers.
///
/// Classes without any pixel in the batch contribute neither a center nor a
/// pull/push term; their center slot stays zero, and the clamped cosine
/// against a zero vector vanishes from the push comparison as well.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct EmbeddingLoss {
    /// Number of semantic classes.
    pub num_classes: usize,
}

impl ModuleDisplay for EmbeddingLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("num_classes", &self.num_classes).optional()
    }
}

impl EmbeddingLoss {
    /// Compute the criterion on the input tensor.
    ///
    /// Targets must already match the embedding resolution.
    ///
    /// # Shapes
    ///
    /// - embeddings: `[batch_size, embed_dim, height, width]`
    /// - targets: `[batch_size, height, width]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        embeddings: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> Tensor<B, 1> {
        let [batch_size, embed_dim, height, width] = embeddings.dims();
        let device = embeddings.device();
        let total = batch_size * height * width;

        let pixels = embeddings
            .permute([0, 2, 3, 1])
            .reshape([total, embed_dim]);
        let labels = flatten_labels(targets);

        let mut pull_loss = Tensor::zeros([1], &device);
        let mut centers = Vec::with_capacity(self.num_classes);
        let mut populated = vec![false; self.num_classes];

        for class in 0..self.num_classes {
            let mask = class_mask(labels.clone(), class);
            let count = mask.clone().int().sum().into_scalar().elem::<i64>();
            if count == 0 {
                centers.push(Tensor::zeros([embed_dim], &device));
                continue;
            }
            populated[class] = true;

            let mask_column = mask.clone().float().reshape([total, 1]);
            let center = (pixels.clone() * mask_column)
                .sum_dim(0)
                .reshape([embed_dim])
                .div_scalar(count as f32);

            // Pull the class's pixels toward their center.
            let cos = cosine_similarity(
                pixels.clone(),
                center.clone().reshape([1, embed_dim]),
            );
            let distances = (cos.clone().ones_like() - cos).mask_fill(mask.bool_not(), 0.0);
            pull_loss = pull_loss + distances.sum().div_scalar(count as f32);

            centers.push(center);
        }

        let centers: Tensor<B, 2> = Tensor::stack(centers, 0);

        let mut push_loss = Tensor::zeros([1], &device);
        for class in 0..self.num_classes {
            if !populated[class] {
                continue;
            }

            let center = centers.clone().slice([class..class + 1, 0..embed_dim]);
            let cos = cosine_similarity(centers.clone(), center);

            // Similarity target is +1 at the class's own slot, -1 elsewhere.
            let own_slot = Tensor::<B, 1, Int>::arange(0..self.num_classes as i64, &device)
                .equal_elem(class as i64);
            let terms = cos
                .clone()
                .clamp_min(0.0)
                .mask_where(own_slot, cos.clone().ones_like() - cos);
            push_loss = push_loss + terms.mean();
        }

        pull_loss + push_loss
    }
}

/// Binary pixel mask for a class.
///
/// Class 0 is the complement of "belongs to some nonzero class" rather than
/// a literal equality test; the original formulation treats the background
/// that way and the asymmetry is kept.
fn class_mask<B: Backend>(labels: Tensor<B, 1, Int>, class: usize) -> Tensor<B, 1, Bool> {
    if class == 0 {
        labels.not_equal_elem(0).bool_not()
    } else {
        labels.equal_elem(class as i64)
    }
}

/// Row-wise cosine similarity between `lhs` rows and `rhs` (a single row or
/// one row per `lhs` row), with the norm product clamped away from zero.
fn cosine_similarity<B: Backend>(lhs: Tensor<B, 2>, rhs: Tensor<B, 2>) -> Tensor<B, 1> {
    let rows = lhs.dims()[0];
    let dot = (lhs.clone() * rhs.clone()).sum_dim(1);
    let lhs_norm = lhs.powf_scalar(2.0).sum_dim(1).sqrt();
    let rhs_norm = rhs.powf_scalar(2.0).sum_dim(1).sqrt();
    (dot / (lhs_norm * rhs_norm).clamp_min(EPS)).reshape([rows])
}
