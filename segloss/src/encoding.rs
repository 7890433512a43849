//! Auxiliary class-presence (encoding) loss.
//!
//! A multi-label binary classification head predicts, for every grid cell of
//! the label map, which classes occur inside the cell. The loss is binary
//! cross-entropy between the sigmoid of those predictions and multi-hot
//! presence vectors built from the ground-truth map.
//!
//! Targets may be given directly as presence vectors, or derived from a dense
//! label map via [`EncodingLoss::presence_targets`].

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    nn::loss::Reduction,
    tensor::{activation::sigmoid, backend::Backend, Int, Tensor},
};

use crate::resample::scale_target;

/// Configuration for creating an [encoding loss](EncodingLoss).
#[derive(Config, Debug)]
pub struct EncodingLossConfig {
    /// Number of classes in the presence vectors.
    pub num_classes: usize,

    /// Side length of the square grid cells the label map is partitioned
    /// into.
    pub grid_size: usize,

    /// Per-class rescaling weights for the binary cross-entropy.
    pub weights: Option<Vec<f32>>,
}

impl EncodingLossConfig {
    /// Initialize [encoding loss](EncodingLoss).
    pub fn init<B: Backend>(&self, device: &B::Device) -> EncodingLoss<B> {
        self.assertions();
        EncodingLoss {
            num_classes: self.num_classes,
            grid_size: self.grid_size,
            weights: self
                .weights
                .as_ref()
                .map(|weights| Tensor::<B, 1>::from_floats(weights.as_slice(), device)),
        }
    }

    fn assertions(&self) {
        assert!(
            self.num_classes > 0,
            "Number of classes for EncodingLoss must be positive"
        );
        assert!(
            self.grid_size > 0,
            "Grid size for EncodingLoss must be positive"
        );
        if let Some(weights) = self.weights.as_ref() {
            assert_eq!(
                weights.len(),
                self.num_classes,
                "EncodingLoss expects one weight per class, got {} weights for {} classes",
                weights.len(),
                self.num_classes
            );
            assert!(
                weights.iter().all(|weight| *weight > 0.0),
                "Class weights for EncodingLoss must be positive, got {weights:?}"
            );
        }
    }
}

/// Multi-label class-presence loss over grid cells.
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct EncodingLoss<B: Backend> {
    /// Number of classes in the presence vectors.
    pub num_classes: usize,
    /// Side length of the square grid cells.
    pub grid_size: usize,
    /// Per-class rescaling weights.
    pub weights: Option<Tensor<B, 1>>,
}

impl<B: Backend> ModuleDisplay for EncodingLoss<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("num_classes", &self.num_classes)
            .add("grid_size", &self.grid_size)
            .add("weights", &self.weights)
            .optional()
    }
}

impl<B: Backend> EncodingLoss<B> {
    /// Compute the criterion against ready-made presence vectors.
    ///
    /// # Shapes
    ///
    /// - predictions: `[num_cells, num_classes]` (logits)
    /// - presence: `[num_cells, num_classes]` (multi-hot, values in {0, 1})
    /// - output: `[1]`
    pub fn forward(
        &self,
        predictions: Tensor<B, 2>,
        presence: Tensor<B, 2>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let losses = self.bce(sigmoid(predictions), presence);
        match reduction {
            Reduction::Mean | Reduction::Auto => losses.mean(),
            Reduction::Sum => losses.sum(),
        }
    }

    /// Compute the criterion against a dense label map.
    ///
    /// The map is downsampled to `resolution` and converted to per-cell
    /// presence vectors first; predictions must provide one row per cell.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size * num_cells, num_classes]` (logits)
    /// - targets: `[batch_size, target_height, target_width]`
    /// - output: `[1]`
    pub fn forward_label_map(
        &self,
        predictions: Tensor<B, 2>,
        targets: Tensor<B, 3, Int>,
        resolution: [usize; 2],
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let presence = self.presence_targets(targets, resolution);
        self.forward(predictions, presence, reduction)
    }

    /// Build multi-hot presence vectors from a dense label map.
    ///
    /// The map is downsampled to `resolution`, padded on the bottom/right
    /// with the out-of-class sentinel (`num_classes`) until both dimensions
    /// divide by the grid size, and split into non-overlapping cells in
    /// row-major order. Bit `c` of a cell's vector is set iff class `c`
    /// occurs at least once in the cell; the sentinel never sets a bit.
    ///
    /// # Shapes
    ///
    /// - targets: `[batch_size, target_height, target_width]`
    /// - output: `[batch_size * num_cells, num_classes]`
    pub fn presence_targets(
        &self,
        targets: Tensor<B, 3, Int>,
        resolution: [usize; 2],
    ) -> Tensor<B, 2> {
        let device = targets.device();
        let targets = scale_target(targets, resolution);
        let [batch_size, height, width] = targets.dims();

        let grid = self.grid_size;
        let padded_h = height.div_ceil(grid) * grid;
        let padded_w = width.div_ceil(grid) * grid;

        let padded = if padded_h != height || padded_w != width {
            Tensor::<B, 3, Int>::full(
                [batch_size, padded_h, padded_w],
                self.num_classes as i64,
                &device,
            )
            .slice_assign([0..batch_size, 0..height, 0..width], targets)
        } else {
            targets
        };

        let cells_h = padded_h / grid;
        let cells_w = padded_w / grid;
        let cells = padded
            .reshape([batch_size, cells_h, grid, cells_w, grid])
            .permute([0, 1, 3, 2, 4])
            .reshape([batch_size * cells_h * cells_w, grid * grid]);

        // Histogram over 0..num_classes per cell; presence is count > 0.
        let mut bins = Vec::with_capacity(self.num_classes);
        for class in 0..self.num_classes {
            bins.push(cells.clone().equal_elem(class as i64).int().sum_dim(1));
        }
        Tensor::cat(bins, 1).greater_elem(0).float()
    }

    /// Binary cross-entropy with optional per-class weights, no reduction.
    /// Log terms are clamped at -100 for numerical stability.
    fn bce(&self, probs: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 2> {
        let log_probs = probs.clone().log().clamp_min(-100.0);
        let log_complement = (probs.clone().ones_like() - probs).log().clamp_min(-100.0);

        let losses = (targets.clone() * log_probs
            + (targets.clone().ones_like() - targets) * log_complement)
            .neg();

        match &self.weights {
            Some(weights) => {
                let [_, num_classes] = losses.dims();
                losses * weights.clone().reshape([1, num_classes])
            }
            None => losses,
        }
    }
}
