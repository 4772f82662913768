//! Pixel-wise cross entropy over `[N, C, h, w]` predictions with a validity
//! mask, following the layout of `burn::nn::loss::CrossEntropyLoss`.

use burn::{
    module::{Content, DisplaySettings, ModuleDisplay},
    prelude::*,
    tensor::activation::log_softmax,
};

#[derive(Config, Debug)]
pub struct SegmentationCrossEntropyLossConfig {
    /// Label smoothing factor `a` in `[0, 1]`: the target class gets
    /// `1 - a + a / C`, every other class `a / C`.
    pub smoothing: Option<f32>,
    /// Per-class weights, indexed by label. A pixel contributes with the
    /// weight of its target class.
    pub weights: Option<Vec<f32>>,
    /// Inputs are unnormalised scores (or log-probabilities, which
    /// `log_softmax` leaves unchanged). With `false` they are probabilities.
    #[config(default = true)]
    pub logits: bool,
    /// Pixels labelled with this class do not contribute.
    pub ignore_index: Option<usize>,
}

impl SegmentationCrossEntropyLossConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SegmentationCrossEntropyLoss<B> {
        if let Some(alpha) = self.smoothing {
            assert!(
                (0.0..=1.).contains(&alpha),
                "Label smoothing must be in [0, 1]. Got {}",
                alpha
            );
        }
        if let Some(weights) = &self.weights {
            assert!(
                weights.iter().all(|w| *w > 0.),
                "Cross entropy class weights must be positive. Got {:?}",
                weights
            );
        }

        SegmentationCrossEntropyLoss {
            weights: self
                .weights
                .as_ref()
                .map(|w| Tensor::<B, 1>::from_floats(w.as_slice(), device)),
            smoothing: self.smoothing,
            logits: self.logits,
            ignore_index: self.ignore_index,
        }
    }
}

/// Cross entropy averaged over the valid pixels, or over their summed class
/// weights when weights are set.
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct SegmentationCrossEntropyLoss<B: Backend> {
    pub weights: Option<Tensor<B, 1>>,
    pub smoothing: Option<f32>,
    pub logits: bool,
    pub ignore_index: Option<usize>,
}

impl<B: Backend> ModuleDisplay for SegmentationCrossEntropyLoss<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("weights", &self.weights)
            .add("smoothing", &self.smoothing)
            .add("logits", &self.logits)
            .add("ignore_index", &self.ignore_index)
            .optional()
    }
}

impl<B: Backend> SegmentationCrossEntropyLoss<B> {
    /// # Shapes
    ///
    /// - predictions: `[batch_size, num_classes, height, width]`
    /// - targets: `[batch_size, 1, height, width]` class indices
    /// - mask: `[batch_size, 1, height, width]`, true for valid pixels
    pub fn forward(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4, Int>,
        mask: Tensor<B, 4, Bool>,
    ) -> Tensor<B, 1> {
        Self::assertions(&predictions, &targets, &mask);

        let [batch_size, num_classes, height, width] = predictions.dims();
        let pixels = batch_size * height * width;

        let log_probs = if self.logits {
            log_softmax(predictions, 1)
        } else {
            predictions.log()
        };
        let log_probs = log_probs
            .permute([0, 2, 3, 1])
            .reshape([pixels, num_classes]);
        let targets = targets.reshape([pixels]);

        let mut valid = mask.reshape([pixels]).float();
        if let Some(ignore) = self.ignore_index {
            valid = valid * targets.clone().not_equal_elem(ignore as i32).float();
        }
        let targets = targets.clamp(0, num_classes as i32 - 1);

        let per_pixel = (log_probs * self.target_distribution(targets.clone(), num_classes))
            .sum_dim(1)
            .reshape([pixels])
            .neg();
        let pixel_weights = match &self.weights {
            Some(weights) => weights.clone().gather(0, targets) * valid,
            None => valid,
        };

        (per_pixel * pixel_weights.clone()).sum() / pixel_weights.sum().clamp_min(f32::EPSILON)
    }

    /// One-hot rows for `targets`, smoothed when configured.
    fn target_distribution(&self, targets: Tensor<B, 1, Int>, num_classes: usize) -> Tensor<B, 2> {
        let [pixels] = targets.dims();
        let device = &targets.device();

        let one_hot = Tensor::<B, 2>::zeros([pixels, num_classes], device).scatter(
            1,
            targets.reshape([pixels, 1]),
            Tensor::ones([pixels, 1], device),
        );

        match self.smoothing {
            Some(alpha) => one_hot * (1. - alpha) + alpha / num_classes as f32,
            None => one_hot,
        }
    }

    fn assertions(
        predictions: &Tensor<B, 4>,
        targets: &Tensor<B, 4, Int>,
        mask: &Tensor<B, 4, Bool>,
    ) {
        let [batch, _, height, width] = predictions.dims();

        for (name, dims) in [("targets", targets.dims()), ("mask", mask.dims())] {
            assert_eq!(
                dims,
                [batch, 1, height, width],
                "Shape mismatch: {name} {dims:?} vs predictions [{batch}, 1, {height}, {width}]"
            );
        }
    }
}
