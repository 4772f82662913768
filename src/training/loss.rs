use std::marker::PhantomData;

use burn::{
    nn::loss::{MseLoss, Reduction},
    prelude::*,
};
use rand::Rng;

/// Foreground channel of `[N, C, h, w]` log-probabilities as probabilities,
/// `[N, 1, h, w]`.
pub fn foreground_probability<B: Backend>(log_probs: Tensor<B, 4>) -> Tensor<B, 4> {
    log_probs.narrow(1, 1, 1).exp()
}

/// A dice `beta` from `1.0, 1.1, ..., 1.9`.
pub fn random_beta<R: Rng>(rng: &mut R) -> f32 {
    rng.gen_range(10..20) as f32 / 10.0
}

#[derive(Config, Debug)]
pub struct DiceLossConfig {
    #[config(default = 1.0)]
    pub smooth: f32,
}

impl DiceLossConfig {
    pub fn init<B: Backend>(&self) -> DiceLoss<B> {
        assert!(
            self.smooth >= 0.,
            "Smoothing factor must be non-negative. Got {}",
            self.smooth
        );
        DiceLoss {
            smooth: self.smooth,
            _b: PhantomData,
        }
    }
}

/// Soft F-beta dice loss on a foreground probability map.
///
/// `1 - ((1 + b^2) * sum(p * t) + s) / (b^2 * sum(p) + sum(t) + s)` over the
/// pixels inside the mask. `beta > 1` weighs recall above precision.
#[derive(Module, Debug)]
pub struct DiceLoss<B: Backend> {
    pub smooth: f32,
    _b: PhantomData<B>,
}

impl<B: Backend> DiceLoss<B> {
    /// # Shapes
    ///
    /// - probability: `[batch_size, 1, height, width]`
    /// - targets: `[batch_size, 1, height, width]` (0 or 1)
    /// - mask: `[batch_size, 1, height, width]`
    pub fn forward(
        &self,
        probability: Tensor<B, 4>,
        targets: Tensor<B, 4, Int>,
        mask: Tensor<B, 4, Bool>,
        beta: f32,
    ) -> Tensor<B, 1> {
        assert_eq!(
            probability.dims(),
            targets.dims(),
            "Probability and target shapes differ"
        );

        let mask = mask.float();
        let probability = probability * mask.clone();
        let targets = targets.float() * mask;

        let beta2 = beta * beta;
        let intersection = (probability.clone() * targets.clone()).sum();
        let numerator = intersection * (1.0 + beta2) + self.smooth;
        let denominator = probability.sum() * beta2 + targets.sum() + self.smooth;

        (numerator / denominator).neg() + 1.0
    }
}

/// Mean squared error between the foreground probability and the label.
pub fn mse_loss<B: Backend>(log_probs: Tensor<B, 4>, targets: Tensor<B, 4, Int>) -> Tensor<B, 1> {
    MseLoss::new().forward(
        foreground_probability(log_probs),
        targets.float(),
        Reduction::Mean,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::activation::log_softmax;
    use rand::{SeedableRng, rngs::StdRng};

    type TestBackend = NdArray;

    fn targets(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4, Int> {
        Tensor::<TestBackend, 1, Int>::from_ints([1, 0, 1, 0], device).reshape([1, 1, 2, 2])
    }

    #[test]
    fn perfect_prediction_has_no_dice_loss() {
        let device = Default::default();
        let targets = targets(&device);
        let probability = targets.clone().float();
        let mask = targets.clone().ones_like().bool();

        let loss = DiceLossConfig::new()
            .with_smooth(0.0)
            .init::<TestBackend>()
            .forward(probability, targets, mask, 1.5);

        assert!(loss.into_scalar().elem::<f32>().abs() < 1e-6);
    }

    #[test]
    fn dice_ignores_masked_pixels() {
        let device = Default::default();
        let targets = targets(&device);
        // wrong on pixel 1 only, which is masked out
        let probability = Tensor::<TestBackend, 1>::from_floats([1.0, 1.0, 1.0, 0.0], &device)
            .reshape([1, 1, 2, 2]);
        let mask = Tensor::<TestBackend, 1, Int>::from_ints([1, 0, 1, 1], &device)
            .reshape([1, 1, 2, 2])
            .bool();

        let loss = DiceLossConfig::new()
            .with_smooth(0.0)
            .init::<TestBackend>()
            .forward(probability, targets, mask, 1.0);

        assert!(loss.into_scalar().elem::<f32>().abs() < 1e-6);
    }

    #[test]
    fn dice_of_half_overlap() {
        let device = Default::default();
        let targets = targets(&device);
        let probability = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let mask = targets.clone().ones_like().bool();

        let loss = DiceLossConfig::new()
            .with_smooth(0.0)
            .init::<TestBackend>()
            .forward(probability, targets, mask, 1.0);

        // 2 * 2 / (4 + 2)
        let expected = 1.0 - 4.0 / 6.0;
        assert!((loss.into_scalar().elem::<f32>() - expected).abs() < 1e-5);
    }

    #[test]
    fn mse_on_foreground_probability() {
        let device = Default::default();
        let targets = targets(&device);
        let scores = Tensor::<TestBackend, 4>::zeros([1, 2, 2, 2], &device);

        let loss = mse_loss(log_softmax(scores, 1), targets);

        assert!((loss.into_scalar().elem::<f32>() - 0.25).abs() < 1e-5);
    }

    #[test]
    fn random_beta_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..100 {
            let beta = random_beta(&mut rng);
            assert!((1.0..2.0).contains(&beta));
            assert!(((beta * 10.0).round() - beta * 10.0).abs() < 1e-5);
        }
    }
}
