//! Confusion counts and the scores derived from them.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Running true/false positive/negative counts over binary predictions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreAccumulator {
    pub tp: u64,
    pub fp: u64,
    pub tn: u64,
    pub fn_: u64,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) -> &mut Self {
        *self = Self::default();
        self
    }

    fn add_pair(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.tp += 1,
            (true, false) => self.fp += 1,
            (false, false) => self.tn += 1,
            (false, true) => self.fn_ += 1,
        }
    }

    /// Counts two planes pixel by pixel; any nonzero value is positive.
    pub fn add_array(&mut self, predicted: &[u8], truth: &[u8]) -> &mut Self {
        assert_eq!(predicted.len(), truth.len(), "Prediction and truth sizes differ");
        for (&p, &t) in predicted.iter().zip(truth) {
            self.add_pair(p != 0, t != 0);
        }
        self
    }

    /// Like [add_array](Self::add_array) but skips pixels where `mask` is zero.
    pub fn add_masked(&mut self, predicted: &[u8], truth: &[u8], mask: &[u8]) -> &mut Self {
        assert_eq!(predicted.len(), truth.len(), "Prediction and truth sizes differ");
        assert_eq!(predicted.len(), mask.len(), "Prediction and mask sizes differ");
        for ((&p, &t), _) in predicted
            .iter()
            .zip(truth)
            .zip(mask)
            .filter(|(_, m)| **m != 0)
        {
            self.add_pair(p != 0, t != 0);
        }
        self
    }

    /// Counts class labels, where class `1` is the positive class.
    pub fn add_labels(&mut self, predicted: &[i64], truth: &[i64]) -> &mut Self {
        assert_eq!(predicted.len(), truth.len(), "Prediction and truth sizes differ");
        for (&p, &t) in predicted.iter().zip(truth) {
            self.add_pair(p == 1, t == 1);
        }
        self
    }

    /// Counts label tensors of any rank and matching shape.
    pub fn add_tensor<B: Backend, const D: usize>(
        &mut self,
        predicted: Tensor<B, D, Int>,
        truth: Tensor<B, D, Int>,
    ) -> &mut Self {
        let predicted = tensor_labels(predicted);
        let truth = tensor_labels(truth);
        self.add_labels(&predicted, &truth)
    }

    pub fn accumulate(&mut self, other: &ScoreAccumulator) -> &mut Self {
        self.tp += other.tp;
        self.fp += other.fp;
        self.tn += other.tn;
        self.fn_ += other.fn_;
        self
    }

    /// `[precision, recall, f1, accuracy]`, each 0 when undefined.
    pub fn prfa(&self) -> [f64; 4] {
        let ratio = |num: u64, den: u64| {
            if den == 0 { 0.0 } else { num as f64 / den as f64 }
        };

        let precision = ratio(self.tp, self.tp + self.fp);
        let recall = ratio(self.tp, self.tp + self.fn_);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        let accuracy = ratio(self.tp + self.tn, self.tp + self.fp + self.tn + self.fn_);

        [precision, recall, f1, accuracy]
    }
}

fn tensor_labels<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Vec<i64> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .unwrap_or_default()
}

/// Thresholds a probability plane (`0..=255`) at every level and returns the
/// best F1 with the lowest threshold reaching it. A pixel is positive when its
/// probability is at least the threshold.
pub fn best_f1_threshold(probability: &[u8], truth: &[u8]) -> (f64, u8) {
    assert_eq!(probability.len(), truth.len(), "Probability and truth sizes differ");

    let mut positives = [0u64; 256];
    let mut negatives = [0u64; 256];
    for (&p, &t) in probability.iter().zip(truth) {
        if t != 0 {
            positives[p as usize] += 1;
        } else {
            negatives[p as usize] += 1;
        }
    }
    let total_positive: u64 = positives.iter().sum();

    let mut best = (0.0, 0u8);
    let (mut tp, mut fp) = (0u64, 0u64);
    // Walk thresholds from the top so counts above each level accumulate.
    let mut scores = [0.0f64; 256];
    for threshold in (0..=255usize).rev() {
        tp += positives[threshold];
        fp += negatives[threshold];
        let score = ScoreAccumulator {
            tp,
            fp,
            tn: 0,
            fn_: total_positive - tp,
        };
        scores[threshold] = score.prfa()[2];
    }
    for (threshold, &f1) in scores.iter().enumerate() {
        if f1 > best.0 {
            best = (f1, threshold as u8);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn prfa_from_counts() {
        let mut score = ScoreAccumulator::new();
        score.add_array(&[255, 255, 0, 0, 255], &[255, 0, 0, 255, 255]);

        let [p, r, f1, a] = score.prfa();

        assert_eq!((score.tp, score.fp, score.tn, score.fn_), (2, 1, 1, 1));
        assert!((p - 2.0 / 3.0).abs() < 1e-9);
        assert!((r - 2.0 / 3.0).abs() < 1e-9);
        assert!((f1 - 2.0 / 3.0).abs() < 1e-9);
        assert!((a - 0.6).abs() < 1e-9);
    }

    #[test]
    fn empty_scores_are_zero() {
        assert_eq!(ScoreAccumulator::new().prfa(), [0.0; 4]);

        let mut negatives = ScoreAccumulator::new();
        negatives.add_array(&[0, 0], &[0, 0]);
        assert_eq!(negatives.prfa(), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn masked_pixels_are_ignored() {
        let mut score = ScoreAccumulator::new();
        score.add_masked(&[255, 255, 0], &[0, 255, 255], &[0, 255, 255]);

        assert_eq!((score.tp, score.fp, score.tn, score.fn_), (1, 0, 0, 1));
    }

    #[test]
    fn tensors_and_accumulation() {
        let device = Default::default();
        let predicted = Tensor::<NdArray, 2, Int>::from_ints([[1, 0], [1, 1]], &device);
        let truth = Tensor::<NdArray, 2, Int>::from_ints([[1, 1], [0, 1]], &device);

        let mut batch = ScoreAccumulator::new();
        batch.add_tensor(predicted, truth);
        let mut total = ScoreAccumulator::new();
        total.accumulate(&batch).accumulate(&batch);

        assert_eq!((batch.tp, batch.fp, batch.tn, batch.fn_), (2, 1, 0, 1));
        assert_eq!(total.tp, 4);
        assert_eq!(batch.reset().tp, 0);
    }

    #[test]
    fn best_threshold_separates_classes() {
        let probability = [10, 40, 120, 200, 230];
        let truth = [0, 0, 255, 255, 255];

        let (f1, threshold) = best_f1_threshold(&probability, &truth);

        assert!((f1 - 1.0).abs() < 1e-9);
        assert_eq!(threshold, 41);
    }
}
