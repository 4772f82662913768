use burn::{data::dataloader::batcher::Batcher, prelude::*};

use super::patch::PatchItem;

#[derive(Clone)]
pub struct PatchBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> PatchBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

#[derive(Clone, Debug)]
pub struct PatchBatch<B: Backend> {
    /// `[batch, channels, rows, cols]`
    pub inputs: Tensor<B, 4>,
    /// `[batch, 1, rows, cols]` class indices.
    pub labels: Tensor<B, 4, Int>,
    /// `[batch, 1, rows, cols]`, false outside the field of view.
    pub masks: Tensor<B, 4, Bool>,
    /// `[row_from, row_to, col_from, col_to]` of every item in its image.
    pub clips: Vec<[usize; 4]>,
    /// `[batch]` best-F1 thresholds (`0..=255`) when every item carries one.
    pub thresholds: Option<Tensor<B, 1>>,
}

impl<B: Backend> Batcher<PatchItem, PatchBatch<B>> for PatchBatcher<B> {
    fn batch(&self, items: Vec<PatchItem>) -> PatchBatch<B> {
        let batch_size = items.len();

        let mut inputs = Vec::with_capacity(batch_size);
        let mut labels = Vec::with_capacity(batch_size);
        let mut masks = Vec::with_capacity(batch_size);
        let mut clips = Vec::with_capacity(batch_size);
        let mut thresholds = Vec::with_capacity(batch_size);

        for item in items {
            let [rows, cols] = item.label_shape;

            inputs.push(Tensor::<B, 3>::from_data(
                TensorData::new(item.input, Shape::new(item.input_shape))
                    .convert::<B::FloatElem>(),
                &self.device,
            ));
            labels.push(Tensor::<B, 3, Int>::from_data(
                TensorData::new(item.label, Shape::new([1, rows, cols])).convert::<B::IntElem>(),
                &self.device,
            ));

            let mask: Vec<i64> = item.mask.iter().map(|&valid| i64::from(valid)).collect();
            masks.push(
                Tensor::<B, 3, Int>::from_data(
                    TensorData::new(mask, Shape::new([1, rows, cols])).convert::<B::IntElem>(),
                    &self.device,
                )
                .bool(),
            );

            clips.push(item.clip);
            thresholds.extend(item.threshold.map(f32::from));
        }

        let thresholds = (thresholds.len() == batch_size).then(|| {
            Tensor::from_data(
                TensorData::new(thresholds, [batch_size]).convert::<B::FloatElem>(),
                &self.device,
            )
        });

        PatchBatch {
            inputs: Tensor::stack::<4>(inputs, 0),
            labels: Tensor::stack::<4>(labels, 0),
            masks: Tensor::stack::<4>(masks, 0),
            clips,
            thresholds,
        }
    }
}
