mod batcher;
mod folder;
mod patch;
mod splits;

use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::prelude::*;

pub use batcher::{PatchBatch, PatchBatcher};
pub use folder::{FolderSource, FolderTriplet, SUPPORTED_FILES, check_extension, list_images};
pub use patch::{
    PatchDataset, PatchIndex, PatchItem, Sampling, load_image_object, per_image_datasets,
};
pub use splits::{Splits, split_files};

/// Shuffled loader over training patches.
pub fn train_loader<B: Backend>(
    dataset: PatchDataset,
    batch_size: usize,
    num_workers: usize,
    seed: u64,
    device: B::Device,
) -> Arc<dyn DataLoader<PatchBatch<B>>> {
    DataLoaderBuilder::new(PatchBatcher::<B>::new(device))
        .batch_size(batch_size)
        .num_workers(num_workers)
        .shuffle(seed)
        .build(dataset)
}

/// Ordered loader over the patches of a single image; batches never exceed
/// the number of patches.
pub fn image_loader<B: Backend>(
    dataset: PatchDataset,
    batch_size: usize,
    device: B::Device,
) -> Arc<dyn DataLoader<PatchBatch<B>>> {
    let batch_size = batch_size.min(dataset.len()).max(1);

    DataLoaderBuilder::new(PatchBatcher::<B>::new(device))
        .batch_size(batch_size)
        .build(dataset)
}

/// Number of batches a loader yields for `items` items.
pub fn num_batches(items: usize, batch_size: usize) -> usize {
    items.div_ceil(batch_size.max(1))
}
