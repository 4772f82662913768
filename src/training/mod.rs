mod checkpoint;
mod logger;
mod loss;
mod segmentation_cross_entropy;
mod trainer;

pub use checkpoint::{Checkpoint, CheckpointState};
pub use logger::{
    CsvLogger, RunLoggers, TEST_HEADER, TRAIN_HEADER, TRAIN_MSE_HEADER, VALIDATION_HEADER,
    train_header,
};
pub use loss::{DiceLoss, DiceLossConfig, foreground_probability, mse_loss, random_beta};
pub use crate::measurements::{ScoreAccumulator, best_f1_threshold};
pub use segmentation_cross_entropy::{
    SegmentationCrossEntropyLoss, SegmentationCrossEntropyLossConfig,
};
pub use trainer::{Trainer, TrainerConfig};
