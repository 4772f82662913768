pub mod config;
pub mod error;
pub mod imaging;
pub mod measurements;
pub mod model;
pub mod patches;

#[cfg(feature = "dataset")]
pub mod dataset;

#[cfg(feature = "training")]
pub mod runner;
#[cfg(feature = "training")]
pub mod training;

pub use config::{LossKind, Mode, RunConfig};
pub use error::{Error, Result};
pub use model::{BabyUNet, ModelKind, SegmentationModel, UNet, UNetConfig, UUNet};

#[cfg(feature = "dataset")]
pub use dataset::{PatchBatch, PatchDataset, Splits};

pub use measurements::ScoreAccumulator;

#[cfg(feature = "training")]
pub use training::{Trainer, TrainerConfig};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
