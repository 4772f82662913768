use std::path::{Path, PathBuf};

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{self, Error};
use crate::model::ModelKind;

/// What a run (or a dataset built for it) is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Train,
    Validation,
    Test,
}

/// Loss optimised by the per-epoch runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LossKind {
    /// Class-weighted negative log-likelihood over log-probabilities.
    CrossEntropy,
    /// Soft dice on the foreground probability. `beta: None` draws beta
    /// from `1.0, 1.1, ..., 1.9` for every batch.
    Dice { beta: Option<f32> },
    /// Squared error between the foreground probability and the label.
    Mse,
}

/// Maps an image file name to a companion file (mask, ground truth).
///
/// Placeholders: `{file}` is the full file name, `{stem}` the name without
/// extension and `{prefix}` the stem up to its first underscore. With the
/// DRIVE layout, `21_training.tif` maps through `{prefix}_manual1.gif` to
/// `21_manual1.gif` and through `{stem}_mask.gif` to `21_training_mask.gif`.
#[derive(Config, Debug)]
pub struct FileNameRule {
    pub template: String,
}

impl FileNameRule {
    pub fn apply(&self, file_name: &str) -> String {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        let prefix = stem.split('_').next().unwrap_or(&stem).to_string();

        self.template
            .replace("{file}", file_name)
            .replace("{stem}", &stem)
            .replace("{prefix}", &prefix)
    }
}

#[derive(Config, Debug)]
pub struct DirsConfig {
    pub image: PathBuf,
    pub logs: PathBuf,
    #[config(default = "None")]
    pub mask: Option<PathBuf>,
    #[config(default = "None")]
    pub truth: Option<PathBuf>,
    /// Directory holding one JSON split file per experiment.
    #[config(default = "None")]
    pub splits_json: Option<PathBuf>,
}

#[derive(Config, Debug)]
pub struct ParamsConfig {
    #[config(default = "Mode::Train")]
    pub mode: Mode,
    #[config(default = 100)]
    pub epochs: usize,
    #[config(default = 4)]
    pub batch_size: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// Batches between two progress lines.
    #[config(default = 10)]
    pub log_frequency: usize,
    /// Epochs between two validations.
    #[config(default = 1)]
    pub validation_frequency: usize,
    /// Validations without improvement before training stops.
    #[config(default = 35)]
    pub patience: usize,
    #[config(default = "LossKind::Dice { beta: None }")]
    pub loss: LossKind,
    /// Per-class loss weights, all ones when unset.
    #[config(default = "None")]
    pub class_weights: Option<Vec<f32>>,
    /// Derive class weights from the training ground truth.
    #[config(default = false)]
    pub balance_classes: bool,
    #[config(default = false)]
    pub use_gpu: bool,
    #[config(default = false)]
    pub overwrite_logs: bool,
    #[config(default = 1)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
}

#[derive(Config, Debug)]
pub struct PatchConfig {
    /// Size of the labelled window, `[rows, cols]`.
    #[config(default = "[64, 64]")]
    pub patch_shape: [usize; 2],
    /// Mirrored context added around the labelled window on each side.
    #[config(default = "[0, 0]")]
    pub expand_by: [usize; 2],
    /// Step between evaluation windows, the patch shape when unset.
    #[config(default = "None")]
    pub offset: Option<[usize; 2]>,
    /// Working-array intensity at or above which a pixel seeds a training window.
    #[config(default = 50)]
    pub est_threshold: u8,
    /// Only every n-th seed pixel produces a window.
    #[config(default = 15)]
    pub est_stride: usize,
    #[config(default = true)]
    pub erode_mask: bool,
    #[config(default = false)]
    pub apply_clahe: bool,
    #[config(default = 2.0)]
    pub clahe_clip_limit: f32,
    #[config(default = "[8, 8]")]
    pub clahe_tiles: [u32; 2],
    /// Give every training window the best-F1 threshold of its working pixels.
    #[config(default = false)]
    pub threshold_targets: bool,
}

impl PatchConfig {
    pub fn grid_offset(&self) -> [usize; 2] {
        self.offset.unwrap_or(self.patch_shape)
    }
}

#[derive(Config, Debug)]
pub struct RunConfig {
    pub name: String,
    pub dirs: DirsConfig,
    pub model: ModelKind,
    #[config(default = "ParamsConfig::new()")]
    pub params: ParamsConfig,
    #[config(default = "PatchConfig::new()")]
    pub patches: PatchConfig,
    #[config(default = "None")]
    pub mask_rule: Option<FileNameRule>,
    #[config(default = "None")]
    pub truth_rule: Option<FileNameRule>,
}

impl RunConfig {
    /// Loads a run configuration from JSON and validates it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> error::Result<Self> {
        let config = Self::load(path.as_ref())
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Side length of the sub-window grid fed as input channels.
    pub fn input_grid(&self) -> usize {
        match self.model {
            ModelKind::UUNet(_) => 3,
            _ => 1,
        }
    }

    pub fn validate(&self) -> error::Result<()> {
        let params = &self.params;
        let patches = &self.patches;

        if params.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if params.log_frequency == 0 || params.validation_frequency == 0 {
            return Err(Error::Config(
                "log_frequency and validation_frequency must be positive".into(),
            ));
        }
        if patches.patch_shape.contains(&0) || patches.grid_offset().contains(&0) {
            return Err(Error::Config("patch_shape and offset must be positive".into()));
        }
        if patches.est_stride == 0 {
            return Err(Error::Config("est_stride must be positive".into()));
        }

        let grid = self.input_grid();
        if patches.patch_shape.iter().any(|side| side % grid != 0) {
            return Err(Error::Config(format!(
                "patch_shape {:?} must be divisible by the input grid {}",
                patches.patch_shape, grid
            )));
        }
        if grid * grid != self.model.input_channels() && grid > 1 {
            return Err(Error::Config(format!(
                "a {grid}x{grid} input grid needs {} input channels",
                grid * grid
            )));
        }
        self.check_geometry()?;
        if let Some(weights) = &params.class_weights {
            if weights.iter().any(|w| *w <= 0.0) {
                return Err(Error::Config("class_weights must be positive".into()));
            }
        }
        if self.truth_rule.is_none() || self.dirs.truth.is_none() {
            return Err(Error::Config(
                "dirs.truth and truth_rule are required to build labels".into(),
            ));
        }

        Ok(())
    }

    /// Checks that the network turns `patch_shape + 2 * expand_by` (per grid
    /// tile) into a map that still covers the labelled window.
    fn check_geometry(&self) -> error::Result<()> {
        let grid = self.input_grid();
        let [rows, cols] = self.patches.patch_shape;
        let [expand_rows, expand_cols] = self.patches.expand_by;
        let label = [rows / grid, cols / grid];
        let input = [label[0] + 2 * expand_rows, label[1] + 2 * expand_cols];

        match self.model.output_shape(input) {
            Some(output) if output[0] >= label[0] && output[1] >= label[1] => Ok(()),
            Some(output) => Err(Error::Config(format!(
                "{} turns {:?} inputs into {:?}, smaller than the {:?} labels; raise expand_by",
                self.model.name(),
                input,
                output,
                label
            ))),
            None => Err(Error::Config(format!(
                "{} cannot process {:?} inputs: a level collapses or pools an odd size",
                self.model.name(),
                input
            ))),
        }
    }
}
