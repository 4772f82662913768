use std::path::PathBuf;
use std::sync::Arc;

use burn::{
    data::dataloader::DataLoader,
    data::dataset::Dataset,
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use image::GrayImage;
use rand::{SeedableRng, rngs::StdRng};

use super::checkpoint::{Checkpoint, CheckpointState};
use super::logger::{CsvLogger, RunLoggers};
use super::loss::{DiceLoss, DiceLossConfig, foreground_probability, mse_loss, random_beta};
use super::segmentation_cross_entropy::{
    SegmentationCrossEntropyLoss, SegmentationCrossEntropyLossConfig,
};
use crate::config::{LossKind, Mode, RunConfig};
use crate::dataset::{PatchBatch, PatchDataset, image_loader, num_batches};
use crate::error::{self, Error};
use crate::measurements::{ScoreAccumulator, best_f1_threshold};
use crate::model::SegmentationModel;

/// Epochs between two learning rate decays.
const DECAY_EVERY: usize = 30;
const DECAY_FACTOR: f64 = 0.7;
/// No decay below this learning rate.
const MIN_DECAY_LR: f64 = 1e-5;

#[derive(Config, Debug)]
pub struct TrainerConfig {
    pub log_dir: PathBuf,
    /// Names the checkpoint and log files of the experiment.
    pub checkpoint_key: String,
    #[config(default = "Mode::Train")]
    pub mode: Mode,
    #[config(default = 100)]
    pub epochs: usize,
    #[config(default = 10)]
    pub log_frequency: usize,
    #[config(default = 1)]
    pub validation_frequency: usize,
    #[config(default = 35)]
    pub patience: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = "LossKind::Dice { beta: None }")]
    pub loss: LossKind,
    #[config(default = "vec![1.0, 1.0]")]
    pub class_weights: Vec<f32>,
    /// Batch size of the evaluation loaders.
    #[config(default = 4)]
    pub batch_size: usize,
    #[config(default = false)]
    pub overwrite_logs: bool,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = "String::from(\"UNet\")")]
    pub model_name: String,
}

impl TrainerConfig {
    pub fn from_run(conf: &RunConfig, checkpoint_key: impl Into<String>) -> Self {
        let params = &conf.params;

        Self::new(conf.dirs.logs.clone(), checkpoint_key.into())
            .with_mode(params.mode)
            .with_epochs(params.epochs)
            .with_log_frequency(params.log_frequency)
            .with_validation_frequency(params.validation_frequency)
            .with_patience(params.patience)
            .with_learning_rate(params.learning_rate)
            .with_loss(params.loss.clone())
            .with_class_weights(
                params
                    .class_weights
                    .clone()
                    .unwrap_or_else(|| vec![1.0, 1.0]),
            )
            .with_batch_size(params.batch_size)
            .with_overwrite_logs(params.overwrite_logs)
            .with_seed(params.seed)
            .with_model_name(conf.model.name().to_string())
    }
}

/// Predictions of one image stitched back to full size.
#[derive(Debug)]
struct Stitched {
    segmented: Vec<u8>,
    probability: Vec<u8>,
}

/// Trains, validates and tests one model on one experiment split.
pub struct Trainer<B, M, O>
where
    B: AutodiffBackend,
{
    model: M,
    optim: O,
    config: TrainerConfig,
    device: B::Device,
    learning_rate: f64,
    checkpoint: Checkpoint,
    state: CheckpointState,
    loggers: RunLoggers,
    cross_entropy: SegmentationCrossEntropyLoss<B>,
    dice: DiceLoss<B>,
    rng: StdRng,
}

impl<B, M, O> Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    /// Creates the experiment's log files; fails when one already exists and
    /// overwriting is off.
    pub fn new(
        config: TrainerConfig,
        model: M,
        optim: O,
        device: B::Device,
    ) -> error::Result<Self> {
        if config.class_weights.iter().any(|&w| w <= 0.0) {
            return Err(Error::Config(format!(
                "class weights must be positive, got {:?}",
                config.class_weights
            )));
        }
        if config.class_weights.len() != model.num_classes() {
            return Err(Error::Config(format!(
                "{} class weights for a {} class model",
                config.class_weights.len(),
                model.num_classes()
            )));
        }

        let loggers = RunLoggers::create(
            &config.log_dir,
            &config.checkpoint_key,
            &config.loss,
            config.mode == Mode::Train,
            config.overwrite_logs,
        )?;

        Ok(Self {
            cross_entropy: SegmentationCrossEntropyLossConfig::new()
                .with_weights(Some(config.class_weights.clone()))
                .init(&device),
            dice: DiceLossConfig::new().init(),
            rng: StdRng::seed_from_u64(config.seed),
            checkpoint: Checkpoint::new(&config.log_dir, config.checkpoint_key.clone()),
            state: CheckpointState::new(config.model_name.clone()),
            learning_rate: config.learning_rate,
            loggers,
            model,
            optim,
            config,
            device,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Runs up to `epochs` epochs, validating every `validation_frequency`
    /// epochs and stopping once the best score is `patience` validations old.
    pub fn train(
        &mut self,
        loader: Arc<dyn DataLoader<PatchBatch<B>>>,
        validation: &[PatchDataset],
    ) -> error::Result<()> {
        tracing::info!("Training...");

        for epoch in 1..=self.config.epochs {
            self.adjust_learning_rate(epoch);
            self.state.total_epochs = epoch;

            self.run_epoch(epoch, &loader)?;

            if epoch % self.config.validation_frequency.max(1) == 0 {
                tracing::info!("Running validation..");
                let score = self.validate(validation)?;
                self.save_if_better(score)?;

                if self.early_stop() {
                    tracing::info!(
                        "Stopping early at epoch {}, best epoch {}",
                        epoch,
                        self.state.epochs
                    );
                    break;
                }
            }
        }

        Ok(())
    }

    /// Multiplies the learning rate by 0.7 every 30th epoch until it drops
    /// below 1e-5.
    pub fn adjust_learning_rate(&mut self, epoch: usize) {
        if epoch % DECAY_EVERY == 0 && self.learning_rate >= MIN_DECAY_LR {
            self.learning_rate *= DECAY_FACTOR;
            tracing::debug!("Learning rate now {}", self.learning_rate);
        }
    }

    pub fn early_stop(&self) -> bool {
        self.state.total_epochs.saturating_sub(self.state.epochs)
            >= self.config.patience * self.config.validation_frequency
    }

    /// One pass over `loader` with the configured loss.
    pub fn run_epoch(
        &mut self,
        epoch: usize,
        loader: &Arc<dyn DataLoader<PatchBatch<B>>>,
    ) -> error::Result<()> {
        let batches = num_batches(loader.num_items(), self.config.batch_size);
        let log_frequency = self.config.log_frequency.max(1);
        let mut running_loss = 0.0;
        let mut score = ScoreAccumulator::new();

        for (i, batch) in loader.iter().enumerate() {
            let i = i + 1;
            let [_, _, rows, cols] = batch.labels.dims();
            let output = self.model.forward_window(batch.inputs, [rows, cols]);

            let loss = match self.config.loss {
                LossKind::CrossEntropy => self.cross_entropy.forward(
                    output.clone(),
                    batch.labels.clone(),
                    batch.masks,
                ),
                LossKind::Dice { beta } => {
                    let beta = beta.unwrap_or_else(|| random_beta(&mut self.rng));
                    self.dice.forward(
                        foreground_probability(output.clone()),
                        batch.labels.clone(),
                        batch.masks,
                        beta,
                    )
                }
                LossKind::Mse => mse_loss(output.clone(), batch.labels.clone()),
            };

            let current_loss = loss.clone().into_scalar().elem::<f64>();
            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self
                .optim
                .step(self.learning_rate, self.model.clone(), grads);
            running_loss += current_loss;

            let logger = self.loggers.train.as_mut();
            if self.config.loss == LossKind::Mse {
                if i % log_frequency == 0 {
                    tracing::info!(
                        "Epochs[{}/{}] Batch[{}/{}] MSE loss:{:.5}",
                        epoch,
                        self.config.epochs,
                        i,
                        batches,
                        running_loss / log_frequency as f64
                    );
                    running_loss = 0.0;
                }
                if let Some(logger) = logger {
                    logger.log([0.0, epoch as f64, i as f64, current_loss])?;
                }
                continue;
            }

            let [p, r, f1, a] = score
                .reset()
                .add_tensor(output.argmax(1), batch.labels)
                .prfa();
            if i % log_frequency == 0 {
                tracing::info!(
                    "Epochs[{}/{}] Batch[{}/{}] loss:{:.5} pre:{:.3} rec:{:.3} f1:{:.3} acc:{:.3}",
                    epoch,
                    self.config.epochs,
                    i,
                    batches,
                    running_loss / log_frequency as f64,
                    p,
                    r,
                    f1,
                    a
                );
                running_loss = 0.0;
            }
            if let Some(logger) = logger {
                logger.log([0.0, epoch as f64, i as f64, p, r, f1, a, current_loss])?;
            }
        }

        Ok(())
    }

    /// Mean F1 over the validation images.
    pub fn validate(&mut self, datasets: &[PatchDataset]) -> error::Result<f64> {
        if datasets.is_empty() {
            tracing::warn!("No validation images");
            return Ok(0.0);
        }

        let mut f1_sum = 0.0;
        for dataset in datasets {
            let (file_name, stitched, mask, truth) = self.stitch(dataset)?;
            let score = score_image(&stitched, mask.as_deref(), &truth);
            let [p, r, f1, a] = score.prfa();
            f1_sum += f1;

            tracing::info!("{} PRF1A {:?}", file_name, [p, r, f1, a]);
            if let Some(logger) = self.loggers.validation.as_mut() {
                logger.log([file_name, p.to_string(), r.to_string(), f1.to_string(), a.to_string()])?;
            }
        }

        Ok(f1_sum / datasets.len() as f64)
    }

    /// Scores every test image, optionally writing `<stem>.png` segmentations
    /// to the log directory, and returns the accumulated counts.
    pub fn test(
        &mut self,
        datasets: &[PatchDataset],
        gen_images: bool,
    ) -> error::Result<ScoreAccumulator> {
        tracing::info!("Running test");
        let mut total = ScoreAccumulator::new();

        for dataset in datasets {
            let (file_name, stitched, mask, truth) = self.stitch(dataset)?;
            let score = score_image(&stitched, mask.as_deref(), &truth);
            total.accumulate(&score);

            let (best_f1, threshold) = match mask.as_deref() {
                Some(mask) => {
                    let (probability, truth): (Vec<u8>, Vec<u8>) = stitched
                        .probability
                        .iter()
                        .zip(&truth)
                        .zip(mask)
                        .filter(|(_, m)| **m != 0)
                        .map(|((p, t), _)| (*p, *t))
                        .unzip();
                    best_f1_threshold(&probability, &truth)
                }
                None => best_f1_threshold(&stitched.probability, &truth),
            };

            if gen_images {
                self.save_segmentation(dataset, &file_name, stitched.segmented)?;
            }

            let [p, r, f1, a] = score.prfa();
            tracing::info!("{} PRF1A {:?}", file_name, [p, r, f1, a]);
            if let Some(logger) = self.loggers.test.as_mut() {
                logger.log([
                    file_name,
                    p.to_string(),
                    r.to_string(),
                    f1.to_string(),
                    a.to_string(),
                    threshold.to_string(),
                    best_f1.to_string(),
                ])?;
            }
        }

        Ok(total)
    }

    /// Saves the model when `score` beats the best score so far. Test runs
    /// never save.
    pub fn save_if_better(&mut self, score: f64) -> error::Result<bool> {
        if self.config.mode == Mode::Test {
            return Ok(false);
        }

        if score > self.state.score {
            tracing::info!(
                "Score improved: {} to {} BEST CHECKPOINT SAVED",
                self.state.score,
                score
            );
            self.state.epochs = self.state.total_epochs;
            self.state.score = score;
            self.state.model = self.config.model_name.clone();
            self.checkpoint.save::<B, M>(&self.model, &self.state)?;
            Ok(true)
        } else {
            tracing::info!(
                "Score did not improve: {} BEST: {} EP: {}",
                score,
                self.state.score,
                self.state.epochs
            );
            Ok(false)
        }
    }

    /// Loads the best weights saved for this experiment. Without a usable
    /// checkpoint the error is logged and the current model kept.
    pub fn resume_from_checkpoint(&mut self) -> bool {
        match self
            .checkpoint
            .load::<B, M>(self.model.clone(), &self.device)
        {
            Ok((model, state)) => {
                tracing::info!(
                    "Resumed {} from epoch {} (score {})",
                    self.checkpoint.key(),
                    state.epochs,
                    state.score
                );
                self.model = model;
                self.state = state;
                true
            }
            Err(err) => {
                tracing::error!("ERROR: {}", err);
                false
            }
        }
    }

    /// Runs the inference model over every patch of a single-image dataset
    /// and pastes the predictions at their windows.
    #[allow(clippy::type_complexity)]
    fn stitch(
        &self,
        dataset: &PatchDataset,
    ) -> error::Result<(String, Stitched, Option<Vec<u8>>, Vec<u8>)> {
        let object = dataset
            .image_objects()
            .first()
            .ok_or_else(|| Error::NoPatches("empty dataset".to_string()))?;
        let truth = object
            .ground_truth
            .as_ref()
            .ok_or_else(|| Error::MissingGroundTruth(object.file_name.clone()))?;
        if dataset.is_empty() {
            return Err(Error::NoPatches(object.file_name.clone()));
        }

        let [rows, cols] = object.shape();
        let mut stitched = Stitched {
            segmented: vec![0; rows * cols],
            probability: vec![0; rows * cols],
        };

        let model = self.model.valid();
        let loader = image_loader::<B::InnerBackend>(
            dataset.clone(),
            self.config.batch_size,
            self.device.clone(),
        );

        for batch in loader.iter() {
            let [_, _, height, width] = batch.labels.dims();
            let output = model.forward_window(batch.inputs, [height, width]);

            let predicted = output
                .clone()
                .argmax(1)
                .into_data()
                .convert::<i64>()
                .to_vec::<i64>()
                .unwrap_or_default();
            let probability = foreground_probability(output)
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .unwrap_or_default();

            for (k, clip) in batch.clips.iter().enumerate() {
                let [row_from, _, col_from, _] = *clip;
                for r in 0..height {
                    for c in 0..width {
                        let source = (k * height + r) * width + c;
                        let target = (row_from + r) * cols + col_from + c;
                        stitched.segmented[target] = if predicted[source] == 1 { 255 } else { 0 };
                        stitched.probability[target] =
                            (probability[source] * 255.0).round().clamp(0.0, 255.0) as u8;
                    }
                }
            }
        }

        Ok((
            object.file_name.clone(),
            stitched,
            object.mask.as_ref().map(|mask| mask.as_raw().clone()),
            truth.as_raw().clone(),
        ))
    }

    fn save_segmentation(
        &self,
        dataset: &PatchDataset,
        file_name: &str,
        segmented: Vec<u8>,
    ) -> error::Result<()> {
        let [rows, cols] = dataset
            .image_objects()
            .first()
            .map(|object| object.shape())
            .unwrap_or_default();
        let image = GrayImage::from_raw(cols as u32, rows as u32, segmented).ok_or(
            Error::ShapeMismatch {
                expected: [rows, cols],
                actual: [0, 0],
            },
        )?;

        let stem = std::path::Path::new(file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        let path = self.config.log_dir.join(format!("{stem}.png"));
        image.save(&path)?;
        tracing::debug!("Saved {}", path.display());

        Ok(())
    }

    /// Path of the test log, if one was created.
    pub fn test_log(&self) -> Option<&std::path::Path> {
        self.loggers.test.as_ref().map(CsvLogger::path)
    }
}

fn score_image(stitched: &Stitched, mask: Option<&[u8]>, truth: &[u8]) -> ScoreAccumulator {
    let mut score = ScoreAccumulator::new();
    match mask {
        Some(mask) => score.add_masked(&stitched.segmented, truth, mask),
        None => score.add_array(&stitched.segmented, truth),
    };
    score
}
