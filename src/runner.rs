//! Runs every experiment split of a configuration end to end.

use std::fs;
use std::path::Path;

use burn::{
    data::dataset::Dataset, module::AutodiffModule, optim::AdamConfig,
    tensor::backend::AutodiffBackend,
};

use crate::config::{Mode, RunConfig};
use crate::dataset::{
    PatchDataset, Sampling, Splits, per_image_datasets, split_files, train_loader,
};
use crate::error::{Error, Result};
use crate::measurements::ScoreAccumulator;
use crate::model::{ModelKind, SegmentationModel};
use crate::training::{Trainer, TrainerConfig};

pub const SCORE_FILE: &str = "score.txt";

/// Trains (in train mode) and tests one model per split file found in
/// `dirs.splits_json`, then writes the accumulated score to `score.txt` in
/// the log directory. A failing split is logged and skipped.
pub fn run<B: AutodiffBackend>(conf: &RunConfig, device: B::Device) -> Result<ScoreAccumulator> {
    conf.validate()?;
    fs::create_dir_all(&conf.dirs.logs)?;

    let splits_dir = conf
        .dirs
        .splits_json
        .as_ref()
        .ok_or_else(|| Error::Config("dirs.splits_json is required to run".into()))?;
    let split_files = split_files(splits_dir)?;
    if split_files.is_empty() {
        tracing::warn!("No split files in {}", splits_dir.display());
    }

    let mut total = ScoreAccumulator::new();
    for split_file in split_files {
        let key = split_key(&split_file);
        tracing::info!("### {}: running split {}", conf.name, key);

        match run_split::<B>(conf, &key, &split_file, &device) {
            Ok(score) => {
                total.accumulate(&score);
            }
            Err(err) => tracing::error!("Split {} failed: {}", key, err),
        }
    }

    let [p, r, f1, a] = total.prfa();
    tracing::info!(
        "### {} score: pre:{:.5} rec:{:.5} f1:{:.5} acc:{:.5}",
        conf.name,
        p,
        r,
        f1,
        a
    );
    fs::write(conf.dirs.logs.join(SCORE_FILE), format!("{p}, {r}, {f1}, {a}"))?;

    Ok(total)
}

fn split_key(split_file: &Path) -> String {
    split_file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "SPLIT".to_string())
}

fn run_split<B: AutodiffBackend>(
    conf: &RunConfig,
    key: &str,
    split_file: &Path,
    device: &B::Device,
) -> Result<ScoreAccumulator> {
    let splits = Splits::load(split_file)?;

    match &conf.model {
        ModelKind::UNet(model) => run_model::<B, _>(conf, key, &splits, model.init(device), device),
        ModelKind::BabyUNet(model) => {
            run_model::<B, _>(conf, key, &splits, model.init(device), device)
        }
        ModelKind::UUNet(model) => run_model::<B, _>(conf, key, &splits, model.init(device), device),
    }
}

fn run_model<B, M>(
    conf: &RunConfig,
    key: &str,
    splits: &Splits,
    model: M,
    device: &B::Device,
) -> Result<ScoreAccumulator>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
{
    let params = &conf.params;
    let mut trainer_config = TrainerConfig::from_run(conf, key);

    let training = if params.mode == Mode::Train {
        let train = PatchDataset::new(
            conf,
            &splits.train,
            Mode::Train,
            Sampling::Estimated {
                threshold: conf.patches.est_threshold,
                stride: conf.patches.est_stride,
            },
            Some(params.seed),
        )?
        .with_threshold_targets(conf.patches.threshold_targets);
        if train.is_empty() {
            return Err(Error::NoPatches(key.to_string()));
        }
        if params.balance_classes {
            if let Some(weights) = train.class_weights() {
                tracing::info!("Class weights: {:?}", weights);
                trainer_config = trainer_config.with_class_weights(weights);
            }
        }
        let validation = per_image_datasets(conf, &splits.validation, Mode::Validation)?;
        Some((train, validation))
    } else {
        None
    };

    let mut trainer =
        Trainer::<B, M, _>::new(trainer_config, model, AdamConfig::new().init(), device.clone())?;

    if let Some((train, validation)) = training {
        let loader = train_loader::<B>(
            train,
            params.batch_size,
            params.num_workers,
            params.seed,
            device.clone(),
        );
        trainer.train(loader, &validation)?;
    }

    trainer.resume_from_checkpoint();
    let test = per_image_datasets(conf, &splits.test, Mode::Test)?;
    trainer.test(&test, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DirsConfig, FileNameRule, LossKind, ParamsConfig, PatchConfig};
    use crate::model::{BabyUNetConfig, UNetConfig};
    use burn::backend::{Autodiff, NdArray};
    use image::{GrayImage, Luma};

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn runs_every_split_and_writes_the_score() {
        let root = std::env::temp_dir().join(format!("unet-bee-runner-{}", std::process::id()));
        let (images, truth, splits, logs) = (
            root.join("images"),
            root.join("truth"),
            root.join("splits"),
            root.join("logs"),
        );
        for dir in [&images, &truth, &splits] {
            fs::create_dir_all(dir).unwrap();
        }

        let names: Vec<String> = (0..3).map(|i| format!("{i}.png")).collect();
        for (i, name) in names.iter().enumerate() {
            GrayImage::from_fn(16, 16, |x, y| Luma([if (x + i as u32) % 4 == y % 4 { 200 } else { 30 }]))
                .save(images.join(name))
                .unwrap();
            GrayImage::from_fn(16, 16, |x, y| Luma([if (x + i as u32) % 4 == y % 4 { 255 } else { 0 }]))
                .save(truth.join(name))
                .unwrap();
        }
        for (i, split) in Splits::k_fold(&names, 3).unwrap().iter().enumerate() {
            split.save(splits.join(format!("SPLIT_{i}.json"))).unwrap();
        }
        // refers to an image that does not exist
        Splits {
            train: vec!["missing.png".into()],
            validation: vec![],
            test: vec![],
        }
        .save(splits.join("SPLIT_3.json"))
        .unwrap();

        let conf = RunConfig::new(
            "toy".to_string(),
            DirsConfig::new(images, logs.clone())
                .with_truth(Some(truth))
                .with_splits_json(Some(splits)),
            ModelKind::UNet(UNetConfig::new().with_base_channels(2).with_dropout(0.0)),
        )
        .with_params(
            ParamsConfig::new()
                .with_epochs(1)
                .with_batch_size(2)
                .with_loss(LossKind::CrossEntropy)
                .with_balance_classes(true)
                .with_overwrite_logs(true),
        )
        .with_patches(PatchConfig::new().with_patch_shape([16, 16]).with_est_stride(4))
        .with_truth_rule(Some(FileNameRule::new("{file}".into())));

        let total = run::<TestBackend>(&conf, Default::default()).unwrap();

        // one test image per split, the failing split adds nothing
        assert_eq!(total.tp + total.fp + total.tn + total.fn_, 3 * 16 * 16);
        let score = fs::read_to_string(logs.join(SCORE_FILE)).unwrap();
        assert_eq!(score.split(", ").count(), 4);
        for i in 0..3 {
            assert!(logs.join(format!("SPLIT_{i}-TEST.csv")).is_file());
        }
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn splits_directory_is_required() {
        let conf = RunConfig::new(
            "toy".to_string(),
            DirsConfig::new("images".into(), std::env::temp_dir().join("unet-bee-runner-nosplits"))
                .with_truth(Some("truth".into())),
            ModelKind::UNet(UNetConfig::new()),
        )
        .with_truth_rule(Some(FileNameRule::new("{file}".into())));

        assert!(matches!(
            run::<TestBackend>(&conf, Default::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn network_geometry_is_checked_before_any_split() {
        let logs = std::env::temp_dir().join(format!("unet-bee-runner-geometry-{}", std::process::id()));
        let conf = RunConfig::new(
            "toy".to_string(),
            DirsConfig::new("images".into(), logs.clone())
                .with_truth(Some("truth".into()))
                .with_splits_json(Some("splits".into())),
            ModelKind::BabyUNet(BabyUNetConfig::new(1, 2).with_reduction(16)),
        )
        .with_patches(PatchConfig::new().with_patch_shape([32, 32]))
        .with_truth_rule(Some(FileNameRule::new("{file}".into())));

        assert!(matches!(
            run::<TestBackend>(&conf, Default::default()),
            Err(Error::Config(_))
        ));
        assert!(!logs.exists());
    }
}
