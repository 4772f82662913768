use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use unet_bee::dataset::{FolderSource, Splits, list_images};

#[derive(Args)]
pub struct SplitArgs {
    /// Image folder, or a dataset root holding `images/` and `groundtruth/`.
    #[arg(short, long)]
    pub images: PathBuf,

    #[arg(short, long, default_value_t = 5)]
    pub folds: usize,

    /// Directory the `SPLIT_<i>.json` files are written to.
    #[arg(short, long)]
    pub out: PathBuf,
}

pub fn run(args: &SplitArgs) -> Result<()> {
    let files = if args.images.join("images").is_dir() {
        FolderSource::discover(&args.images)?.file_names()
    } else {
        list_images(&args.images)?
    };
    if files.is_empty() {
        bail!("No images found in {}", args.images.display());
    }

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("Cannot create {}", args.out.display()))?;

    for (i, split) in Splits::k_fold(&files, args.folds)?.iter().enumerate() {
        let path = args.out.join(format!("SPLIT_{i}.json"));
        split.save(&path)?;
        tracing::info!(
            "{}: {} train, {} validation, {} test",
            path.display(),
            split.train.len(),
            split.validation.len(),
            split.test.len()
        );
    }

    Ok(())
}
