use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use unet_bee::Mode;

#[derive(Args)]
pub struct TrainArgs {
    /// Run configuration (JSON).
    #[arg(short, long)]
    pub config: PathBuf,

    #[arg(long, default_value_t = false)]
    pub gpu: bool,

    /// Replace log files left by an earlier run.
    #[arg(long, default_value_t = false)]
    pub overwrite_logs: bool,

    /// Overrides the configured number of epochs.
    #[arg(short, long)]
    pub epochs: Option<usize>,
}

pub fn run(args: &TrainArgs) -> Result<()> {
    let mut conf = super::load_config(&args.config)?;
    conf.params.mode = Mode::Train;
    conf.params.use_gpu |= args.gpu;
    conf.params.overwrite_logs |= args.overwrite_logs;
    if let Some(epochs) = args.epochs {
        conf.params.epochs = epochs;
    }

    tracing::info!("Training {} ({} epochs)", conf.name, conf.params.epochs);
    super::execute(&conf)
}
