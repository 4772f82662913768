use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use unet_bee::Mode;

#[derive(Args)]
pub struct TestArgs {
    /// Run configuration (JSON) of the trained experiment.
    #[arg(short, long)]
    pub config: PathBuf,

    #[arg(long, default_value_t = false)]
    pub gpu: bool,

    #[arg(long, default_value_t = false)]
    pub overwrite_logs: bool,
}

pub fn run(args: &TestArgs) -> Result<()> {
    let mut conf = super::load_config(&args.config)?;
    conf.params.mode = Mode::Test;
    conf.params.use_gpu |= args.gpu;
    conf.params.overwrite_logs |= args.overwrite_logs;

    tracing::info!("Testing {}", conf.name);
    super::execute(&conf)
}
