use anyhow::Result;
use clap::{Parser, Subcommand};

mod tasks;

#[derive(Parser)]
#[command(
    name = "unet-bee",
    about = "U-Net patch segmentation experiments",
    author,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on every split, then test the best checkpoints.
    Train(tasks::train::TrainArgs),
    /// Test saved checkpoints on every split.
    Test(tasks::test::TestArgs),
    /// Write k-fold split files for a folder of images.
    Split(tasks::split::SplitArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Train(args) => tasks::train::run(args),
        Commands::Test(args) => tasks::test::run(args),
        Commands::Split(args) => tasks::split::run(args),
    }
}
