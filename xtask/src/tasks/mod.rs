pub mod split;
pub mod test;
pub mod train;

use std::path::Path;

use anyhow::{Context, Result};
use burn::{
    backend::{Autodiff, NdArray, Wgpu, wgpu::WgpuDevice},
    prelude::*,
};
use unet_bee::{RunConfig, runner};

pub fn load_config(path: &Path) -> Result<RunConfig> {
    RunConfig::from_file(path)
        .with_context(|| format!("Failed to load run configuration {}", path.display()))
}

/// Runs every split of `conf` on the GPU when requested, else on the CPU.
pub fn execute(conf: &RunConfig) -> Result<()> {
    let score = if conf.params.use_gpu {
        type MyBackend = Wgpu<f32, i32>;
        type MyAutodiffBackend = Autodiff<MyBackend>;

        tracing::info!("Initializing GPU device...");
        MyAutodiffBackend::seed(conf.params.seed);
        runner::run::<MyAutodiffBackend>(conf, WgpuDevice::default())?
    } else {
        type MyAutodiffBackend = Autodiff<NdArray>;

        MyAutodiffBackend::seed(conf.params.seed);
        runner::run::<MyAutodiffBackend>(conf, Default::default())?
    };

    let [p, r, f1, a] = score.prfa();
    tracing::info!(
        "{} finished: precision {:.4} recall {:.4} f1 {:.4} accuracy {:.4}",
        conf.name,
        p,
        r,
        f1,
        a
    );
    Ok(())
}
