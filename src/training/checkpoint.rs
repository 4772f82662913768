use std::fs;
use std::path::{Path, PathBuf};

use burn::{prelude::*, record::CompactRecorder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const WEIGHTS_EXTENSION: &str = "mpk";

/// Training progress stored next to the best weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Epochs run so far.
    pub total_epochs: usize,
    /// Epoch the best score was reached at.
    pub epochs: usize,
    pub score: f64,
    pub model: String,
}

impl CheckpointState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            total_epochs: 0,
            epochs: 0,
            score: 0.0,
            model: model.into(),
        }
    }
}

/// Weights and metadata of the best model of one experiment, stored as
/// `<dir>/<key>.mpk` and `<dir>/<key>.json`.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    dir: PathBuf,
    key: String,
}

impl Checkpoint {
    pub fn new<P: AsRef<Path>>(dir: P, key: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Weight file path without extension, as the recorder expects it.
    fn weights_stem(&self) -> PathBuf {
        self.dir.join(&self.key)
    }

    pub fn weights_path(&self) -> PathBuf {
        self.weights_stem().with_extension(WEIGHTS_EXTENSION)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.key))
    }

    pub fn exists(&self) -> bool {
        self.weights_path().is_file() && self.state_path().is_file()
    }

    pub fn save<B: Backend, M: Module<B>>(&self, model: &M, state: &CheckpointState) -> Result<()> {
        model
            .clone()
            .save_file(self.weights_stem(), &CompactRecorder::new())
            .map_err(|e| Error::Checkpoint(format!("{}: {e}", self.key)))?;
        fs::write(self.state_path(), serde_json::to_string_pretty(state)?)?;

        tracing::debug!("Saved checkpoint {}", self.weights_path().display());
        Ok(())
    }

    pub fn load_state(&self) -> Result<CheckpointState> {
        let json = fs::read_to_string(self.state_path())?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Loads the stored weights into `model`.
    pub fn load<B: Backend, M: Module<B>>(
        &self,
        model: M,
        device: &B::Device,
    ) -> Result<(M, CheckpointState)> {
        if !self.exists() {
            return Err(Error::Checkpoint(format!(
                "no checkpoint at {}",
                self.weights_path().display()
            )));
        }

        let model = model
            .load_file(self.weights_stem(), &CompactRecorder::new(), device)
            .map_err(|e| Error::Checkpoint(format!("{}: {e}", self.key)))?;

        Ok((model, self.load_state()?))
    }
}
