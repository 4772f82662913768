use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: `{0}`")]
    Io(#[from] std::io::Error),

    #[error("Image error: `{0}`")]
    Image(#[from] image::ImageError),

    #[error("JSON error: `{0}`")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: `{0}`")]
    Config(String),

    #[error("Checkpoint error: `{0}`")]
    Checkpoint(String),

    #[error("Log file already exists: `{0}`")]
    LogExists(PathBuf),

    #[error("Invalid file extension: `{0}`")]
    InvalidFileExtension(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: [usize; 2],
        actual: [usize; 2],
    },

    #[error("Missing ground truth for `{0}`")]
    MissingGroundTruth(String),

    #[error("No patches could be generated from `{0}`")]
    NoPatches(String),
}

pub type Result<T> = std::result::Result<T, Error>;
