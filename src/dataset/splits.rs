use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Image file names assigned to each stage of one experiment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Splits {
    pub train: Vec<String>,
    pub validation: Vec<String>,
    pub test: Vec<String>,
}

impl Splits {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Rotating `k`-fold splits over `files`: fold `i` tests on every file
    /// whose sorted position is `i` modulo `k`, validates on fold `i + 1`
    /// and trains on the rest.
    pub fn k_fold(files: &[String], k: usize) -> Result<Vec<Self>> {
        if k < 3 {
            return Err(Error::Config(format!("k-fold needs at least 3 folds, got {k}")));
        }
        if files.len() < k {
            return Err(Error::Config(format!(
                "{} files cannot be split into {k} folds",
                files.len()
            )));
        }

        let mut files = files.to_vec();
        files.sort();

        let fold = |i: usize| -> Vec<String> {
            files
                .iter()
                .enumerate()
                .filter(|(position, _)| position % k == i)
                .map(|(_, file)| file.clone())
                .collect()
        };

        Ok((0..k)
            .map(|i| {
                let validation_fold = (i + 1) % k;
                Splits {
                    train: (0..k)
                        .filter(|&j| j != i && j != validation_fold)
                        .flat_map(fold)
                        .collect(),
                    validation: fold(validation_fold),
                    test: fold(i),
                }
            })
            .collect())
    }
}

/// Split files in `dir`, sorted by name.
pub fn split_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    files.sort();
    Ok(files)
}
