use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::LossKind;
use crate::error::{Error, Result};

pub const TRAIN_HEADER: &str = "ID,EPOCH,BATCH,PRECISION,RECALL,F1,ACCURACY,LOSS";
pub const TRAIN_MSE_HEADER: &str = "ID,EPOCH,BATCH,LOSS";
pub const VALIDATION_HEADER: &str = "ID,PRECISION,RECALL,F1,ACCURACY";
pub const TEST_HEADER: &str = "ID,PRECISION,RECALL,F1,ACCURACY,BEST_THR,BEST_F1";

pub fn train_header(loss: &LossKind) -> &'static str {
    match loss {
        LossKind::Mse => TRAIN_MSE_HEADER,
        _ => TRAIN_HEADER,
    }
}

/// A CSV file written one flushed row at a time.
#[derive(Debug)]
pub struct CsvLogger {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CsvLogger {
    /// Creates `path` and writes `header`. An existing file is only replaced
    /// when `overwrite` is set.
    pub fn create<P: AsRef<Path>>(path: P, header: &str, overwrite: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            if !overwrite {
                return Err(Error::LogExists(path));
            }
            tracing::warn!("Overwriting {}", path.display());
        }

        let mut logger = Self {
            writer: BufWriter::new(File::create(&path)?),
            path,
        };
        logger.write_line(header)?;
        Ok(logger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row of comma separated values.
    pub fn log<I, T>(&mut self, row: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        let line = row
            .into_iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.write_line(&line)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// The train, validation and test loggers of one experiment.
#[derive(Debug, Default)]
pub struct RunLoggers {
    pub train: Option<CsvLogger>,
    pub validation: Option<CsvLogger>,
    pub test: Option<CsvLogger>,
}

impl RunLoggers {
    /// `<key>-TRAIN.csv` and `<key>-VAL.csv` in training runs, `<key>-TEST.csv`
    /// always.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        key: &str,
        loss: &LossKind,
        train: bool,
        overwrite: bool,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let file = |suffix: &str| dir.join(format!("{key}-{suffix}.csv"));

        let (train, validation) = if train {
            (
                Some(CsvLogger::create(file("TRAIN"), train_header(loss), overwrite)?),
                Some(CsvLogger::create(file("VAL"), VALIDATION_HEADER, overwrite)?),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            train,
            validation,
            test: Some(CsvLogger::create(file("TEST"), TEST_HEADER, overwrite)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("unet-bee-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn rows_are_written_after_the_header() {
        let dir = temp_dir("logger");
        let path = dir.join("rows.csv");

        let mut logger = CsvLogger::create(&path, VALIDATION_HEADER, true).unwrap();
        logger.log(["a.png", "0.5", "1"]).unwrap();
        logger.log([1.5, 2.0]).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{VALIDATION_HEADER}\na.png,0.5,1\n1.5,2\n"));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn existing_logs_are_kept_unless_overwriting() {
        let dir = temp_dir("logger-exists");
        let path = dir.join("old.csv");
        fs::write(&path, "old").unwrap();

        let refused = CsvLogger::create(&path, TEST_HEADER, false);

        assert!(matches!(refused, Err(Error::LogExists(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
        assert!(CsvLogger::create(&path, TEST_HEADER, true).is_ok());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn run_loggers_follow_mode_and_loss() {
        let dir = temp_dir("run-loggers");

        let loggers = RunLoggers::create(&dir, "SPLIT_0", &LossKind::Mse, true, true).unwrap();
        let test_only =
            RunLoggers::create(&dir, "SPLIT_1", &LossKind::CrossEntropy, false, true).unwrap();

        assert!(loggers.validation.is_some());
        assert!(test_only.train.is_none() && test_only.validation.is_none());
        let train = fs::read_to_string(dir.join("SPLIT_0-TRAIN.csv")).unwrap();
        assert_eq!(train, format!("{TRAIN_MSE_HEADER}\n"));
        assert!(dir.join("SPLIT_1-TEST.csv").exists());
        fs::remove_dir_all(dir).ok();
    }
}
