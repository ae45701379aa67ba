use serde::Deserialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

/// Errors that can occur while validating the storage section.
#[derive(Debug, Error)]
pub enum StorageConfigError {
    /// The sparse-index stride is outside 1..=4096.
    #[error("index_factor {0} out of range (1..=4096)")]
    IndexFactor(usize),

    /// The flush threshold is outside 1..=1048576.
    #[error("flush_threshold {0} out of range (1..=1048576)")]
    FlushThreshold(usize),

    /// Something other than a directory sits at the data path.
    #[error("data_dir {path:?} exists but is not a directory")]
    NotADirectory { path: PathBuf },

    /// The data directory could not be inspected or created.
    #[error("data_dir {path:?} is unusable")]
    DataDir {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
}

/// Storage engine knobs.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the segment files and the segment log. Created on
    /// first start when missing. Defaults to "./data".
    pub data_dir: PathBuf,

    /// One sparse-index entry is written per this many pairs in a segment.
    /// Must be between 1 and 4096. Defaults to 16.
    pub index_factor: usize,

    /// Number of resident pairs after which the memory store is flushed into
    /// a new segment. Must be between 1 and 1048576. Defaults to 4096.
    pub flush_threshold: usize,
}

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_INDEX_FACTOR: usize = 16;
const DEFAULT_FLUSH_THRESHOLD: usize = 4096;

const INDEX_FACTOR_RANGE: std::ops::RangeInclusive<usize> = 1..=4096;
const FLUSH_THRESHOLD_RANGE: std::ops::RangeInclusive<usize> = 1..=(1 << 20);

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            index_factor: DEFAULT_INDEX_FACTOR,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl StorageConfig {
    /// Checks the numeric knobs and makes sure `data_dir` is a directory,
    /// creating it when absent.
    ///
    /// Writability is deliberately not probed here: the first thing the
    /// engine does with the directory is open the segment log, and a
    /// read-only filesystem surfaces there with a far better error than any
    /// probe file would give.
    pub fn validate(&self) -> Result<(), StorageConfigError> {
        if !INDEX_FACTOR_RANGE.contains(&self.index_factor) {
            return Err(StorageConfigError::IndexFactor(self.index_factor));
        }
        if !FLUSH_THRESHOLD_RANGE.contains(&self.flush_threshold) {
            return Err(StorageConfigError::FlushThreshold(self.flush_threshold));
        }

        self.ensure_data_dir()
    }

    fn ensure_data_dir(&self) -> Result<(), StorageConfigError> {
        match fs::metadata(&self.data_dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageConfigError::NotADirectory {
                path: self.data_dir.clone(),
            }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                info!(?self.data_dir, "creating data directory");
                fs::create_dir_all(&self.data_dir).map_err(|error| {
                    StorageConfigError::DataDir {
                        path: self.data_dir.clone(),
                        error,
                    }
                })
            }
            Err(error) => Err(StorageConfigError::DataDir {
                path: self.data_dir.clone(),
                error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> StorageConfig {
        StorageConfig {
            data_dir: dir.path().join("data"),
            ..StorageConfig::default()
        }
    }

    #[test]
    fn test_default_values() {
        let config = StorageConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.index_factor, 16);
        assert_eq!(config.flush_threshold, 4096);
    }

    #[test]
    fn test_index_factor_bounds() {
        let dir = tempfile::tempdir().unwrap();

        for (factor, ok) in [(0, false), (1, true), (4096, true), (4097, false)] {
            let config = StorageConfig {
                index_factor: factor,
                ..config_in(&dir)
            };
            assert_eq!(
                config.validate().is_ok(),
                ok,
                "index_factor {} expected ok={}",
                factor,
                ok
            );
        }
    }

    #[test]
    fn test_flush_threshold_bounds() {
        let dir = tempfile::tempdir().unwrap();

        for (threshold, ok) in [(0, false), (1, true), (1 << 20, true), ((1 << 20) + 1, false)] {
            let config = StorageConfig {
                flush_threshold: threshold,
                ..config_in(&dir)
            };
            assert_eq!(
                config.validate().is_ok(),
                ok,
                "flush_threshold {} expected ok={}",
                threshold,
                ok
            );
        }

        match (StorageConfig {
            flush_threshold: 0,
            ..config_in(&dir)
        })
        .validate()
        .unwrap_err()
        {
            StorageConfigError::FlushThreshold(threshold) => assert_eq!(threshold, 0),
            e => panic!("expected FlushThreshold error, got {:?}", e),
        }
    }

    #[test]
    fn test_missing_data_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);

        config.validate().unwrap();
        assert!(config.data_dir.is_dir());

        // A second run finds it already there
        config.validate().unwrap();
    }

    #[test]
    fn test_file_in_the_way_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"occupied").unwrap();

        let config = StorageConfig {
            data_dir: path.clone(),
            ..StorageConfig::default()
        };

        match config.validate().unwrap_err() {
            StorageConfigError::NotADirectory { path: p } => assert_eq!(p, path),
            e => panic!("expected NotADirectory error, got {:?}", e),
        }
    }
}
