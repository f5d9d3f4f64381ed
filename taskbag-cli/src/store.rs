//! Sample persistence
//!
//! Samples are stored as rkyv blobs named `<directory>/<name>.rkyv` and are
//! validated when loaded back.

use std::path::{Path, PathBuf};
use taskbag_ipc::{FrameError, Sample, decode, encode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored sample named {name:?} in {}", .directory.display())]
    NotFound { name: String, directory: PathBuf },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode sample: {0}")]
    Encode(String),

    #[error("stored sample {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: FrameError,
    },
}

/// Name of the stored population of `millions` million individuals
pub fn sample_name(millions: f64) -> String {
    format!("sample_{}M", millions)
}

/// Directory of persisted samples
#[derive(Debug, Clone)]
pub struct SampleStore {
    directory: PathBuf,
}

impl SampleStore {
    /// Store rooted at `directory` (created on first save)
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Root directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the blob holding `name`
    pub fn path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.rkyv"))
    }

    /// Persist `sample` under `name`, replacing any previous blob
    pub fn save(&self, name: &str, sample: &Sample) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(&self.directory).map_err(|source| StoreError::Io {
            path: self.directory.clone(),
            source,
        })?;

        // Blobs are not frames, so no size limit applies
        let bytes = encode(sample, usize::MAX).map_err(|e| StoreError::Encode(e.to_string()))?;
        let path = self.path(name);
        std::fs::write(&path, &bytes).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "sample saved");
        Ok(path)
    }

    /// Load the sample stored under `name`
    pub fn load(&self, name: &str) -> Result<Sample, StoreError> {
        let path = self.path(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    name: name.to_string(),
                    directory: self.directory.clone(),
                });
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        // rkyv needs an aligned buffer
        let mut aligned = rkyv::AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(&bytes);

        let sample = decode::<Sample>(&aligned).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), points = sample.len(), "sample loaded");
        Ok(sample)
    }

    /// Whether a blob named `name` exists
    pub fn contains(&self, name: &str) -> bool {
        self.path(name).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskbag_ipc::BodyMeasurement;

    #[test]
    fn test_sample_name() {
        assert_eq!(sample_name(1.0), "sample_1M");
        assert_eq!(sample_name(0.5), "sample_0.5M");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("samples"));
        let sample = Sample::Population(vec![
            BodyMeasurement::new(168.1, 61.7),
            BodyMeasurement::new(167.9, 62.3),
        ]);

        let path = store.save("sample_1M", &sample).unwrap();
        assert!(path.ends_with("sample_1M.rkyv"));
        assert!(store.contains("sample_1M"));
        assert_eq!(store.load("sample_1M").unwrap(), sample);
    }

    #[test]
    fn test_missing_sample() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        assert!(matches!(
            store.load("sample_9M"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_corrupt_sample() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        std::fs::write(store.path("broken"), b"definitely not rkyv").unwrap();
        assert!(matches!(
            store.load("broken"),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
