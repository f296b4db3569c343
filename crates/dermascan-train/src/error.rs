use std::path::PathBuf;

use burn::record::RecorderError;
use dermascan_model::{ArtifactError, PreprocessError};
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Invalid training configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Dataset error: {0}")]
    Dataset(String),
    #[error("Failed to decode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: PreprocessError,
    },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("Failed to load backbone weights: {0:?}")]
    Record(RecorderError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TrainError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrainError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn dataset(message: impl Into<String>) -> Self {
        TrainError::Dataset(message.into())
    }
}

impl From<RecorderError> for TrainError {
    fn from(err: RecorderError) -> Self {
        TrainError::Record(err)
    }
}
