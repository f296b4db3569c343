use std::path::PathBuf;

use thiserror::Error;

use crate::host::HostError;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact not found: {}", path.display())]
    Missing { path: PathBuf },
    #[error("Failed to access artifact {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Artifact {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl ArtifactError {
    pub(crate) fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            ArtifactError::Missing { path }
        } else {
            ArtifactError::Io { path, source }
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ArtifactError::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            ArtifactError::Missing { path }
            | ArtifactError::Io { path, .. }
            | ArtifactError::Corrupt { path, .. } => path,
        }
    }
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("Invalid input tensor: {0}")]
    InvalidInput(String),
    #[error("Forward pass failed: {0}")]
    Backend(String),
}
