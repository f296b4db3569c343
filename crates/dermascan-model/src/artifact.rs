//! Single-file weights artifact.
//!
//! The file is a MessagePack document holding the architecture ([`ClassifierConfig`]) next
//! to the burn record of the parameters, so the server can rebuild the exact model without
//! any other side file.
use std::path::Path;

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder};
use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::error::ArtifactError;
use crate::model::{Classifier, ClassifierConfig};

pub const ARTIFACT_FORMAT: &str = "dermascan-classifier/1";

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format: String,
    pub config: ClassifierConfig,
    pub weights: Vec<u8>,
}

impl ModelArtifact {
    pub fn from_model<B: Backend>(
        config: ClassifierConfig,
        model: Classifier<B>,
    ) -> Result<Self, String> {
        let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
        let weights = recorder
            .record(model.into_record(), ())
            .map_err(|e| e.to_string())?;
        Ok(Self {
            format: ARTIFACT_FORMAT.to_string(),
            config,
            weights,
        })
    }

    pub fn into_model<B: Backend>(
        self,
        device: &B::Device,
    ) -> Result<(ClassifierConfig, Classifier<B>), String> {
        if self.format != ARTIFACT_FORMAT {
            return Err(format!(
                "unsupported artifact format '{}', expected '{ARTIFACT_FORMAT}'",
                self.format
            ));
        }
        self.config.validate()?;

        let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(self.weights, device)
            .map_err(|e| e.to_string())?;
        let model = self.config.init::<B>(device).load_record(record);
        Ok((self.config, model))
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| ArtifactError::from_io(path, e))?;
        log::info!(
            "Read model artifact {} ({} bytes, sha256 {:x})",
            path.display(),
            bytes.len(),
            sha2::Sha256::digest(&bytes)
        );
        rmp_serde::from_slice(&bytes).map_err(|e| ArtifactError::corrupt(path, e))
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        let path = path.as_ref();
        let bytes = rmp_serde::to_vec_named(self).map_err(|e| ArtifactError::corrupt(path, e))?;
        std::fs::write(path, &bytes).map_err(|e| ArtifactError::from_io(path, e))?;
        log::info!(
            "Wrote model artifact {} ({} bytes, sha256 {:x})",
            path.display(),
            bytes.len(),
            sha2::Sha256::digest(&bytes)
        );
        Ok(())
    }
}

/// Serializes the model and its architecture into a single artifact file.
pub fn save_classifier<B: Backend>(
    path: impl AsRef<Path>,
    config: &ClassifierConfig,
    model: Classifier<B>,
) -> Result<(), ArtifactError> {
    let path = path.as_ref();
    ModelArtifact::from_model(config.clone(), model)
        .map_err(|e| ArtifactError::corrupt(path, e))?
        .write(path)
}

/// Reads an artifact file and rebuilds the classifier on `device`.
pub fn load_classifier<B: Backend>(
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<(ClassifierConfig, Classifier<B>), ArtifactError> {
    let path = path.as_ref();
    ModelArtifact::read(path)?
        .into_model(device)
        .map_err(|e| ArtifactError::corrupt(path, e))
}
