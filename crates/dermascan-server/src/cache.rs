use std::path::PathBuf;
use std::sync::Arc;

use burn::backend::NdArray;
use burn::backend::ndarray::NdArrayDevice;
use dermascan_model::{BurnClassifier, ImageClassifier, LabelMap, load_classifier};
use derive_new::new;
use once_cell::sync::OnceCell;

use crate::error::ServeError;

type ServingBackend = NdArray;

/// Everything a request needs once the model is warm.
pub struct LoadedModel {
    pub classifier: Box<dyn ImageClassifier>,
    pub labels: LabelMap,
}

/// Source of the classifier and its label map.
pub trait ArtifactLoader: Send + Sync + 'static {
    fn load(&self) -> Result<LoadedModel, ServeError>;
}

/// Loads the artifacts written by `dermascan-train` from the filesystem onto the CPU backend.
#[derive(new, Debug, Clone)]
pub struct FsArtifactLoader {
    model_path: PathBuf,
    labels_path: PathBuf,
}

impl ArtifactLoader for FsArtifactLoader {
    fn load(&self) -> Result<LoadedModel, ServeError> {
        let labels = LabelMap::load(&self.labels_path)?;

        let device = NdArrayDevice::default();
        let (config, model) = load_classifier::<ServingBackend>(&self.model_path, &device)?;
        let classifier = BurnClassifier::new(model, device, config.num_classes)
            .map_err(|e| ServeError::Internal(format!("Failed to start model host: {e}")))?;

        Ok(LoadedModel {
            classifier: Box::new(classifier),
            labels,
        })
    }
}

/// Process-wide model handle, loaded at most once.
///
/// The first successful [`ensure_loaded`](Self::ensure_loaded) stores the model; concurrent
/// callers wait for that load instead of starting their own. A failed load is not remembered,
/// so a later request retries once the artifacts are in place.
pub struct ModelCache {
    loader: Box<dyn ArtifactLoader>,
    model: OnceCell<Arc<LoadedModel>>,
}

impl ModelCache {
    pub fn new(loader: impl ArtifactLoader) -> Self {
        Self {
            loader: Box::new(loader),
            model: OnceCell::new(),
        }
    }

    pub fn ensure_loaded(&self) -> Result<Arc<LoadedModel>, ServeError> {
        self.model
            .get_or_try_init(|| {
                tracing::info!("Loading model artifacts");
                let model = self.loader.load()?;
                if model.classifier.num_classes() != model.labels.len() {
                    return Err(ServeError::ArtifactCorrupt(format!(
                        "Classifier produces {} classes but the label map has {}",
                        model.classifier.num_classes(),
                        model.labels.len()
                    )));
                }
                tracing::info!(
                    "Model loaded with {} classes: {:?}",
                    model.labels.len(),
                    model.labels.names()
                );
                Ok(Arc::new(model))
            })
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }
}
