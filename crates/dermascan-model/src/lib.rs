//! Shared model-side pieces of dermascan.
//!
//! Both the server and the training program depend on this crate so that the
//! architecture, the weights artifact format, the label map and the image
//! preprocessing can never drift apart between training time and serving time.
pub mod artifact;
pub mod classifier;
pub mod error;
pub mod host;
pub mod labels;
pub mod model;
pub mod preprocess;

pub use artifact::{ModelArtifact, load_classifier, save_classifier};
pub use classifier::{BurnClassifier, ImageClassifier, ImageTensor};
pub use error::{ArtifactError, ClassifierError, PreprocessError};
pub use labels::LabelMap;
pub use model::{
    Backbone, BackboneConfig, Classifier, ClassifierConfig, ClassifierHead, ConvBlock,
};
pub use preprocess::{INPUT_SIZE, preprocess};
