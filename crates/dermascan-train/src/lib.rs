pub mod augment;
pub mod batch;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod training;

pub use config::{AugmentationConfig, PhaseConfig, TrainingConfig};
pub use dataset::{DataSplits, ImageFolder, ImageItem};
pub use error::TrainError;
pub use training::{
    LABELS_FILE, MODEL_FILE, Metrics, PhaseKind, PhaseSummary, TrainingPaths, TrainingReport,
    evaluate, train,
};
