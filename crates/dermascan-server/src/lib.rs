//! HTTP front end of dermascan.
//!
//! The [`http::router`] exposes `GET /` and `POST /api/predict`. Model artifacts are
//! loaded lazily through the [`cache::ModelCache`] on the first prediction, or up front
//! when the binary runs with `--eager-load`.
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod service;

pub use cache::{ArtifactLoader, FsArtifactLoader, LoadedModel, ModelCache};
pub use config::ServerConfig;
pub use error::ServeError;
pub use http::{AppState, SharedState, router};
pub use service::{ClassProbabilities, InferenceService, PredictionResult};
