use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use derive_more::Deref;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{ArtifactLoader, ModelCache};
use crate::error::ServeError;
use crate::service::{InferenceService, PredictionResult};

/// Multipart field carrying the uploaded image.
pub const FILE_FIELD: &str = "file";

/// Application-lifetime context shared by every request.
pub struct AppState {
    pub app_name: String,
    pub service: InferenceService,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(app_name: impl Into<String>, loader: impl ArtifactLoader) -> Self {
        Self {
            app_name: app_name.into(),
            service: InferenceService::new(Arc::new(ModelCache::new(loader))),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

#[derive(Clone, Deref)]
pub struct SharedState(Arc<AppState>);

impl From<AppState> for SharedState {
    fn from(state: AppState) -> Self {
        Self(Arc::new(state))
    }
}

pub fn router(state: impl Into<SharedState>) -> Router {
    let state = state.into();
    Router::new()
        .route("/", get(status))
        .route("/api/predict", post(predict))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "status": format!("{} running", state.app_name) }))
}

struct Upload {
    file_name: Option<String>,
    content_type: String,
    bytes: Vec<u8>,
}

/// Pulls the `file` field out of the form, rejecting it before reading the body when its
/// declared content type is not an image.
async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ServeError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let content_type = match field.content_type() {
            Some(content_type) if content_type.starts_with("image/") => content_type.to_string(),
            _ => return Err(ServeError::InvalidMediaType),
        };
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await?.to_vec();

        return Ok(Upload {
            file_name,
            content_type,
            bytes,
        });
    }
    Err(ServeError::MissingFile)
}

async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, ServeError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("predict", %request_id);

    async move {
        let mut multipart = multipart?;
        let upload = read_upload(&mut multipart).await?;
        tracing::debug!(
            file_name = upload.file_name.as_deref().unwrap_or("<unnamed>"),
            content_type = %upload.content_type,
            size = upload.bytes.len(),
            "Received upload"
        );

        let service = state.service.clone();
        let span = tracing::Span::current();
        let result = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            service.infer(&upload.bytes)
        })
        .await
        .map_err(|e| ServeError::Internal(format!("Inference task failed: {e}")))??;

        tracing::info!(
            predicted_class = %result.predicted_class,
            confidence = result.confidence,
            "Prediction complete"
        );
        Ok(Json(result))
    }
    .instrument(span)
    .await
}
