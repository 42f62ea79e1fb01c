use crate::chart::{self, ChartRow};
use crate::classifier::ModelCache;
use crate::error::{Error, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const UPLOAD_LIMIT: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    cache: Arc<ModelCache>,
    device_name: String,
}

impl AppState {
    pub fn new(cache: ModelCache, device_name: String) -> Self {
        Self {
            cache: Arc::new(cache),
            device_name,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub device: String,
    pub model_loaded: bool,
}

#[derive(Serialize)]
pub struct ClassifyResponse {
    pub model: String,
    pub predictions: Vec<ChartRow>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Error::ModelNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Error::DownloadFailed(_) | Error::SizeMismatch { .. } => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            Error::ModelLoadFailed(_) | Error::ClassificationError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        model: state.cache.model_name().to_string(),
        device: state.device_name.clone(),
        model_loaded: state.cache.loaded(),
    }))
}

async fn classify_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ClassifyResponse>> {
    let mut image_bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidInput(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("image") {
            continue;
        }

        match field.content_type() {
            Some("image/png") | Some("image/jpeg") => {}
            other => {
                return Err(Error::InvalidInput(format!(
                    "Unsupported content type: {} (only image/png and image/jpeg are accepted)",
                    other.unwrap_or("none")
                )))
            }
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidInput(format!("Failed to read upload: {}", e)))?;
        image_bytes = Some(data);
        break;
    }

    let image_bytes =
        image_bytes.ok_or_else(|| Error::InvalidInput("Missing 'image' field".to_string()))?;

    // First request triggers the artifact fetch and model load.
    let classifier = state.cache.get().await?;
    let confidences = classifier.predict(&image_bytes)?;
    let predictions = chart::top_rows(classifier.labels(), &confidences, chart::TOP_K);

    Ok(Json(ClassifyResponse {
        model: state.cache.model_name().to_string(),
        predictions,
    }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/health", get(health_handler))
        .route("/api/classify", post(classify_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .with_state(state)
}

pub async fn serve(host: &str, port: u16, state: AppState) -> Result<()> {
    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}
