//! HTTP server exposing the detect + segment pipeline.

use crate::config::ServerConfig;
use crate::engine::{DetSegEngine, ErrorResponse, SegmentImageRequest, SharedEngine};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use detseg::core::errors::DetSegError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
struct AppState {
    engine: SharedEngine,
    assets_dir: PathBuf,
    outputs_dir: PathBuf,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Deserialize)]
struct ImageQuery {
    path: String,
}

/// Run the HTTP server.
pub async fn run_server(
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Initializing detect+segment engine...");
    let engine = DetSegEngine::new(&config.pipeline, &config.chat)?;
    let engine = Arc::new(engine);
    info!("Engine initialized successfully");

    std::fs::create_dir_all(&config.outputs_dir)?;

    let state = Arc::new(AppState {
        engine,
        assets_dir: config.assets_dir.clone(),
        outputs_dir: config.outputs_dir.clone(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/images_list", get(images_list_handler))
        .route("/image", get(image_handler))
        .route("/segment_image", post(segment_image_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    info!("Server listening on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /health        - Health check");
    info!("  GET  /images_list   - List available images");
    info!("  GET  /image         - Fetch an image by path");
    info!("  POST /segment_image - Detect + segment an uploaded image");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Lists image files under the configured assets directory.
async fn images_list_handler(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(collect_images(&state.assets_dir))
}

/// Serves an image by path, restricted to the assets and outputs
/// directories.
async fn image_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImageQuery>,
) -> impl IntoResponse {
    let path = PathBuf::from(&query.path);
    if !is_within(&path, &state.assets_dir) && !is_within(&path, &state.outputs_dir) {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Image not found".to_string(),
            }),
        )
            .into_response();
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = match path.extension().and_then(|ext| ext.to_str()) {
                Some("png") => "image/png",
                Some("jpg") | Some("jpeg") => "image/jpeg",
                _ => "application/octet-stream",
            };
            ([(header::CONTENT_TYPE, mime)], bytes).into_response()
        }
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Image not found".to_string(),
            }),
        )
            .into_response(),
    }
}

/// Detect + segment endpoint.
async fn segment_image_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SegmentImageRequest>,
) -> impl IntoResponse {
    let request_id = uuid::Uuid::new_v4();
    let run_dir = state.outputs_dir.join(request_id.to_string());
    info!(request_id = %request_id, classes = ?request.classes, "Processing segment request");

    let start = Instant::now();
    match state.engine.process(request, &run_dir).await {
        Ok(response) => {
            info!(
                request_id = %request_id,
                detections = response.detect_segment.detections.len(),
                total_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Segment request complete"
            );
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => {
            error!(request_id = %request_id, error = %err, "Segment request failed");
            let status = status_for_error(&err);
            (
                status,
                Json(ErrorResponse {
                    error: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Maps pipeline errors onto HTTP status codes.
fn status_for_error(err: &DetSegError) -> StatusCode {
    match err {
        DetSegError::Validation { .. } => StatusCode::BAD_REQUEST,
        DetSegError::ModelUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        DetSegError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        DetSegError::Stage { source, .. } => status_for_error(source),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Recursively collects jpg/jpeg/png paths under `dir`.
fn collect_images(dir: &Path) -> Vec<String> {
    let mut images = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("jpg") | Some("jpeg") | Some("png")
            ) {
                images.push(path.display().to_string());
            }
        }
    }
    images.sort();
    images
}

/// Returns true when `path` resolves inside `root`.
fn is_within(path: &Path, root: &Path) -> bool {
    let Ok(canonical) = path.canonicalize() else {
        return false;
    };
    let Ok(root) = root.canonicalize() else {
        return false;
    };
    canonical.starts_with(root)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for_error(&DetSegError::validation("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for_error(&DetSegError::model_unavailable("owlvit", "gone")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for_error(
                &DetSegError::validation("bad")
                    .at_stage(detseg::core::errors::PipelineStage::Detect)
            ),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_collect_images_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.jpg"), b"x").unwrap();

        let images = collect_images(dir.path());
        assert_eq!(images.len(), 2);
        assert!(images.iter().all(|p| p.ends_with(".png") || p.ends_with(".jpg")));
    }

    #[test]
    fn test_is_within_rejects_outside_paths() {
        let dir = tempfile::tempdir().unwrap();
        let inside = dir.path().join("img.png");
        std::fs::write(&inside, b"x").unwrap();
        assert!(is_within(&inside, dir.path()));
        assert!(!is_within(Path::new("/etc/hostname"), dir.path()));
    }
}
