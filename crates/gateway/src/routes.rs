use crate::config::GatewayConfig;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use detection::{DetectionBatch, Threshold};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    // Multipart framing on top of the image itself.
    let body_limit = state.max_upload_bytes.saturating_add(64 * 1024);

    Router::new()
        .route("/object/detect", get(detect_url))
        .route("/object/detect/:threshold", post(detect_upload))
        .route("/object/data", get(image_data))
        .route("/object/labels", get(labels))
        .route("/object/stream", get(stream))
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

pub async fn run_server(config: GatewayConfig, state: AppState) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    tracing::info!("HTTP server listening on {}", config.addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct DetectQuery {
    image: String,
}

async fn detect_url(
    State(state): State<AppState>,
    Query(query): Query<DetectQuery>,
) -> Json<DetectionBatch> {
    Json(state.service.detect_url(query.image).await)
}

async fn detect_upload(
    State(state): State<AppState>,
    Path(threshold): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<DetectionBatch>, ApiError> {
    let threshold: Threshold = threshold.parse().map_err(ApiError::BadRequest)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            upload = Some(bytes);
            break;
        }
    }

    let upload = upload.ok_or_else(|| {
        ApiError::BadRequest(format!("missing multipart field `{UPLOAD_FIELD}`"))
    })?;

    tracing::debug!(bytes = upload.len(), %threshold, "Upload received");
    Ok(Json(state.service.detect_bytes(upload.to_vec(), threshold).await))
}

#[derive(Deserialize)]
struct DataQuery {
    uuid: String,
}

async fn image_data(State(state): State<AppState>, Query(query): Query<DataQuery>) -> Response {
    match state.service.image_data(&query.uuid) {
        Some(payload) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            payload,
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn labels(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.service.label_names())
}

async fn stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut subscription = state.service.subscribe();
    tracing::info!(
        subscribers = state.service.subscriber_count(),
        "New stream subscriber connected"
    );

    // Watch the socket too, so a client that leaves while nothing is being
    // published releases its subscription right away.
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            published = subscription.recv() => {
                let Some(batch) = published else { break };
                let json = match serde_json::to_string(batch.as_ref()) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("JSON serialization error: {}", e);
                        continue;
                    }
                };

                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!("Stream subscriber disconnected");
}
