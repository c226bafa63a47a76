//! HTTP surface: messaging webhook, key-gated table read, health check.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use evcal_core::WebhookPayload;
use evcal_ingest::{build_pipeline, read_api, IngestConfig, IngestPipeline};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "evcal-web";
pub const SIGNATURE_HEADER: &str = "x-line-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub read_api_key: Option<String>,
    /// When set, webhook bodies must carry a valid signature.
    pub channel_secret: Option<String>,
}

impl AppState {
    pub fn new(pipeline: IngestPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            read_api_key: None,
            channel_secret: None,
        }
    }

    pub fn from_config(config: &IngestConfig) -> anyhow::Result<Self> {
        Ok(Self {
            pipeline: Arc::new(build_pipeline(config)?),
            read_api_key: config.read_api_key.clone(),
            channel_secret: config.line_channel_secret.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadQuery {
    key: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(read_handler).post(webhook_handler))
        .route("/webhook", post(webhook_handler))
        .route("/events", get(read_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(config: IngestConfig) -> anyhow::Result<()> {
    if config.read_api_key.is_none() {
        warn!("EVCAL_READ_API_KEY is not set; every read request will be refused");
    }
    let state = AppState::from_config(&config)?;
    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(IngestConfig::from_env()?).await
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.channel_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            warn!("webhook signature rejected");
            return webhook_error(StatusCode::UNAUTHORIZED, "invalid signature");
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "webhook body is not a valid payload");
            return webhook_error(StatusCode::BAD_REQUEST, format!("invalid payload: {err}"));
        }
    };

    let outcome = state.pipeline.handle_payload(&payload).await;
    Json(WebhookResponse {
        status: outcome.status().to_string(),
        message: outcome.error_message(),
    })
    .into_response()
}

async fn read_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let resp = read_api(
        state.pipeline.store().as_ref(),
        state.read_api_key.as_deref(),
        query.key.as_deref(),
    )
    .await;
    Json(resp).into_response()
}

async fn healthz_handler() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

fn webhook_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(WebhookResponse {
            status: "error".into(),
            message: Some(message.into()),
        }),
    )
        .into_response()
}

/// Checks a base64 HMAC-SHA256 of `body` keyed by the channel secret.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = BASE64.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
