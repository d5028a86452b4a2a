//! Health check endpoints
//!
//! Provides Kubernetes-style health probes:
//! - /health, /healthz - Liveness probe (is the service running?)
//! - /ready, /readyz - Readiness probe (can the document store be reached?)

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::routes::json_response;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    pub node_id: String,
    /// "development" or "production"
    pub mode: &'static str,
    pub platform_account_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness: always 200 while the process serves requests
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let body = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        node_id: state.args.node_id.to_string(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        platform_account_id: state.ledger.platform_account_id().to_string(),
    };
    json_response(StatusCode::OK, &body)
}

/// Readiness: 200 only when the store answers a ping
pub async fn readiness_check(state: &AppState) -> Response<Full<Bytes>> {
    match state.ledger.store().ping().await {
        Ok(()) => json_response(
            StatusCode::OK,
            &ReadinessResponse {
                ready: true,
                error: None,
            },
        ),
        Err(err) => {
            warn!(error = %err, "Readiness check failed");
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &ReadinessResponse {
                    ready: false,
                    error: Some("Document store unavailable".into()),
                },
            )
        }
    }
}

pub fn version_info() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}
