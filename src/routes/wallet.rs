//! Account and wallet endpoints
//!
//! - `POST /api/v1/accounts` - open the caller's account (idempotent)
//! - `GET /api/v1/wallet` - balance and totals
//! - `GET /api/v1/wallet/transactions?limit=` - history, newest first
//! - `GET /api/v1/leaderboard?limit=` - top mentors

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Deserialize;

use crate::routes::{json_response, parse_json, parse_query, LimitQuery};
use crate::server::AppState;
use crate::services::wallet::{DEFAULT_HISTORY_LIMIT, DEFAULT_LEADERBOARD_SIZE};
use crate::types::Result;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenAccountRequest {
    #[serde(default)]
    display_name: Option<String>,
}

pub async fn open_account(
    state: &AppState,
    actor: &str,
    body: &Bytes,
) -> Result<Response<Full<Bytes>>> {
    let request: OpenAccountRequest = if body.is_empty() {
        OpenAccountRequest::default()
    } else {
        parse_json(body)?
    };
    let display_name = request
        .display_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let account = state.ledger.open_account(actor, display_name).await?;
    Ok(json_response(StatusCode::OK, &account))
}

pub async fn wallet_summary(state: &AppState, actor: &str) -> Result<Response<Full<Bytes>>> {
    let summary = state.wallet.summary(actor).await?;
    Ok(json_response(StatusCode::OK, &summary))
}

pub async fn wallet_transactions(
    state: &AppState,
    actor: &str,
    query: Option<&str>,
) -> Result<Response<Full<Bytes>>> {
    let query: LimitQuery = parse_query(query)?;
    let history = state
        .wallet
        .history(actor, query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await?;
    Ok(json_response(StatusCode::OK, &history))
}

pub async fn leaderboard(state: &AppState, query: Option<&str>) -> Result<Response<Full<Bytes>>> {
    let query: LimitQuery = parse_query(query)?;
    let entries = state
        .wallet
        .leaderboard(query.limit.unwrap_or(DEFAULT_LEADERBOARD_SIZE))
        .await?;
    Ok(json_response(StatusCode::OK, &entries))
}
