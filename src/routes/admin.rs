//! Admin endpoints
//!
//! - `GET /api/v1/admin/audit?limit=` - recent ledger events, newest first

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

use crate::routes::{json_response, parse_query, LimitQuery};
use crate::server::AppState;
use crate::services::wallet::{DEFAULT_HISTORY_LIMIT, MAX_PAGE_SIZE};
use crate::types::{LedgerError, Result};

pub async fn audit_trail(
    state: &AppState,
    actor: &str,
    query: Option<&str>,
) -> Result<Response<Full<Bytes>>> {
    let query: LimitQuery = parse_query(query)?;
    let account = state.ledger.read_account(actor).await?;
    if !account.is_admin {
        return Err(LedgerError::Permission(
            "Only admins can read the audit trail".into(),
        ));
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_PAGE_SIZE);
    let mut events = state.audit.recent().await;
    events.reverse();
    events.truncate(limit);
    Ok(json_response(StatusCode::OK, &events))
}
