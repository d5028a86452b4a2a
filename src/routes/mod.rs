//! HTTP routes for the ledger API
//!
//! Handlers take the already-buffered request pieces and return
//! `Result<Response>`; the server turns errors into JSON bodies.

pub mod admin;
pub mod exchange;
pub mod health;
pub mod sessions;
pub mod wallet;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::{LedgerError, Result};

pub use admin::audit_trail;
pub use exchange::{create_order, create_sale, mark_sale_paid, verify_payment};
pub use health::{health_check, readiness_check, version_info};
pub use sessions::{
    attach_meeting_link, get_session, list_sessions, mark_complete, mentor_reviews,
    request_session, respond_to_request, submit_review,
};
pub use wallet::{leaderboard, open_account, wallet_summary, wallet_transactions};

type FullBody = Full<Bytes>;

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// `{ "error": kind, "message": ... }` with the error's status
pub fn error_response(err: LedgerError) -> Response<FullBody> {
    let (status, body) = err.into_status_code_and_body();
    json_response(status, &body)
}

/// Decode a JSON request body
pub(crate) fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    if body.is_empty() {
        return Err(LedgerError::Validation("Request body is required".into()));
    }
    serde_json::from_slice(body)
        .map_err(|e| LedgerError::Validation(format!("Invalid request body: {}", e)))
}

/// Decode the query string, falling back to defaults when absent
pub(crate) fn parse_query<T: DeserializeOwned + Default>(query: Option<&str>) -> Result<T> {
    match query {
        None | Some("") => Ok(T::default()),
        Some(q) => serde_urlencoded::from_str(q)
            .map_err(|e| LedgerError::Validation(format!("Invalid query string: {}", e))),
    }
}

/// `?limit=` on list endpoints
#[derive(Debug, Default, Deserialize)]
pub(crate) struct LimitQuery {
    pub limit: Option<usize>,
}
