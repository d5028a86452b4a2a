//! Authentication for the ledger API
//!
//! Provides:
//! - JWT token generation and validation
//! - Actor resolution for incoming requests

pub mod jwt;

use hyper::HeaderMap;

pub use jwt::{extract_token_from_header, Claims, JwtValidator};

use crate::types::{LedgerError, Result};

/// Header accepted as the actor id in dev mode
pub const DEV_ACTOR_HEADER: &str = "x-actor-id";

/// Determine which account a request acts as.
///
/// A bearer token always wins. In dev mode a bare `X-Actor-Id` header is
/// accepted when no token is sent.
pub fn resolve_actor(headers: &HeaderMap, jwt: &JwtValidator, dev_mode: bool) -> Result<String> {
    let auth_header = headers
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if let Some(token) = extract_token_from_header(auth_header) {
        return jwt.verify_token(token).map(|claims| claims.sub);
    }

    if dev_mode {
        if let Some(actor) = headers
            .get(DEV_ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return Ok(actor.to_string());
        }
    }

    Err(LedgerError::Unauthorized("Missing bearer token".into()))
}
