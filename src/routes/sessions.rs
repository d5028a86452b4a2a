//! Session endpoints
//!
//! ## Endpoints
//!
//! - `POST /api/v1/sessions` - mentee requests a session
//! - `GET /api/v1/sessions` - sessions the caller takes part in
//! - `GET /api/v1/sessions/{id}` - one session (participants only)
//! - `POST /api/v1/sessions/{id}/respond` - mentor accepts or rejects
//! - `POST /api/v1/sessions/{id}/link` - mentor attaches the meeting link
//! - `POST /api/v1/sessions/{id}/complete` - participant marks completion
//! - `POST /api/v1/sessions/{id}/review` - mentee reviews a completed session
//! - `GET /api/v1/mentors/{id}/reviews` - a mentor's reviews (public)

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::routes::{json_response, parse_json, parse_query, LimitQuery};
use crate::server::AppState;
use crate::services::wallet::{DEFAULT_HISTORY_LIMIT, MAX_PAGE_SIZE};
use crate::services::{Decision, ReviewSubmission, SessionRequest};
use crate::types::{LedgerError, Result};

/// Epoch milliseconds or an RFC 3339 string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Millis(i64),
    Rfc3339(DateTime<Utc>),
}

impl Timestamp {
    fn into_datetime(self) -> Result<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| LedgerError::Validation("scheduledAt is out of range".into())),
            Self::Rfc3339(dt) => Ok(dt),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    mentor_id: String,
    skill: String,
    scheduled_at: Timestamp,
    duration_hours: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondRequest {
    decision: Decision,
    #[serde(default)]
    meeting_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeetingLinkRequest {
    meeting_link: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewRequest {
    mentor_id: String,
    rating: i32,
    text: String,
}

pub async fn request_session(
    state: &AppState,
    actor: &str,
    body: &Bytes,
) -> Result<Response<Full<Bytes>>> {
    let request: CreateSessionRequest = parse_json(body)?;
    let session = state
        .settlement
        .request_session(SessionRequest {
            mentee_id: actor.to_string(),
            mentor_id: request.mentor_id,
            skill: request.skill,
            scheduled_at: request.scheduled_at.into_datetime()?,
            duration_hours: request.duration_hours,
        })
        .await?;
    Ok(json_response(StatusCode::CREATED, &session))
}

pub async fn list_sessions(state: &AppState, actor: &str) -> Result<Response<Full<Bytes>>> {
    let sessions = state.wallet.sessions_for(actor).await?;
    Ok(json_response(StatusCode::OK, &sessions))
}

pub async fn get_session(
    state: &AppState,
    actor: &str,
    session_id: &str,
) -> Result<Response<Full<Bytes>>> {
    let session = state.wallet.session(session_id, actor).await?;
    Ok(json_response(StatusCode::OK, &session))
}

pub async fn respond_to_request(
    state: &AppState,
    actor: &str,
    session_id: &str,
    body: &Bytes,
) -> Result<Response<Full<Bytes>>> {
    let request: RespondRequest = parse_json(body)?;
    let session = state
        .settlement
        .respond(session_id, actor, request.decision, request.meeting_link)
        .await?;
    Ok(json_response(StatusCode::OK, &session))
}

pub async fn attach_meeting_link(
    state: &AppState,
    actor: &str,
    session_id: &str,
    body: &Bytes,
) -> Result<Response<Full<Bytes>>> {
    let request: MeetingLinkRequest = parse_json(body)?;
    let session = state
        .settlement
        .attach_meeting_link(session_id, actor, &request.meeting_link)
        .await?;
    Ok(json_response(StatusCode::OK, &session))
}

/// A repeated mark is answered with 200 and the current session rather
/// than an error body.
pub async fn mark_complete(
    state: &AppState,
    actor: &str,
    session_id: &str,
) -> Result<Response<Full<Bytes>>> {
    match state.settlement.mark_complete(session_id, actor).await {
        Ok(outcome) => {
            let mut body = serde_json::to_value(&outcome)?;
            if let Some(obj) = body.as_object_mut() {
                obj.insert("alreadyMarked".into(), serde_json::Value::Bool(false));
            }
            Ok(json_response(StatusCode::OK, &body))
        }
        Err(LedgerError::AlreadyMarked(reason)) => {
            debug!(session_id, actor, "{}", reason);
            let session = state.wallet.session(session_id, actor).await?;
            Ok(json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "alreadyMarked": true,
                    "session": session,
                }),
            ))
        }
        Err(err) => Err(err),
    }
}

pub async fn submit_review(
    state: &AppState,
    actor: &str,
    session_id: &str,
    body: &Bytes,
) -> Result<Response<Full<Bytes>>> {
    let request: ReviewRequest = parse_json(body)?;
    let (review, mentor) = state
        .reviews
        .submit_review(ReviewSubmission {
            session_id: session_id.to_string(),
            mentee_id: actor.to_string(),
            mentor_id: request.mentor_id,
            rating: request.rating,
            text: request.text,
        })
        .await?;

    let aggregate = mentor.aggregate();
    Ok(json_response(
        StatusCode::CREATED,
        &serde_json::json!({
            "review": review,
            "mentor": {
                "accountId": mentor.id,
                "rating": aggregate.rating(),
                "reviewCount": aggregate.review_count,
            },
        }),
    ))
}

pub async fn mentor_reviews(
    state: &AppState,
    mentor_id: &str,
    query: Option<&str>,
) -> Result<Response<Full<Bytes>>> {
    let query: LimitQuery = parse_query(query)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_PAGE_SIZE);
    let reviews = state.reviews.reviews_for_mentor(mentor_id, limit).await?;
    Ok(json_response(StatusCode::OK, &reviews))
}
