//! Review document schema

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::schemas::LedgerDoc;
use crate::db::store::Collection;

/// Mentee feedback on a completed session. Immutable once written.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(rename = "_id")]
    pub id: String,

    pub session_id: String,

    pub mentor_id: String,

    pub mentee_id: String,

    /// 1 to 5 stars
    pub rating: i32,

    pub text: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Review {
    /// Review IDs derive from the session, so a session can only ever hold one
    pub fn id_for_session(session_id: &str) -> String {
        format!("review-{}", session_id)
    }
}

impl LedgerDoc for Review {
    const COLLECTION: Collection = Collection::Reviews;

    fn doc_id(&self) -> &str {
        &self.id
    }

    fn indexes() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "sessionId": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("session_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "mentorId": 1, "createdAt": -1 },
                Some(
                    IndexOptions::builder()
                        .name("mentor_reviews_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}
