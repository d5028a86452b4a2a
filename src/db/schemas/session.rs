//! Session document schema
//!
//! A booked mentoring session and its completion flags.

use std::fmt;

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::schemas::LedgerDoc;
use crate::db::store::Collection;

/// Session lifecycle state
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Requested by the mentee, waiting for the mentor
    Pending,
    /// Accepted by the mentor
    Accepted,
    /// Declined by the mentor (terminal)
    Rejected,
    /// Both parties confirmed and coins were settled (terminal)
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a session an actor is on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Mentee,
    Mentor,
}

/// Session document stored in the ledger
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(rename = "_id")]
    pub id: String,

    pub mentee_id: String,

    pub mentor_id: String,

    pub skill: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub scheduled_at: DateTime<Utc>,

    pub duration_hours: i64,

    /// Price in coins, fixed at request time
    pub cost_coins: i64,

    pub status: SessionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_link: Option<String>,

    #[serde(default)]
    pub mentor_completed: bool,

    #[serde(default)]
    pub mentee_completed: bool,

    #[serde(default)]
    pub feedback_submitted: bool,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Which role `actor_id` plays in this session, if any
    pub fn role_of(&self, actor_id: &str) -> Option<Role> {
        if actor_id == self.mentee_id {
            Some(Role::Mentee)
        } else if actor_id == self.mentor_id {
            Some(Role::Mentor)
        } else {
            None
        }
    }

    pub fn is_participant(&self, actor_id: &str) -> bool {
        self.role_of(actor_id).is_some()
    }

    pub fn has_marked(&self, role: Role) -> bool {
        match role {
            Role::Mentee => self.mentee_completed,
            Role::Mentor => self.mentor_completed,
        }
    }

    /// Set one side's completion flag. Flags are never cleared.
    pub fn mark(&mut self, role: Role) {
        match role {
            Role::Mentee => self.mentee_completed = true,
            Role::Mentor => self.mentor_completed = true,
        }
    }

    pub fn both_marked(&self) -> bool {
        self.mentee_completed && self.mentor_completed
    }
}

impl LedgerDoc for Session {
    const COLLECTION: Collection = Collection::Sessions;

    fn doc_id(&self) -> &str {
        &self.id
    }

    fn indexes() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "menteeId": 1, "scheduledAt": -1 },
                Some(
                    IndexOptions::builder()
                        .name("mentee_sessions_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "mentorId": 1, "scheduledAt": -1 },
                Some(
                    IndexOptions::builder()
                        .name("mentor_sessions_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}
