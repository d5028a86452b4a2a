//! Transaction record schema
//!
//! Append-only log of every coin movement. Records are only ever created
//! through `LedgerTx::append_transaction`, never updated or deleted.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::schemas::LedgerDoc;
use crate::db::store::Collection;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

/// What caused a coin movement
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Mentee pays for a completed session
    SessionPayment,
    /// Mentor's share of a completed session
    SessionEarning,
    /// Platform's share of a completed session
    PlatformFee,
    /// Coins bought with fiat
    Purchase,
    /// Coins sold back for fiat
    Sale,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    #[serde(rename = "_id")]
    pub id: String,

    pub account_id: String,

    pub direction: Direction,

    pub kind: EntryKind,

    /// Always positive; the sign lives in `direction`
    pub amount: i64,

    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_order_ref: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    fn new(
        account_id: &str,
        direction: Direction,
        kind: EntryKind,
        amount: i64,
        description: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            direction,
            kind,
            amount,
            description,
            related_session_id: None,
            related_order_ref: None,
            timestamp,
        }
    }

    pub fn credit(
        account_id: &str,
        kind: EntryKind,
        amount: i64,
        description: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(account_id, Direction::Credit, kind, amount, description, timestamp)
    }

    pub fn debit(
        account_id: &str,
        kind: EntryKind,
        amount: i64,
        description: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(account_id, Direction::Debit, kind, amount, description, timestamp)
    }

    pub fn for_session(mut self, session_id: &str) -> Self {
        self.related_session_id = Some(session_id.to_string());
        self
    }

    pub fn for_order(mut self, order_ref: &str) -> Self {
        self.related_order_ref = Some(order_ref.to_string());
        self
    }

    /// Effect on the account balance
    pub fn signed_amount(&self) -> i64 {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

impl LedgerDoc for TransactionRecord {
    const COLLECTION: Collection = Collection::Transactions;

    fn doc_id(&self) -> &str {
        &self.id
    }

    fn indexes() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Wallet history
            (
                doc! { "accountId": 1, "timestamp": -1 },
                Some(
                    IndexOptions::builder()
                        .name("account_history_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "relatedSessionId": 1 },
                Some(
                    IndexOptions::builder()
                        .name("related_session_index".to_string())
                        .sparse(true)
                        .build(),
                ),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_amount_and_links() {
        let now = Utc::now();
        let debit = TransactionRecord::debit("u1", EntryKind::SessionPayment, 10, "x".into(), now)
            .for_session("s1");
        assert_eq!(debit.signed_amount(), -10);
        assert_eq!(debit.related_session_id.as_deref(), Some("s1"));

        let credit = TransactionRecord::credit("u1", EntryKind::Purchase, 25, "y".into(), now)
            .for_order("order_1");
        assert_eq!(credit.signed_amount(), 25);
        assert_ne!(debit.id, credit.id);

        let doc = bson::to_document(&credit).unwrap();
        assert_eq!(doc.get_str("kind").unwrap(), "purchase");
        assert_eq!(doc.get_str("direction").unwrap(), "credit");
        assert!(doc.get("relatedSessionId").is_none());
    }
}
