//! Coin exchange document schemas
//!
//! Payment intents track a purchase from order creation to confirmation.
//! Sale requests track coins handed back for an off-system payout.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::schemas::LedgerDoc;
use crate::db::store::Collection;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

/// Purchase intent, keyed by the gateway's order reference
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    /// Gateway order reference
    #[serde(rename = "_id")]
    pub id: String,

    pub user_id: String,

    pub coins: i64,

    /// Price in major fiat units
    pub fiat_amount: i64,

    pub currency: String,

    pub status: PaymentStatus,

    /// Gateway payment reference, set on confirmation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_ref: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

impl LedgerDoc for PaymentIntent {
    const COLLECTION: Collection = Collection::PaymentIntents;

    fn doc_id(&self) -> &str {
        &self.id
    }

    fn indexes() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "userId": 1, "createdAt": -1 },
            Some(
                IndexOptions::builder()
                    .name("user_payments_index".to_string())
                    .build(),
            ),
        )]
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Coins debited, payout outstanding
    Requested,
    /// Payout sent by an operator
    PaidOut,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaleRequest {
    #[serde(rename = "_id")]
    pub id: String,

    pub user_id: String,

    pub coins: i64,

    /// Payout owed in major fiat units
    pub fiat_amount: i64,

    pub status: SaleStatus,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub paid_out_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_out_by: Option<String>,
}

impl LedgerDoc for SaleRequest {
    const COLLECTION: Collection = Collection::SaleRequests;

    fn doc_id(&self) -> &str {
        &self.id
    }

    fn indexes() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "status": 1, "createdAt": 1 },
            Some(
                IndexOptions::builder()
                    .name("payout_queue_index".to_string())
                    .build(),
            ),
        )]
    }
}
