//! Account document schema
//!
//! One account per user. Holds the coin balance, lifetime totals and the
//! denormalized mentor rating aggregate.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::schemas::LedgerDoc;
use crate::db::store::Collection;
use crate::types::{LedgerError, Result};

/// Account document stored in the ledger
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Account ID (same as the user ID issued by the identity provider)
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Spendable coins, never negative
    pub balance: i64,

    /// Coins earned by mentoring (and platform fees, for the platform account)
    #[serde(default)]
    pub total_earned: i64,

    /// Coins paid for sessions
    #[serde(default)]
    pub total_spent: i64,

    /// Coins bought through the exchange
    #[serde(default)]
    pub total_purchased: i64,

    /// Coins sold back through the exchange
    #[serde(default)]
    pub total_sold: i64,

    /// Platform account flag
    #[serde(default)]
    pub is_admin: bool,

    /// Mean of all received ratings (meaningless while `review_count == 0`)
    #[serde(default)]
    pub rating: f64,

    #[serde(default)]
    pub review_count: i64,

    /// Sum of all received ratings
    #[serde(default)]
    pub total_rating: i64,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create an empty user account
    pub fn new(id: &str, display_name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            display_name,
            balance: 0,
            total_earned: 0,
            total_spent: 0,
            total_purchased: 0,
            total_sold: 0,
            is_admin: false,
            rating: 0.0,
            review_count: 0,
            total_rating: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create the platform account that receives session fees
    pub fn platform(id: &str, now: DateTime<Utc>) -> Self {
        let mut account = Self::new(id, Some("Platform".to_string()), now);
        account.is_admin = true;
        account
    }

    /// Add coins to the balance
    pub fn credit(&mut self, amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(LedgerError::Internal(format!(
                "Credit amount must be positive, got {}",
                amount
            )));
        }
        self.balance = self.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::Internal(format!("Balance overflow on account {}", self.id))
        })?;
        Ok(())
    }

    /// Remove coins from the balance, refusing to go below zero
    pub fn debit(&mut self, amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(LedgerError::Internal(format!(
                "Debit amount must be positive, got {}",
                amount
            )));
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                account_id: self.id.clone(),
                required: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        Ok(())
    }

    /// Current rating aggregate
    pub fn aggregate(&self) -> RatingAggregate {
        RatingAggregate {
            rating: self.rating,
            review_count: self.review_count,
            total_rating: self.total_rating,
        }
    }

    pub fn set_aggregate(&mut self, aggregate: RatingAggregate) {
        self.rating = aggregate.rating;
        self.review_count = aggregate.review_count;
        self.total_rating = aggregate.total_rating;
    }
}

/// Running mean of a mentor's ratings
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingAggregate {
    pub rating: f64,
    pub review_count: i64,
    pub total_rating: i64,
}

impl RatingAggregate {
    /// Fold one more rating into the aggregate.
    ///
    /// Pure function of the stored aggregate, so it is safe to re-run when a
    /// unit of work is retried against fresher state.
    pub fn fold(self, rating: i32) -> Self {
        // Documents written before `totalRating` existed only carry the mean.
        let base_total = if self.total_rating == 0 && self.review_count > 0 {
            (self.rating * self.review_count as f64).round() as i64
        } else {
            self.total_rating
        };

        let review_count = self.review_count + 1;
        let total_rating = base_total + i64::from(rating);

        Self {
            rating: total_rating as f64 / review_count as f64,
            review_count,
            total_rating,
        }
    }

    /// Unrated mentors report no rating at all rather than zero
    pub fn rating(&self) -> Option<f64> {
        (self.review_count > 0).then_some(self.rating)
    }
}

impl LedgerDoc for Account {
    const COLLECTION: Collection = Collection::Accounts;

    fn doc_id(&self) -> &str {
        &self.id
    }

    fn indexes() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Leaderboard ordering
            (
                doc! { "isAdmin": 1, "rating": -1 },
                Some(
                    IndexOptions::builder()
                        .name("leaderboard_index".to_string())
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
    fn test_debit_refuses_negative_balance() {
        let mut account = Account::new("u1", None, Utc::now());
        account.credit(5).unwrap();

        let err = account.debit(6).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds { required: 6, available: 5, .. }
        ));
        assert_eq!(account.balance, 5);

        account.debit(5).unwrap();
        assert_eq!(account.balance, 0);
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let mut account = Account::new("u1", None, Utc::now());
        assert!(account.credit(0).is_err());
        assert!(account.debit(-3).is_err());
        assert_eq!(account.balance, 0);
    }

    #[test]
    fn test_fold_matches_incremental_formula() {
        let prior = RatingAggregate {
            rating: 4.0,
            review_count: 2,
            total_rating: 8,
        };
        let next = prior.fold(3);
        assert_eq!(next.review_count, 3);
        assert!((next.rating - 11.0 / 3.0).abs() < 1e-9);
        assert_eq!(next.total_rating, 11);
    }

    #[test]
    fn test_fold_recovers_total_from_legacy_mean() {
        let legacy = RatingAggregate {
            rating: 4.5,
            review_count: 2,
            total_rating: 0,
        };
        let next = legacy.fold(3);
        assert_eq!(next.total_rating, 12);
        assert!((next.rating - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_unrated_has_no_rating() {
        assert_eq!(RatingAggregate::default().rating(), None);
        assert_eq!(RatingAggregate::default().fold(5).rating(), Some(5.0));
    }

    #[test]
    fn test_bson_round_trip_keeps_camel_case_fields() {
        let account = Account::platform("platform", Utc::now());
        let doc = bson::to_document(&account).unwrap();
        assert_eq!(doc.get_str("_id").unwrap(), "platform");
        assert!(doc.get_bool("isAdmin").unwrap());
        assert!(doc.contains_key("reviewCount"));

        let back: Account = bson::from_document(doc).unwrap();
        assert_eq!(back.id, "platform");
        assert!(back.is_admin);
    }
}
