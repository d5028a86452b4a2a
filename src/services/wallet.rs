//! Wallet read side
//!
//! Balances, history and rankings. Every call reads the store fresh; nothing
//! here is cached and nothing here writes.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::schemas::{Account, Session, TransactionRecord};
use crate::db::store::{Collection, Query, SortOrder};
use crate::ledger::Ledger;
use crate::services::pricing::MIN_RETAINED_BALANCE;
use crate::types::{LedgerError, Result};

pub const DEFAULT_LEADERBOARD_SIZE: usize = 10;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSummary {
    pub account_id: String,
    pub display_name: Option<String>,
    pub balance: i64,
    pub total_earned: i64,
    pub total_spent: i64,
    pub total_purchased: i64,
    pub total_sold: i64,
    /// Coins that can be sold without dropping below the retained minimum
    pub available_to_sell: i64,
    /// `None` while unrated
    pub rating: Option<f64>,
    pub review_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub account_id: String,
    pub display_name: Option<String>,
    pub rating: Option<f64>,
    pub review_count: i64,
}

fn decode<T: DeserializeOwned>(docs: Vec<bson::Document>) -> Result<Vec<T>> {
    docs.into_iter()
        .map(|doc| bson::from_document(doc).map_err(LedgerError::from))
        .collect()
}

/// Rated accounts by rating, then review count; unrated ones last
fn leaderboard_order(a: &Account, b: &Account) -> Ordering {
    match (a.aggregate().rating(), b.aggregate().rating()) {
        (Some(x), Some(y)) => y
            .partial_cmp(&x)
            .unwrap_or(Ordering::Equal)
            .then(b.review_count.cmp(&a.review_count))
            .then(a.id.cmp(&b.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    }
}

#[derive(Clone)]
pub struct WalletQueryService {
    ledger: Ledger,
}

impl WalletQueryService {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub async fn summary(&self, user_id: &str) -> Result<WalletSummary> {
        let account = self.ledger.read_account(user_id).await?;
        let aggregate = account.aggregate();
        Ok(WalletSummary {
            available_to_sell: (account.balance - MIN_RETAINED_BALANCE).max(0),
            rating: aggregate.rating(),
            review_count: aggregate.review_count,
            account_id: account.id,
            display_name: account.display_name,
            balance: account.balance,
            total_earned: account.total_earned,
            total_spent: account.total_spent,
            total_purchased: account.total_purchased,
            total_sold: account.total_sold,
        })
    }

    /// Account's transactions, newest first
    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<TransactionRecord>> {
        let query = Query::new()
            .where_eq("accountId", user_id)
            .sort_by("timestamp", SortOrder::Descending)
            .limit(limit.clamp(1, MAX_PAGE_SIZE));
        decode(self.ledger.store().find(Collection::Transactions, query).await?)
    }

    /// Top mentors. Platform accounts never appear.
    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let query = Query::new()
            .where_eq("isAdmin", false)
            .sort_by("rating", SortOrder::Descending);
        let mut accounts: Vec<Account> =
            decode(self.ledger.store().find(Collection::Accounts, query).await?)?;

        accounts.sort_by(leaderboard_order);
        accounts.truncate(limit.clamp(1, MAX_PAGE_SIZE));

        Ok(accounts
            .into_iter()
            .enumerate()
            .map(|(i, account)| LeaderboardEntry {
                rank: i + 1,
                rating: account.aggregate().rating(),
                review_count: account.review_count,
                account_id: account.id,
                display_name: account.display_name,
            })
            .collect())
    }

    /// Sessions the user takes part in, newest scheduled first
    pub async fn sessions_for(&self, user_id: &str) -> Result<Vec<Session>> {
        let store = self.ledger.store();
        let as_mentee = store
            .find(Collection::Sessions, Query::new().where_eq("menteeId", user_id))
            .await?;
        let as_mentor = store
            .find(Collection::Sessions, Query::new().where_eq("mentorId", user_id))
            .await?;

        let mut by_id: BTreeMap<String, Session> = BTreeMap::new();
        for session in decode::<Session>(as_mentee)?
            .into_iter()
            .chain(decode::<Session>(as_mentor)?)
        {
            by_id.insert(session.id.clone(), session);
        }

        let mut sessions: Vec<Session> = by_id.into_values().collect();
        sessions.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(sessions)
    }

    /// One session, visible to its participants only
    pub async fn session(&self, session_id: &str, viewer_id: &str) -> Result<Session> {
        let found = self
            .ledger
            .store()
            .get(Collection::Sessions, session_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Session '{}' not found", session_id)))?;
        let session: Session = bson::from_document(found.doc)?;
        if !session.is_participant(viewer_id) {
            return Err(LedgerError::Permission(
                "Only participants can view this session".into(),
            ));
        }
        Ok(session)
    }

    /// Ledger records for one session, oldest first
    pub async fn transactions_for_session(&self, session_id: &str) -> Result<Vec<TransactionRecord>> {
        let query = Query::new()
            .where_eq("relatedSessionId", session_id)
            .sort_by("timestamp", SortOrder::Ascending);
        decode(self.ledger.store().find(Collection::Transactions, query).await?)
    }
}
