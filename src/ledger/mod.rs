//! Ledger unit of work
//!
//! Every balance or settlement-state mutation runs inside `Ledger::atomic`.
//! The closure reads through a `LedgerTx`, stages writes, and returns; the
//! ledger then commits everything the closure staged in one store commit.
//! When the store reports contention the closure is re-run from scratch
//! against fresh state, so closures must not have side effects outside the
//! transaction handle.

mod tx;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::db::schemas::Account;
use crate::db::store::DocumentStore;
use crate::types::{LedgerError, Result};

pub use tx::LedgerTx;

/// Retry policy for optimistic units of work
#[derive(Debug, Clone, Copy)]
pub struct LedgerConfig {
    /// Attempts before contention surfaces as an internal error
    pub max_attempts: u32,
    /// Base backoff; attempt `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff: Duration::from_millis(25),
        }
    }
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn DocumentStore>,
    config: LedgerConfig,
    platform_account_id: String,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: LedgerConfig,
        platform_account_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            config,
            platform_account_id: platform_account_id.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Fixed id of the account that receives the platform share
    pub fn platform_account_id(&self) -> &str {
        &self.platform_account_id
    }

    /// Run `f` as one all-or-nothing unit, retrying on store contention.
    ///
    /// `operation` only labels log lines.
    pub async fn atomic<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut LedgerTx) -> BoxFuture<'t, Result<T>> + Send,
    {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let mut tx = LedgerTx::new(self.store.clone());

            let outcome = match f(&mut tx).await {
                Ok(value) => {
                    let (reads, writes) = tx.into_parts();
                    self.store.commit(reads, writes).await.map(|_| value)
                }
                Err(e) => Err(e),
            };

            match outcome {
                Err(LedgerError::Contention(reason)) => {
                    if attempt == max_attempts {
                        warn!(
                            operation,
                            attempt, "Giving up after repeated contention: {}", reason
                        );
                        break;
                    }
                    debug!(operation, attempt, "Contention, retrying: {}", reason);
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                other => return other,
            }
        }

        Err(LedgerError::Internal(format!(
            "{} did not commit after {} attempts",
            operation, max_attempts
        )))
    }

    /// Fresh read of an account, outside any unit of work
    pub async fn read_account(&self, id: &str) -> Result<Account> {
        let id = id.to_string();
        self.atomic("read_account", move |tx| {
            let id = id.clone();
            Box::pin(async move { tx.require::<Account>(&id).await })
        })
        .await
    }

    /// Create the platform account if missing. Called once at startup.
    pub async fn ensure_platform_account(&self) -> Result<Account> {
        let id = self.platform_account_id.clone();
        let account = self
            .atomic("ensure_platform_account", move |tx| {
                let id = id.clone();
                Box::pin(async move {
                    match tx.get::<Account>(&id).await? {
                        Some(existing) if existing.is_admin => Ok(existing),
                        Some(_) => Err(LedgerError::Config(format!(
                            "Account '{}' exists but is not flagged as the platform account",
                            id
                        ))),
                        None => {
                            let platform = Account::platform(&id, tx.now());
                            tx.insert(&platform)?;
                            Ok(platform)
                        }
                    }
                })
            })
            .await?;

        info!(account_id = %account.id, balance = account.balance, "Platform account ready");
        Ok(account)
    }

    /// Open a user account; returns the existing one if already open
    pub async fn open_account(&self, id: &str, display_name: Option<String>) -> Result<Account> {
        if id.trim().is_empty() {
            return Err(LedgerError::Validation("Account id must not be empty".into()));
        }
        let id = id.to_string();
        self.atomic("open_account", move |tx| {
            let id = id.clone();
            let display_name = display_name.clone();
            Box::pin(async move {
                if let Some(existing) = tx.get::<Account>(&id).await? {
                    return Ok(existing);
                }
                let account = Account::new(&id, display_name, tx.now());
                tx.insert(&account)?;
                Ok(account)
            })
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Store wrappers for exercising retry paths

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use bson::Document;

    use super::{Ledger, LedgerConfig};
    use crate::db::memory::MemoryStore;
    use crate::db::schemas::{Account, EntryKind, TransactionRecord};
    use crate::db::store::{Collection, DocumentStore, Query, ReadStamp, StagedWrite, VersionedDoc};
    use crate::types::{LedgerError, Result};

    /// Fails the first `failures` commits with contention
    pub struct FlakyStore {
        pub inner: MemoryStore,
        failures: AtomicUsize,
        pub commits: AtomicUsize,
    }

    impl FlakyStore {
        pub fn new(failures: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicUsize::new(failures),
                commits: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn get(&self, collection: Collection, id: &str) -> Result<Option<VersionedDoc>> {
            self.inner.get(collection, id).await
        }

        async fn commit(&self, reads: Vec<ReadStamp>, writes: Vec<StagedWrite>) -> Result<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            let injected = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(LedgerError::Contention("injected".into()));
            }
            self.inner.commit(reads, writes).await
        }

        async fn find(&self, collection: Collection, query: Query) -> Result<Vec<Document>> {
            self.inner.find(collection, query).await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Memory-backed ledger with the platform account in place
    pub async fn memory_ledger() -> Ledger {
        let config = LedgerConfig {
            max_attempts: 8,
            retry_backoff: std::time::Duration::from_millis(1),
        };
        let ledger = Ledger::new(Arc::new(MemoryStore::new()), config, "platform");
        ledger.ensure_platform_account().await.unwrap();
        ledger
    }

    /// Open `id` and credit it with `coins` as a purchase
    pub async fn fund(ledger: &Ledger, id: &str, coins: i64) {
        ledger.open_account(id, None).await.unwrap();
        let id = id.to_string();
        ledger
            .atomic("fund", move |tx| {
                let id = id.clone();
                Box::pin(async move {
                    let mut account: Account = tx.require(&id).await?;
                    account.credit(coins)?;
                    account.total_purchased += coins;
                    tx.put(&account)?;
                    tx.append_transaction(TransactionRecord::credit(
                        &id,
                        EntryKind::Purchase,
                        coins,
                        "Test funding".into(),
                        tx.now(),
                    ))
                })
            })
            .await
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::FlakyStore;
    use super::*;
    use crate::db::memory::MemoryStore;

    fn fast_config(max_attempts: u32) -> LedgerConfig {
        LedgerConfig {
            max_attempts,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_contention_is_retried_until_commit() {
        let store = Arc::new(FlakyStore::new(2));
        let ledger = Ledger::new(store.clone(), fast_config(5), "platform");

        let account = ledger.open_account("alice", None).await.unwrap();
        assert_eq!(account.balance, 0);
        assert_eq!(store.commits.load(Ordering::SeqCst), 3);
        assert!(ledger.read_account("alice").await.is_ok());
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_internal() {
        let store = Arc::new(FlakyStore::new(10));
        let ledger = Ledger::new(store.clone(), fast_config(3), "platform");

        let err = ledger.open_account("alice", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Internal(_)));
        assert_eq!(store.commits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_unit_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), fast_config(3), "platform");

        let result: Result<()> = ledger
            .atomic("doomed", |tx| {
                Box::pin(async move {
                    let account = Account::new("ghost", None, tx.now());
                    tx.insert(&account)?;
                    Err(LedgerError::Validation("nope".into()))
                })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert!(matches!(
            ledger.read_account("ghost").await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_platform_account_is_created_once() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store, fast_config(3), "platform");

        let first = ledger.ensure_platform_account().await.unwrap();
        let second = ledger.ensure_platform_account().await.unwrap();
        assert!(first.is_admin);
        assert_eq!(
            first.created_at.timestamp_millis(),
            second.created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_platform_id_taken_by_user_is_config_error() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store, fast_config(3), "platform");
        ledger.open_account("platform", None).await.unwrap();

        let err = ledger.ensure_platform_account().await.unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[tokio::test]
    async fn test_open_account_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store, fast_config(3), "platform");

        let first = ledger.open_account("bob", Some("Bob".into())).await.unwrap();
        let second = ledger.open_account("bob", Some("Robert".into())).await.unwrap();
        assert_eq!(second.display_name.as_deref(), Some("Bob"));
        assert_eq!(
            first.created_at.timestamp_millis(),
            second.created_at.timestamp_millis()
        );
        assert!(ledger.open_account("  ", None).await.is_err());
    }
}
