//! Coin exchange
//!
//! Purchases turn verified fiat payments into coins; sales hand coins back
//! for an off-system payout. Confirmation is idempotent on the order
//! reference: the payment intent's status is checked and flipped in the
//! same unit of work that credits the account.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::schemas::{
    Account, EntryKind, PaymentIntent, PaymentStatus, SaleRequest, SaleStatus, TransactionRecord,
};
use crate::ledger::Ledger;
use crate::logging::{AuditKind, AuditLogger};
use crate::services::payments::{OrderMetadata, PaymentAuthorizer};
use crate::services::pricing::{self, FIAT_MINOR_UNITS, MIN_RETAINED_BALANCE};
use crate::types::{LedgerError, Result};

/// Largest single purchase or sale
const MAX_COINS_PER_ORDER: i64 = 1_000_000;

/// What a client needs to open the provider's checkout
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrder {
    pub order_ref: String,
    pub coins: i64,
    pub fiat_amount: i64,
    /// Amount in minor units, as sent to the gateway
    pub amount_minor: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseConfirmation {
    pub order_ref: String,
    pub coins: i64,
    pub balance: i64,
    /// True when the order had already been confirmed; nothing was credited
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleReceipt {
    pub sale: SaleRequest,
    pub balance: i64,
}

fn check_coin_amount(coins: i64) -> Result<()> {
    if coins <= 0 {
        return Err(LedgerError::Validation("Coin amount must be positive".into()));
    }
    if coins > MAX_COINS_PER_ORDER {
        return Err(LedgerError::Validation(format!(
            "Coin amount must not exceed {}",
            MAX_COINS_PER_ORDER
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CoinExchange {
    ledger: Ledger,
    authorizer: Arc<dyn PaymentAuthorizer>,
    audit: AuditLogger,
    currency: String,
}

impl CoinExchange {
    pub fn new(
        ledger: Ledger,
        authorizer: Arc<dyn PaymentAuthorizer>,
        audit: AuditLogger,
        currency: &str,
    ) -> Self {
        Self {
            ledger,
            authorizer,
            audit,
            currency: currency.to_string(),
        }
    }

    /// Open a gateway order and record a pending intent. No coins move.
    pub async fn initiate_purchase(
        &self,
        user_id: &str,
        coins: i64,
        fiat_amount: i64,
    ) -> Result<PurchaseOrder> {
        check_coin_amount(coins)?;
        let expected = pricing::fiat_for_coins(coins)?;
        if fiat_amount != expected {
            return Err(LedgerError::Validation(format!(
                "{} coins cost {} {}, got {}",
                coins, expected, self.currency, fiat_amount
            )));
        }
        let amount_minor = fiat_amount
            .checked_mul(FIAT_MINOR_UNITS)
            .ok_or_else(|| LedgerError::Validation("Amount is too large".into()))?;

        self.ledger.read_account(user_id).await?;

        let metadata = OrderMetadata {
            user_id: user_id.to_string(),
            coins,
        };
        let order_ref = self
            .authorizer
            .create_order(amount_minor, &self.currency, &metadata)
            .await?;

        let intent_user = user_id.to_string();
        let intent_ref = order_ref.clone();
        let currency = self.currency.clone();
        self.ledger
            .atomic("initiate_purchase", move |tx| {
                let intent = PaymentIntent {
                    id: intent_ref.clone(),
                    user_id: intent_user.clone(),
                    coins,
                    fiat_amount,
                    currency: currency.clone(),
                    status: PaymentStatus::Pending,
                    payment_ref: None,
                    created_at: tx.now(),
                    completed_at: None,
                };
                Box::pin(async move { tx.insert(&intent) })
            })
            .await?;

        info!(order_ref = %order_ref, account_id = %user_id, coins, "Purchase initiated");
        Ok(PurchaseOrder {
            order_ref,
            coins,
            fiat_amount,
            amount_minor,
            currency: self.currency.clone(),
            key_id: self.authorizer.key_id().to_string(),
        })
    }

    /// Credit coins for a verified payment. Replays of a confirmed order
    /// credit nothing.
    pub async fn confirm_purchase(
        &self,
        user_id: &str,
        order_ref: &str,
        payment_ref: &str,
        signature: &str,
    ) -> Result<PurchaseConfirmation> {
        if !self
            .authorizer
            .verify_signature(order_ref, payment_ref, signature)
        {
            warn!(order_ref, account_id = user_id, "Payment signature rejected");
            self.audit
                .log(
                    self.audit
                        .event(AuditKind::SignatureRejected)
                        .with_account(user_id)
                        .with_order(order_ref)
                        .with_metadata(serde_json::json!({ "paymentRef": payment_ref })),
                )
                .await;
            return Err(LedgerError::Signature(
                "Payment signature verification failed".into(),
            ));
        }

        let uid = user_id.to_string();
        let oref = order_ref.to_string();
        let pref = payment_ref.to_string();
        let confirmation = self
            .ledger
            .atomic("confirm_purchase", move |tx| {
                let user_id = uid.clone();
                let order_ref = oref.clone();
                let payment_ref = pref.clone();
                Box::pin(async move {
                    let mut intent: PaymentIntent = tx.require(&order_ref).await?;
                    if intent.user_id != user_id {
                        return Err(LedgerError::Permission(
                            "Order belongs to another account".into(),
                        ));
                    }

                    if intent.status == PaymentStatus::Completed {
                        if intent.payment_ref.as_deref() != Some(payment_ref.as_str()) {
                            return Err(LedgerError::InvalidState(format!(
                                "Order {} was completed by a different payment",
                                order_ref
                            )));
                        }
                        let account: Account = tx.require(&user_id).await?;
                        return Ok(PurchaseConfirmation {
                            order_ref,
                            coins: intent.coins,
                            balance: account.balance,
                            replayed: true,
                        });
                    }

                    let now = tx.now();
                    let mut account: Account = tx.require(&user_id).await?;
                    account.credit(intent.coins)?;
                    account.total_purchased += intent.coins;
                    account.updated_at = now;
                    tx.put(&account)?;

                    tx.append_transaction(
                        TransactionRecord::credit(
                            &user_id,
                            EntryKind::Purchase,
                            intent.coins,
                            format!("Purchased {} coins", intent.coins),
                            now,
                        )
                        .for_order(&order_ref),
                    )?;

                    intent.status = PaymentStatus::Completed;
                    intent.payment_ref = Some(payment_ref);
                    intent.completed_at = Some(now);
                    tx.put(&intent)?;

                    Ok(PurchaseConfirmation {
                        order_ref,
                        coins: intent.coins,
                        balance: account.balance,
                        replayed: false,
                    })
                })
            })
            .await?;

        let kind = if confirmation.replayed {
            AuditKind::PurchaseReplayed
        } else {
            AuditKind::PurchaseConfirmed
        };
        info!(
            order_ref,
            account_id = user_id,
            coins = confirmation.coins,
            replayed = confirmation.replayed,
            "Purchase confirmed"
        );
        self.audit
            .log(
                self.audit
                    .event(kind)
                    .with_account(user_id)
                    .with_order(order_ref)
                    .with_coins(confirmation.coins),
            )
            .await;

        Ok(confirmation)
    }

    /// Debit coins for an off-system payout, keeping the minimum balance
    pub async fn initiate_sale(&self, user_id: &str, coins: i64) -> Result<SaleReceipt> {
        check_coin_amount(coins)?;
        let fiat_amount = pricing::fiat_for_coins(coins)?;

        let uid = user_id.to_string();
        let sale_id = Uuid::new_v4().to_string();
        let receipt = self
            .ledger
            .atomic("initiate_sale", move |tx| {
                let user_id = uid.clone();
                let sale_id = sale_id.clone();
                Box::pin(async move {
                    let mut account: Account = tx.require(&user_id).await?;
                    if account.balance - coins < MIN_RETAINED_BALANCE {
                        return Err(LedgerError::InsufficientBalance {
                            requested: coins,
                            available: account.balance,
                            minimum: MIN_RETAINED_BALANCE,
                        });
                    }

                    let now = tx.now();
                    account.debit(coins)?;
                    account.total_sold += coins;
                    account.updated_at = now;
                    tx.put(&account)?;

                    tx.append_transaction(TransactionRecord::debit(
                        &user_id,
                        EntryKind::Sale,
                        coins,
                        format!("Sold {} coins", coins),
                        now,
                    ))?;

                    let sale = SaleRequest {
                        id: sale_id,
                        user_id,
                        coins,
                        fiat_amount,
                        status: SaleStatus::Requested,
                        created_at: now,
                        paid_out_at: None,
                        paid_out_by: None,
                    };
                    tx.insert(&sale)?;

                    Ok(SaleReceipt {
                        sale,
                        balance: account.balance,
                    })
                })
            })
            .await?;

        info!(
            sale_id = %receipt.sale.id,
            account_id = user_id,
            coins,
            balance = receipt.balance,
            "Sale requested"
        );
        self.audit
            .log(
                self.audit
                    .event(AuditKind::SaleRequested)
                    .with_account(user_id)
                    .with_coins(coins)
                    .with_metadata(serde_json::json!({
                        "saleId": receipt.sale.id,
                        "fiatAmount": fiat_amount,
                    })),
            )
            .await;

        Ok(receipt)
    }

    /// Operator records that a sale's payout was sent
    pub async fn mark_sale_paid(&self, sale_id: &str, admin_id: &str) -> Result<SaleRequest> {
        let sid = sale_id.to_string();
        let aid = admin_id.to_string();
        let sale = self
            .ledger
            .atomic("mark_sale_paid", move |tx| {
                let sale_id = sid.clone();
                let admin_id = aid.clone();
                Box::pin(async move {
                    let admin: Option<Account> = tx.get(&admin_id).await?;
                    if !admin.map(|a| a.is_admin).unwrap_or(false) {
                        return Err(LedgerError::Permission(
                            "Only the platform operator can settle payouts".into(),
                        ));
                    }

                    let mut sale: SaleRequest = tx.require(&sale_id).await?;
                    if sale.status != SaleStatus::Requested {
                        return Err(LedgerError::InvalidState(format!(
                            "Sale {} is already paid out",
                            sale.id
                        )));
                    }
                    sale.status = SaleStatus::PaidOut;
                    sale.paid_out_at = Some(tx.now());
                    sale.paid_out_by = Some(admin_id);
                    tx.put(&sale)?;
                    Ok(sale)
                })
            })
            .await?;

        info!(sale_id = %sale.id, account_id = %sale.user_id, "Sale paid out");
        self.audit
            .log(
                self.audit
                    .event(AuditKind::SalePaidOut)
                    .with_account(&sale.user_id)
                    .with_coins(sale.coins)
                    .with_metadata(serde_json::json!({
                        "saleId": sale.id,
                        "paidOutBy": admin_id,
                    })),
            )
            .await;

        Ok(sale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::{Collection, Query};
    use crate::ledger::testing::{fund, memory_ledger};
    use crate::services::payments::SandboxAuthorizer;

    struct Fixture {
        ledger: Ledger,
        sandbox: Arc<SandboxAuthorizer>,
        exchange: CoinExchange,
        audit: AuditLogger,
    }

    async fn fixture() -> Fixture {
        let ledger = memory_ledger().await;
        ledger.open_account("alice", None).await.unwrap();
        let sandbox = Arc::new(SandboxAuthorizer::new("key_test", "s3cret"));
        let audit = AuditLogger::new("test".into());
        let exchange = CoinExchange::new(ledger.clone(), sandbox.clone(), audit.clone(), "INR");
        Fixture {
            ledger,
            sandbox,
            exchange,
            audit,
        }
    }

    async fn transaction_count(ledger: &Ledger) -> usize {
        ledger
            .store()
            .find(Collection::Transactions, Query::new())
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_purchase_credits_once() {
        let f = fixture().await;
        let order = f.exchange.initiate_purchase("alice", 50, 500).await.unwrap();
        assert_eq!(order.amount_minor, 50_000);
        assert_eq!(order.key_id, "key_test");
        assert_eq!(f.ledger.read_account("alice").await.unwrap().balance, 0);

        let signature = f.sandbox.sign(&order.order_ref, "pay_1").unwrap();
        let first = f
            .exchange
            .confirm_purchase("alice", &order.order_ref, "pay_1", &signature)
            .await
            .unwrap();
        assert!(!first.replayed);
        assert_eq!(first.balance, 50);

        let replay = f
            .exchange
            .confirm_purchase("alice", &order.order_ref, "pay_1", &signature)
            .await
            .unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.balance, 50);

        let alice = f.ledger.read_account("alice").await.unwrap();
        assert_eq!(alice.balance, 50);
        assert_eq!(alice.total_purchased, 50);
        assert_eq!(transaction_count(&f.ledger).await, 1);
        assert_eq!(f.audit.count(AuditKind::PurchaseReplayed).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_confirmations_credit_once() {
        let f = fixture().await;
        let order = f.exchange.initiate_purchase("alice", 30, 300).await.unwrap();
        let signature = f.sandbox.sign(&order.order_ref, "pay_race").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let exchange = f.exchange.clone();
                let order_ref = order.order_ref.clone();
                let signature = signature.clone();
                tokio::spawn(async move {
                    exchange
                        .confirm_purchase("alice", &order_ref, "pay_race", &signature)
                        .await
                })
            })
            .collect();

        let mut credited = 0;
        for handle in handles {
            let confirmation = handle.await.unwrap().unwrap();
            assert_eq!(confirmation.balance, 30);
            if !confirmation.replayed {
                credited += 1;
            }
        }

        assert_eq!(credited, 1);
        let alice = f.ledger.read_account("alice").await.unwrap();
        assert_eq!(alice.balance, 30);
        assert_eq!(alice.total_purchased, 30);
        assert_eq!(transaction_count(&f.ledger).await, 1);
        assert_eq!(f.audit.count(AuditKind::PurchaseConfirmed).await, 1);
        assert_eq!(f.audit.count(AuditKind::PurchaseReplayed).await, 7);
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let f = fixture().await;
        let order = f.exchange.initiate_purchase("alice", 20, 200).await.unwrap();
        let forged = f.sandbox.sign(&order.order_ref, "pay_other").unwrap();

        let err = f
            .exchange
            .confirm_purchase("alice", &order.order_ref, "pay_1", &forged)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Signature(_)));
        assert!(!err.is_retryable());
        assert_eq!(f.ledger.read_account("alice").await.unwrap().balance, 0);
        assert_eq!(transaction_count(&f.ledger).await, 0);
        assert_eq!(f.audit.count(AuditKind::SignatureRejected).await, 1);
    }

    #[tokio::test]
    async fn test_purchase_price_must_match_rate() {
        let f = fixture().await;
        assert!(matches!(
            f.exchange.initiate_purchase("alice", 50, 499).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            f.exchange.initiate_purchase("alice", 0, 0).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            f.exchange.initiate_purchase("nobody", 5, 50).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_other_account_cannot_confirm() {
        let f = fixture().await;
        f.ledger.open_account("mallory", None).await.unwrap();
        let order = f.exchange.initiate_purchase("alice", 5, 50).await.unwrap();
        let signature = f.sandbox.sign(&order.order_ref, "pay_1").unwrap();

        let err = f
            .exchange
            .confirm_purchase("mallory", &order.order_ref, "pay_1", &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Permission(_)));
    }

    #[tokio::test]
    async fn test_sale_below_minimum_is_rejected() {
        let f = fixture().await;
        fund(&f.ledger, "bob", 120).await;
        let before = transaction_count(&f.ledger).await;

        let err = f.exchange.initiate_sale("bob", 50).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                requested: 50,
                available: 120,
                minimum: 100
            }
        ));
        assert_eq!(f.ledger.read_account("bob").await.unwrap().balance, 120);
        assert_eq!(transaction_count(&f.ledger).await, before);
    }

    #[tokio::test]
    async fn test_sale_debits_and_pays_out() {
        let f = fixture().await;
        fund(&f.ledger, "bob", 150).await;

        let receipt = f.exchange.initiate_sale("bob", 50).await.unwrap();
        assert_eq!(receipt.balance, 100);
        assert_eq!(receipt.sale.fiat_amount, 500);
        assert_eq!(receipt.sale.status, SaleStatus::Requested);
        assert_eq!(f.ledger.read_account("bob").await.unwrap().total_sold, 50);

        let err = f
            .exchange
            .mark_sale_paid(&receipt.sale.id, "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Permission(_)));

        let paid = f
            .exchange
            .mark_sale_paid(&receipt.sale.id, "platform")
            .await
            .unwrap();
        assert_eq!(paid.status, SaleStatus::PaidOut);
        assert_eq!(paid.paid_out_by.as_deref(), Some("platform"));

        let err = f
            .exchange
            .mark_sale_paid(&receipt.sale.id, "platform")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }
}
