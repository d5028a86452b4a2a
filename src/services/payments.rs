//! Payment authorization
//!
//! The exchange never talks to a payment provider directly. It asks a
//! `PaymentAuthorizer` for an order reference, and later asks it whether a
//! client-reported `(orderRef, paymentRef, signature)` triple is genuine.
//! Signatures are HMAC-SHA256 over `orderRef|paymentRef`, hex encoded, keyed
//! by the shared key secret.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{LedgerError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Notes attached to a gateway order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMetadata {
    pub user_id: String,
    pub coins: i64,
}

#[async_trait]
pub trait PaymentAuthorizer: Send + Sync {
    /// Create an order for `amount_minor` minor units; returns the order reference
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &OrderMetadata,
    ) -> Result<String>;

    /// Check a client-reported payment signature
    fn verify_signature(&self, order_ref: &str, payment_ref: &str, signature: &str) -> bool;

    /// Public key id handed to checkout clients
    fn key_id(&self) -> &str;
}

/// HMAC-SHA256 signer and verifier over `orderRef|paymentRef`
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, order_ref: &str, payment_ref: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(order_ref.as_bytes());
        mac.update(b"|");
        mac.update(payment_ref.as_bytes());
        Some(mac)
    }

    /// Hex signature for a payment
    pub fn sign(&self, order_ref: &str, payment_ref: &str) -> Result<String> {
        let mac = self
            .mac(order_ref, payment_ref)
            .ok_or_else(|| LedgerError::Config("Invalid payment key secret".into()))?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time comparison against a hex signature
    pub fn verify(&self, order_ref: &str, payment_ref: &str, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        match self.mac(order_ref, payment_ref) {
            Some(mac) => mac.verify_slice(&expected).is_ok(),
            None => false,
        }
    }
}

/// Authorizer that mints order references locally. Used in dev mode and
/// whenever no gateway URL is configured.
pub struct SandboxAuthorizer {
    key_id: String,
    verifier: SignatureVerifier,
}

impl SandboxAuthorizer {
    pub fn new(key_id: &str, key_secret: &str) -> Self {
        Self {
            key_id: key_id.to_string(),
            verifier: SignatureVerifier::new(key_secret),
        }
    }

    /// Sign as the provider would; lets tests and local clients complete checkout
    pub fn sign(&self, order_ref: &str, payment_ref: &str) -> Result<String> {
        self.verifier.sign(order_ref, payment_ref)
    }
}

#[async_trait]
impl PaymentAuthorizer for SandboxAuthorizer {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &OrderMetadata,
    ) -> Result<String> {
        let order_ref = format!("order_{}", Uuid::new_v4().simple());
        debug!(
            order_ref = %order_ref,
            amount_minor,
            currency,
            user_id = %metadata.user_id,
            "Sandbox order created"
        );
        Ok(order_ref)
    }

    fn verify_signature(&self, order_ref: &str, payment_ref: &str, signature: &str) -> bool {
        self.verifier.verify(order_ref, payment_ref, signature)
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: String,
    notes: &'a OrderMetadata,
}

#[derive(Deserialize)]
struct CreateOrderResponse {
    id: String,
}

/// Authorizer backed by an HTTP payment gateway (`POST {base}/v1/orders`,
/// basic auth with the key id and secret)
pub struct GatewayAuthorizer {
    base_url: String,
    key_id: String,
    key_secret: String,
    verifier: SignatureVerifier,
    http_client: reqwest::Client,
}

impl GatewayAuthorizer {
    pub fn new(base_url: &str, key_id: &str, key_secret: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LedgerError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            verifier: SignatureVerifier::new(key_secret),
            http_client,
        })
    }
}

#[async_trait]
impl PaymentAuthorizer for GatewayAuthorizer {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &OrderMetadata,
    ) -> Result<String> {
        let url = format!("{}/v1/orders", self.base_url);
        let body = CreateOrderRequest {
            amount: amount_minor,
            currency,
            receipt: format!("rcpt_{}", Uuid::new_v4().simple()),
            notes: metadata,
        };

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, "Payment gateway rejected order: {}", detail);
            return Err(LedgerError::Gateway(format!(
                "Order creation failed with status {}",
                status
            )));
        }

        let created: CreateOrderResponse = response.json().await?;
        debug!(order_ref = %created.id, amount_minor, "Gateway order created");
        Ok(created.id)
    }

    fn verify_signature(&self, order_ref: &str, payment_ref: &str, signature: &str) -> bool {
        self.verifier.verify(order_ref, payment_ref, signature)
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}
