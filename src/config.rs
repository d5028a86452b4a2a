//! Configuration for the ledger service
//!
//! CLI arguments and environment variable handling using clap.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use uuid::Uuid;

use crate::ledger::LedgerConfig;

/// Document store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Volatile, single process; for development and tests
    Memory,
    /// MongoDB replica set
    Mongo,
}

/// SkillSwap ledger - coin settlement for peer-to-peer mentoring
#[derive(Parser, Debug, Clone)]
#[command(name = "skillswap-ledger")]
#[command(about = "Ledger and settlement service for the SkillSwap marketplace")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (insecure default secrets, X-Actor-Id header)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Document store backend
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value = "mongo")]
    pub store_backend: StoreBackend,

    /// MongoDB connection URI (must point at a replica set)
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "skillswap")]
    pub mongodb_db: String,

    /// Account that receives the platform share of every session
    #[arg(long, env = "PLATFORM_ACCOUNT_ID", default_value = "platform")]
    pub platform_account_id: String,

    /// Attempts per unit of work before contention becomes an error
    #[arg(long, env = "LEDGER_MAX_ATTEMPTS", default_value = "5")]
    pub ledger_max_attempts: u32,

    /// Base backoff between attempts in milliseconds
    #[arg(long, env = "LEDGER_RETRY_BACKOFF_MS", default_value = "25")]
    pub ledger_retry_backoff_ms: u64,

    /// JWT secret for token validation (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Longest token lifetime (exp - iat) accepted, in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Payment gateway key id
    #[arg(long, env = "PAYMENT_KEY_ID")]
    pub payment_key_id: Option<String>,

    /// Payment gateway key secret, also the HMAC key for payment signatures
    #[arg(long, env = "PAYMENT_KEY_SECRET")]
    pub payment_key_secret: Option<String>,

    /// Payment gateway base URL; unset uses the local sandbox authorizer
    #[arg(long, env = "PAYMENT_GATEWAY_URL")]
    pub payment_gateway_url: Option<String>,

    /// Fiat currency for purchases
    #[arg(long, env = "PAYMENT_CURRENCY", default_value = "INR")]
    pub payment_currency: String,

    /// JSONL audit trail path (optional)
    #[arg(long, env = "AUDIT_LOG_PATH")]
    pub audit_log_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        match (&self.jwt_secret, self.dev_mode) {
            (Some(secret), _) => Some(secret.clone()),
            (None, true) => Some("dev-only-insecure-secret-0123456789abcdef".to_string()),
            (None, false) => None,
        }
    }

    /// Payment key id and secret (insecure defaults in dev mode)
    pub fn payment_keys(&self) -> Option<(String, String)> {
        match (&self.payment_key_id, &self.payment_key_secret, self.dev_mode) {
            (Some(id), Some(secret), _) => Some((id.clone(), secret.clone())),
            (id, secret, true) => Some((
                id.clone().unwrap_or_else(|| "key_dev".to_string()),
                secret
                    .clone()
                    .unwrap_or_else(|| "dev-only-payment-secret".to_string()),
            )),
            _ => None,
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            max_attempts: self.ledger_max_attempts,
            retry_backoff: Duration::from_millis(self.ledger_retry_backoff_ms),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.jwt_secret.is_none() {
                return Err("JWT_SECRET is required in production mode".to_string());
            }
            if self.payment_key_id.is_none() || self.payment_key_secret.is_none() {
                return Err(
                    "PAYMENT_KEY_ID and PAYMENT_KEY_SECRET are required in production mode"
                        .to_string(),
                );
            }
        }

        if self.ledger_max_attempts == 0 {
            return Err("LEDGER_MAX_ATTEMPTS must be at least 1".to_string());
        }

        if self.platform_account_id.trim().is_empty() {
            return Err("PLATFORM_ACCOUNT_ID must not be empty".to_string());
        }

        if let Some(ref url) = self.payment_gateway_url {
            if !url.starts_with("https://") && !self.dev_mode {
                return Err("PAYMENT_GATEWAY_URL must use https".to_string());
            }
        }

        Ok(())
    }
}
