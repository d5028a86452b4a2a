//! Ledger audit trail
//!
//! Appends one JSON object per ledger event to a JSONL file so settlements,
//! purchases and sales can be reconciled offline. Writing is best-effort:
//! a failed write is logged and never fails the ledger operation.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

/// Events kept in memory for inspection
const RECENT_CAPACITY: usize = 256;

/// Audit event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Both parties confirmed and coins moved
    SessionSettled,
    /// Dual completion could not settle; needs manual reconciliation
    SettlementFailed,
    ReviewRecorded,
    PurchaseConfirmed,
    /// A confirmed order was verified again; nothing credited
    PurchaseReplayed,
    /// Payment signature did not verify
    SignatureRejected,
    SaleRequested,
    SalePaidOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    /// Node that handled the request
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_ref: Option<String>,
    /// Coins moved or requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coins: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, node_id: String) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            node_id,
            account_id: None,
            session_id: None,
            order_ref: None,
            coins: None,
            metadata: None,
        }
    }

    pub fn with_account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_order(mut self, order_ref: &str) -> Self {
        self.order_ref = Some(order_ref.to_string());
        self
    }

    pub fn with_coins(mut self, coins: i64) -> Self {
        self.coins = Some(coins);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Audit logger that writes events to a JSONL file
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<Mutex<AuditLoggerInner>>,
    node_id: String,
}

struct AuditLoggerInner {
    writer: Option<BufWriter<File>>,
    recent: VecDeque<AuditEvent>,
}

impl AuditLogger {
    pub fn new(node_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuditLoggerInner {
                writer: None,
                recent: VecDeque::with_capacity(RECENT_CAPACITY),
            })),
            node_id,
        }
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));

        info!("Audit trail initialized to {}", path.display());
        Ok(())
    }

    /// Start an event stamped with this node's id
    pub fn event(&self, kind: AuditKind) -> AuditEvent {
        AuditEvent::new(kind, self.node_id.clone())
    }

    pub async fn log(&self, event: AuditEvent) {
        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;

        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write audit event: {}", e);
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        }

        if inner.recent.len() == RECENT_CAPACITY {
            inner.recent.pop_front();
        }
        inner.recent.push_back(event);
    }

    /// Most recent events, oldest first
    pub async fn recent(&self) -> Vec<AuditEvent> {
        self.inner.lock().await.recent.iter().cloned().collect()
    }

    /// Number of recent events of one kind
    #[cfg(test)]
    pub async fn count(&self, kind: AuditKind) -> usize {
        self.inner
            .lock()
            .await
            .recent
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(AuditKind::SessionSettled, "node-1".to_string())
            .with_account("alice")
            .with_session("s-42")
            .with_coins(10);

        let jsonl = event.to_jsonl().unwrap();
        assert!(jsonl.contains("session_settled"));
        assert!(jsonl.contains("s-42"));
        assert!(!jsonl.contains("order_ref"));
    }

    #[tokio::test]
    async fn test_recent_is_bounded() {
        let logger = AuditLogger::new("node-1".to_string());
        for _ in 0..(RECENT_CAPACITY + 3) {
            logger.log(logger.event(AuditKind::SaleRequested)).await;
        }
        logger.log(logger.event(AuditKind::SalePaidOut)).await;

        assert_eq!(logger.recent().await.len(), RECENT_CAPACITY);
        assert_eq!(logger.count(AuditKind::SalePaidOut).await, 1);
    }

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!("audit-{}.jsonl", uuid::Uuid::new_v4()));
        let logger = AuditLogger::new("node-1".to_string());
        logger.init_file(path.clone()).await.unwrap();

        logger
            .log(logger.event(AuditKind::PurchaseConfirmed).with_order("order_1"))
            .await;
        logger
            .log(logger.event(AuditKind::PurchaseReplayed).with_order("order_1"))
            .await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.kind, AuditKind::PurchaseConfirmed);
        let _ = std::fs::remove_file(path);
    }
}
