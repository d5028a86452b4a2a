//! Session settlement engine
//!
//! Drives a session from request to completion. Completion needs a mark
//! from both the mentee and the mentor; whichever mark comes second moves
//! the coins in the same unit of work that records it:
//!
//! ```text
//! pending ──accept──▶ accepted ──both marked──▶ completed
//!    └─────reject───▶ rejected
//! ```
//!
//! A session reaches `completed` at most once. Both marks re-read the
//! session inside their own unit, so when the two race the loser's commit
//! fails on the version check and its retry sees the winner's flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use crate::db::schemas::{Account, EntryKind, Session, SessionStatus, TransactionRecord};
use crate::ledger::{Ledger, LedgerTx};
use crate::logging::{AuditKind, AuditLogger};
use crate::services::pricing::{self, Split};
use crate::types::{LedgerError, Result};

const MAX_LINK_LEN: usize = 2048;
const MAX_SKILL_LEN: usize = 120;

/// A mentee's booking request
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub mentee_id: String,
    pub mentor_id: String,
    pub skill: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_hours: i64,
}

/// Mentor's answer to a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

/// Result of a completion mark
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CompletionOutcome {
    /// Flag recorded; waiting for the other party
    Recorded { session: Session },
    /// Both parties confirmed and coins moved
    Settled { session: Session, settlement: Split },
}

impl CompletionOutcome {
    pub fn session(&self) -> &Session {
        match self {
            Self::Recorded { session } | Self::Settled { session, .. } => session,
        }
    }
}

/// Meeting links must be absolute https URLs with a host
pub fn validate_meeting_link(link: &str) -> Result<String> {
    let trimmed = link.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Validation("Meeting link must not be empty".into()));
    }
    if trimmed.len() > MAX_LINK_LEN {
        return Err(LedgerError::Validation("Meeting link is too long".into()));
    }
    let url = Url::parse(trimmed)
        .map_err(|e| LedgerError::Validation(format!("Invalid meeting link: {}", e)))?;
    if url.scheme() != "https" {
        return Err(LedgerError::Validation("Meeting link must use https".into()));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(LedgerError::Validation("Meeting link must name a host".into()));
    }
    Ok(trimmed.to_string())
}

#[derive(Clone)]
pub struct SettlementEngine {
    ledger: Ledger,
    audit: AuditLogger,
}

impl SettlementEngine {
    pub fn new(ledger: Ledger, audit: AuditLogger) -> Self {
        Self { ledger, audit }
    }

    /// Book a session. Nothing is charged until both parties complete it.
    pub async fn request_session(&self, request: SessionRequest) -> Result<Session> {
        if request.mentee_id == request.mentor_id {
            return Err(LedgerError::Validation(
                "You cannot book a session with yourself".into(),
            ));
        }
        let skill = request.skill.trim().to_string();
        if skill.is_empty() {
            return Err(LedgerError::Validation("Skill must not be empty".into()));
        }
        if skill.chars().count() > MAX_SKILL_LEN {
            return Err(LedgerError::Validation("Skill name is too long".into()));
        }
        let cost = pricing::session_cost(request.duration_hours)?;
        if request.scheduled_at <= Utc::now() {
            return Err(LedgerError::Validation(
                "Session must be scheduled in the future".into(),
            ));
        }

        let session_id = Uuid::new_v4().to_string();
        let session = self
            .ledger
            .atomic("request_session", move |tx| {
                let request = request.clone();
                let skill = skill.clone();
                let session_id = session_id.clone();
                Box::pin(async move {
                    tx.require::<Account>(&request.mentee_id).await?;
                    tx.require::<Account>(&request.mentor_id).await?;

                    let now = tx.now();
                    let session = Session {
                        id: session_id,
                        mentee_id: request.mentee_id,
                        mentor_id: request.mentor_id,
                        skill,
                        scheduled_at: request.scheduled_at,
                        duration_hours: request.duration_hours,
                        cost_coins: cost,
                        status: SessionStatus::Pending,
                        meeting_link: None,
                        mentor_completed: false,
                        mentee_completed: false,
                        feedback_submitted: false,
                        created_at: now,
                        updated_at: now,
                        completed_at: None,
                    };
                    tx.insert(&session)?;
                    Ok(session)
                })
            })
            .await?;

        info!(
            session_id = %session.id,
            mentee = %session.mentee_id,
            mentor = %session.mentor_id,
            cost = session.cost_coins,
            "Session requested"
        );
        Ok(session)
    }

    /// Mentor accepts or rejects a pending request. An accept may carry
    /// the meeting link.
    pub async fn respond(
        &self,
        session_id: &str,
        actor_id: &str,
        decision: Decision,
        meeting_link: Option<String>,
    ) -> Result<Session> {
        let meeting_link = match (decision, meeting_link) {
            (Decision::Accept, Some(link)) => Some(validate_meeting_link(&link)?),
            _ => None,
        };

        let session_id = session_id.to_string();
        let actor_id = actor_id.to_string();
        let session = self
            .ledger
            .atomic("respond_to_request", move |tx| {
                let session_id = session_id.clone();
                let actor_id = actor_id.clone();
                let meeting_link = meeting_link.clone();
                Box::pin(async move {
                    let mut session: Session = tx.require(&session_id).await?;
                    if session.mentor_id != actor_id {
                        return Err(LedgerError::Permission(
                            "Only the mentor can respond to this request".into(),
                        ));
                    }
                    if session.status != SessionStatus::Pending {
                        return Err(LedgerError::InvalidState(format!(
                            "Session is {}, not pending",
                            session.status
                        )));
                    }

                    match decision {
                        Decision::Accept => {
                            session.status = SessionStatus::Accepted;
                            session.meeting_link = meeting_link;
                        }
                        Decision::Reject => session.status = SessionStatus::Rejected,
                    }
                    session.updated_at = tx.now();
                    tx.put(&session)?;
                    Ok(session)
                })
            })
            .await?;

        info!(session_id = %session.id, status = %session.status, "Session request answered");
        Ok(session)
    }

    /// Mentor attaches the meeting link to an accepted session
    pub async fn attach_meeting_link(
        &self,
        session_id: &str,
        actor_id: &str,
        link: &str,
    ) -> Result<Session> {
        let link = validate_meeting_link(link)?;
        let session_id = session_id.to_string();
        let actor_id = actor_id.to_string();

        self.ledger
            .atomic("attach_meeting_link", move |tx| {
                let session_id = session_id.clone();
                let actor_id = actor_id.clone();
                let link = link.clone();
                Box::pin(async move {
                    let mut session: Session = tx.require(&session_id).await?;
                    if session.mentor_id != actor_id {
                        return Err(LedgerError::Permission(
                            "Only the mentor can set the meeting link".into(),
                        ));
                    }
                    if session.status != SessionStatus::Accepted {
                        return Err(LedgerError::InvalidState(format!(
                            "Session is {}, not accepted",
                            session.status
                        )));
                    }
                    if session.meeting_link.is_some() {
                        return Err(LedgerError::InvalidState(
                            "Meeting link is already set".into(),
                        ));
                    }
                    session.meeting_link = Some(link);
                    session.updated_at = tx.now();
                    tx.put(&session)?;
                    Ok(session)
                })
            })
            .await
    }

    /// Record the actor's completion mark, settling when both are in.
    ///
    /// Marking twice fails with `AlreadyMarked` and changes nothing.
    pub async fn mark_complete(&self, session_id: &str, actor_id: &str) -> Result<CompletionOutcome> {
        let platform_id = self.ledger.platform_account_id().to_string();
        let sid = session_id.to_string();
        let actor = actor_id.to_string();

        let outcome = self
            .ledger
            .atomic("mark_complete", move |tx| {
                let session_id = sid.clone();
                let actor_id = actor.clone();
                let platform_id = platform_id.clone();
                Box::pin(async move {
                    let mut session: Session = tx.require(&session_id).await?;
                    let role = session.role_of(&actor_id).ok_or_else(|| {
                        LedgerError::Permission("Only session participants can mark completion".into())
                    })?;
                    if session.has_marked(role) {
                        return Err(LedgerError::AlreadyMarked(format!(
                            "Completion already marked for session {}",
                            session.id
                        )));
                    }
                    if session.status != SessionStatus::Accepted {
                        return Err(LedgerError::InvalidState(format!(
                            "Session is {}, not accepted",
                            session.status
                        )));
                    }

                    session.mark(role);
                    session.updated_at = tx.now();

                    if !session.both_marked() {
                        tx.put(&session)?;
                        return Ok(CompletionOutcome::Recorded { session });
                    }

                    let settlement = settle(tx, &mut session, &platform_id).await?;
                    tx.put(&session)?;
                    Ok(CompletionOutcome::Settled {
                        session,
                        settlement,
                    })
                })
            })
            .await;

        match &outcome {
            Ok(CompletionOutcome::Settled { session, settlement }) => {
                info!(
                    session_id = %session.id,
                    cost = settlement.cost,
                    mentor_share = settlement.mentor_share,
                    platform_share = settlement.platform_share,
                    "Session settled"
                );
                self.audit
                    .log(
                        self.audit
                            .event(AuditKind::SessionSettled)
                            .with_account(&session.mentee_id)
                            .with_session(&session.id)
                            .with_coins(settlement.cost)
                            .with_metadata(serde_json::json!({
                                "mentorId": session.mentor_id,
                                "mentorShare": settlement.mentor_share,
                                "platformShare": settlement.platform_share,
                            })),
                    )
                    .await;
            }
            Ok(CompletionOutcome::Recorded { session }) => {
                info!(session_id = %session.id, actor = %actor_id, "Completion recorded");
            }
            Err(e @ LedgerError::InsufficientFunds { account_id, required, available }) => {
                error!(
                    session_id,
                    account_id = %account_id,
                    required,
                    available,
                    "Settlement failed, manual reconciliation required: {}",
                    e
                );
                self.audit
                    .log(
                        self.audit
                            .event(AuditKind::SettlementFailed)
                            .with_account(account_id)
                            .with_session(session_id)
                            .with_coins(*required)
                            .with_metadata(serde_json::json!({ "available": available })),
                    )
                    .await;
            }
            Err(LedgerError::Internal(reason)) => {
                error!(session_id, "Completion failed: {}", reason);
            }
            Err(_) => {}
        }

        outcome
    }
}

/// Move the session's cost from mentee to mentor and platform, append the
/// three ledger records, and mark the session completed.
///
/// Accounts are read, changed and staged one at a time so a participant
/// that is also the platform account still nets out correctly.
async fn settle(
    tx: &mut LedgerTx,
    session: &mut Session,
    platform_id: &str,
) -> Result<Split> {
    if session.status == SessionStatus::Completed {
        return Err(LedgerError::InvalidState(format!(
            "Session {} is already completed",
            session.id
        )));
    }

    let split = pricing::split(session.duration_hours, session.cost_coins)?;
    let now = tx.now();

    let mut mentee = settlement_account(tx, &session.mentee_id).await?;
    mentee.debit(split.cost)?;
    mentee.total_spent += split.cost;
    mentee.updated_at = now;
    tx.put(&mentee)?;

    let mut mentor = settlement_account(tx, &session.mentor_id).await?;
    mentor.credit(split.mentor_share)?;
    mentor.total_earned += split.mentor_share;
    mentor.updated_at = now;
    tx.put(&mentor)?;

    let mut platform = settlement_account(tx, platform_id).await?;
    if !platform.is_admin {
        return Err(LedgerError::Internal(format!(
            "Account '{}' is not the platform account",
            platform_id
        )));
    }
    platform.credit(split.platform_share)?;
    platform.total_earned += split.platform_share;
    platform.updated_at = now;
    tx.put(&platform)?;

    tx.append_transaction(
        TransactionRecord::debit(
            &session.mentee_id,
            EntryKind::SessionPayment,
            split.cost,
            format!("Payment for {} session", session.skill),
            now,
        )
        .for_session(&session.id),
    )?;
    tx.append_transaction(
        TransactionRecord::credit(
            &session.mentor_id,
            EntryKind::SessionEarning,
            split.mentor_share,
            format!("Earnings from {} session", session.skill),
            now,
        )
        .for_session(&session.id),
    )?;
    tx.append_transaction(
        TransactionRecord::credit(
            platform_id,
            EntryKind::PlatformFee,
            split.platform_share,
            format!("Platform fee for {} session", session.skill),
            now,
        )
        .for_session(&session.id),
    )?;

    session.status = SessionStatus::Completed;
    session.completed_at = Some(now);
    Ok(split)
}

/// Accounts vanishing mid-settlement is an internal inconsistency, not a
/// caller error
async fn settlement_account(tx: &mut LedgerTx, id: &str) -> Result<Account> {
    tx.get::<Account>(id)
        .await?
        .ok_or_else(|| LedgerError::Internal(format!("Account '{}' missing during settlement", id)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::db::store::{Collection, Query};
    use crate::ledger::testing::{fund, memory_ledger};

    async fn engine_with_balances(mentee: i64) -> (SettlementEngine, Ledger) {
        let ledger = memory_ledger().await;
        if mentee > 0 {
            fund(&ledger, "alice", mentee).await;
        } else {
            ledger.open_account("alice", None).await.unwrap();
        }
        ledger.open_account("bob", None).await.unwrap();
        let engine = SettlementEngine::new(ledger.clone(), AuditLogger::new("test".into()));
        (engine, ledger)
    }

    fn request(hours: i64) -> SessionRequest {
        SessionRequest {
            mentee_id: "alice".into(),
            mentor_id: "bob".into(),
            skill: "Rust".into(),
            scheduled_at: Utc::now() + Duration::days(1),
            duration_hours: hours,
        }
    }

    async fn accepted_session(engine: &SettlementEngine) -> Session {
        let session = engine.request_session(request(1)).await.unwrap();
        engine
            .respond(&session.id, "bob", Decision::Accept, None)
            .await
            .unwrap()
    }

    async fn session_transactions(ledger: &Ledger, session_id: &str) -> Vec<TransactionRecord> {
        ledger
            .store()
            .find(
                Collection::Transactions,
                Query::new().where_eq("relatedSessionId", session_id),
            )
            .await
            .unwrap()
            .into_iter()
            .map(|d| bson::from_document(d).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_full_lifecycle_moves_coins() {
        let (engine, ledger) = engine_with_balances(50).await;

        let session = accepted_session(&engine).await;
        engine
            .attach_meeting_link(&session.id, "bob", "https://meet.example.com/abc")
            .await
            .unwrap();

        let first = engine.mark_complete(&session.id, "alice").await.unwrap();
        assert!(matches!(first, CompletionOutcome::Recorded { .. }));

        let second = engine.mark_complete(&session.id, "bob").await.unwrap();
        match second {
            CompletionOutcome::Settled { session, settlement } => {
                assert_eq!(session.status, SessionStatus::Completed);
                assert!(session.completed_at.is_some());
                assert_eq!(settlement.mentor_share, 8);
                assert_eq!(settlement.platform_share, 2);
            }
            other => panic!("expected settlement, got {:?}", other),
        }

        assert_eq!(ledger.read_account("alice").await.unwrap().balance, 40);
        assert_eq!(ledger.read_account("bob").await.unwrap().balance, 8);
        assert_eq!(ledger.read_account("platform").await.unwrap().balance, 2);
        assert_eq!(ledger.read_account("alice").await.unwrap().total_spent, 10);
        assert_eq!(ledger.read_account("bob").await.unwrap().total_earned, 8);

        let records = session_transactions(&ledger, &session.id).await;
        assert_eq!(records.len(), 3);
        assert_eq!(records.iter().map(|r| r.signed_amount()).sum::<i64>(), 0);
    }

    #[tokio::test]
    async fn test_complete_pending_session_is_invalid_state() {
        let (engine, _) = engine_with_balances(50).await;
        let session = engine.request_session(request(1)).await.unwrap();

        let err = engine.mark_complete(&session.id, "alice").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_completions_settle_once() {
        let (engine, ledger) = engine_with_balances(50).await;
        let engine = Arc::new(engine);
        let session = accepted_session(&engine).await;

        let a = {
            let engine = engine.clone();
            let id = session.id.clone();
            tokio::spawn(async move { engine.mark_complete(&id, "alice").await })
        };
        let b = {
            let engine = engine.clone();
            let id = session.id.clone();
            tokio::spawn(async move { engine.mark_complete(&id, "bob").await })
        };
        let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

        let settled = outcomes
            .iter()
            .filter(|o| matches!(o, CompletionOutcome::Settled { .. }))
            .count();
        assert_eq!(settled, 1);
        assert_eq!(session_transactions(&ledger, &session.id).await.len(), 3);
        assert_eq!(ledger.read_account("alice").await.unwrap().balance, 40);
        assert_eq!(ledger.read_account("platform").await.unwrap().balance, 2);
    }

    #[tokio::test]
    async fn test_marking_twice_is_idempotent() {
        let (engine, ledger) = engine_with_balances(50).await;
        let session = accepted_session(&engine).await;

        engine.mark_complete(&session.id, "bob").await.unwrap();
        let err = engine.mark_complete(&session.id, "bob").await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyMarked(_)));

        engine.mark_complete(&session.id, "alice").await.unwrap();
        let err = engine.mark_complete(&session.id, "alice").await.unwrap_err();
        assert!(err.is_idempotent_conflict());

        assert_eq!(ledger.read_account("alice").await.unwrap().balance, 40);
        assert_eq!(session_transactions(&ledger, &session.id).await.len(), 3);
    }

    #[tokio::test]
    async fn test_insufficient_funds_aborts_settlement() {
        let (engine, ledger) = engine_with_balances(5).await;
        let session = accepted_session(&engine).await;

        engine.mark_complete(&session.id, "alice").await.unwrap();
        let err = engine.mark_complete(&session.id, "bob").await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds { required: 10, available: 5, .. }
        ));

        // The mentor's mark was not recorded either
        let stored: Session = bson::from_document(
            ledger
                .store()
                .get(Collection::Sessions, &session.id)
                .await
                .unwrap()
                .unwrap()
                .doc,
        )
        .unwrap();
        assert_eq!(stored.status, SessionStatus::Accepted);
        assert!(!stored.mentor_completed);
        assert_eq!(ledger.read_account("alice").await.unwrap().balance, 5);
        assert_eq!(ledger.read_account("bob").await.unwrap().balance, 0);
        assert!(session_transactions(&ledger, &session.id).await.is_empty());
        assert_eq!(engine.audit.count(AuditKind::SettlementFailed).await, 1);
    }

    #[tokio::test]
    async fn test_only_participants_act() {
        let (engine, _) = engine_with_balances(50).await;
        let session = engine.request_session(request(2)).await.unwrap();
        assert_eq!(session.cost_coins, 20);

        let err = engine
            .respond(&session.id, "alice", Decision::Accept, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Permission(_)));

        engine
            .respond(&session.id, "bob", Decision::Accept, None)
            .await
            .unwrap();
        let err = engine.mark_complete(&session.id, "mallory").await.unwrap_err();
        assert!(matches!(err, LedgerError::Permission(_)));
    }

    #[tokio::test]
    async fn test_rejected_is_terminal() {
        let (engine, _) = engine_with_balances(50).await;
        let session = engine.request_session(request(1)).await.unwrap();
        let rejected = engine
            .respond(&session.id, "bob", Decision::Reject, None)
            .await
            .unwrap();
        assert_eq!(rejected.status, SessionStatus::Rejected);

        let err = engine
            .respond(&session.id, "bob", Decision::Accept, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_request_validation() {
        let (engine, _) = engine_with_balances(0).await;

        let mut own = request(1);
        own.mentor_id = "alice".into();
        assert!(matches!(
            engine.request_session(own).await,
            Err(LedgerError::Validation(_))
        ));

        let mut past = request(1);
        past.scheduled_at = Utc::now() - Duration::hours(1);
        assert!(matches!(
            engine.request_session(past).await,
            Err(LedgerError::Validation(_))
        ));

        let mut ghost = request(1);
        ghost.mentor_id = "nobody".into();
        assert!(matches!(
            engine.request_session(ghost).await,
            Err(LedgerError::NotFound(_))
        ));

        assert!(engine.request_session(request(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_meeting_link_rules() {
        let (engine, _) = engine_with_balances(0).await;
        let session = engine.request_session(request(1)).await.unwrap();

        // Not accepted yet
        let err = engine
            .attach_meeting_link(&session.id, "bob", "https://meet.example.com/x")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));

        let accepted = engine
            .respond(
                &session.id,
                "bob",
                Decision::Accept,
                Some("https://meet.example.com/x".into()),
            )
            .await
            .unwrap();
        assert_eq!(accepted.meeting_link.as_deref(), Some("https://meet.example.com/x"));

        let err = engine
            .attach_meeting_link(&session.id, "bob", "https://meet.example.com/y")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }

    #[test]
    fn test_link_validation() {
        assert!(validate_meeting_link("https://meet.example.com/room").is_ok());
        assert!(validate_meeting_link("http://meet.example.com/room").is_err());
        assert!(validate_meeting_link("javascript:alert(1)").is_err());
        assert!(validate_meeting_link("   ").is_err());
        assert!(validate_meeting_link("not a url").is_err());
    }
}
