//! Review aggregator
//!
//! Folds a mentee's review into the mentor's running rating. The review,
//! the aggregate update and the session's `feedbackSubmitted` flag commit
//! together, and the aggregate is always recomputed from the account as
//! read inside the unit, so concurrent reviews for the same mentor cannot
//! lose an update.

use tracing::info;

use crate::db::schemas::{Account, Review, Session, SessionStatus};
use crate::db::store::{Collection, Query, SortOrder};
use crate::ledger::Ledger;
use crate::logging::{AuditKind, AuditLogger};
use crate::services::pricing::MIN_REVIEW_CHARS;
use crate::types::{LedgerError, Result};

const MAX_REVIEW_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct ReviewSubmission {
    pub session_id: String,
    /// The caller; must be the session's mentee
    pub mentee_id: String,
    pub mentor_id: String,
    pub rating: i32,
    pub text: String,
}

impl ReviewSubmission {
    /// Shape checks that need no stored state. Returns the trimmed text.
    fn validate(&self) -> Result<String> {
        if !(1..=5).contains(&self.rating) {
            return Err(LedgerError::Validation(format!(
                "Rating must be between 1 and 5, got {}",
                self.rating
            )));
        }
        let text = self.text.trim();
        let chars = text.chars().count();
        if chars < MIN_REVIEW_CHARS {
            return Err(LedgerError::Validation(format!(
                "Review must be at least {} characters",
                MIN_REVIEW_CHARS
            )));
        }
        if chars > MAX_REVIEW_CHARS {
            return Err(LedgerError::Validation(format!(
                "Review must be at most {} characters",
                MAX_REVIEW_CHARS
            )));
        }
        Ok(text.to_string())
    }
}

#[derive(Clone)]
pub struct ReviewAggregator {
    ledger: Ledger,
    audit: AuditLogger,
}

impl ReviewAggregator {
    pub fn new(ledger: Ledger, audit: AuditLogger) -> Self {
        Self { ledger, audit }
    }

    /// Record a review and fold it into the mentor's rating, exactly once
    /// per session
    pub async fn submit_review(&self, submission: ReviewSubmission) -> Result<(Review, Account)> {
        let text = submission.validate()?;

        let (review, mentor) = self
            .ledger
            .atomic("submit_review", move |tx| {
                let submission = submission.clone();
                let text = text.clone();
                Box::pin(async move {
                    let mut session: Session = tx.require(&submission.session_id).await?;
                    if session.mentee_id != submission.mentee_id {
                        return Err(LedgerError::Permission(
                            "Only the mentee can review this session".into(),
                        ));
                    }
                    if session.status != SessionStatus::Completed {
                        return Err(LedgerError::InvalidState(format!(
                            "Session is {}, not completed",
                            session.status
                        )));
                    }
                    if session.feedback_submitted {
                        return Err(LedgerError::DuplicateReview(format!(
                            "Session {} has already been reviewed",
                            session.id
                        )));
                    }
                    if session.mentor_id != submission.mentor_id {
                        return Err(LedgerError::Validation(
                            "Mentor does not match the session".into(),
                        ));
                    }

                    let now = tx.now();
                    let review = Review {
                        id: Review::id_for_session(&session.id),
                        session_id: session.id.clone(),
                        mentor_id: session.mentor_id.clone(),
                        mentee_id: session.mentee_id.clone(),
                        rating: submission.rating,
                        text,
                        created_at: now,
                    };
                    tx.insert(&review)?;

                    let mut mentor: Account = tx.get(&session.mentor_id).await?.ok_or_else(|| {
                        LedgerError::Internal(format!(
                            "Mentor account '{}' missing",
                            session.mentor_id
                        ))
                    })?;
                    mentor.set_aggregate(mentor.aggregate().fold(submission.rating));
                    mentor.updated_at = now;
                    tx.put(&mentor)?;

                    session.feedback_submitted = true;
                    session.updated_at = now;
                    tx.put(&session)?;

                    Ok((review, mentor))
                })
            })
            .await?;

        info!(
            session_id = %review.session_id,
            mentor = %mentor.id,
            rating = review.rating,
            new_rating = mentor.rating,
            review_count = mentor.review_count,
            "Review recorded"
        );
        self.audit
            .log(
                self.audit
                    .event(AuditKind::ReviewRecorded)
                    .with_account(&mentor.id)
                    .with_session(&review.session_id)
                    .with_metadata(serde_json::json!({
                        "rating": review.rating,
                        "newRating": mentor.rating,
                        "reviewCount": mentor.review_count,
                    })),
            )
            .await;

        Ok((review, mentor))
    }

    /// A mentor's reviews, newest first
    pub async fn reviews_for_mentor(&self, mentor_id: &str, limit: usize) -> Result<Vec<Review>> {
        let query = Query::new()
            .where_eq("mentorId", mentor_id)
            .sort_by("createdAt", SortOrder::Descending)
            .limit(limit);
        self.ledger
            .store()
            .find(Collection::Reviews, query)
            .await?
            .into_iter()
            .map(|doc| bson::from_document(doc).map_err(LedgerError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::ledger::testing::{fund, memory_ledger};
    use crate::services::settlement::{Decision, SessionRequest, SettlementEngine};

    struct Fixture {
        ledger: Ledger,
        engine: SettlementEngine,
        reviews: ReviewAggregator,
    }

    async fn fixture() -> Fixture {
        let ledger = memory_ledger().await;
        fund(&ledger, "alice", 100).await;
        fund(&ledger, "carol", 100).await;
        ledger.open_account("bob", None).await.unwrap();
        let audit = AuditLogger::new("test".into());
        Fixture {
            engine: SettlementEngine::new(ledger.clone(), audit.clone()),
            reviews: ReviewAggregator::new(ledger.clone(), audit),
            ledger,
        }
    }

    async fn completed_session(f: &Fixture, mentee: &str) -> String {
        let session = f
            .engine
            .request_session(SessionRequest {
                mentee_id: mentee.into(),
                mentor_id: "bob".into(),
                skill: "Guitar".into(),
                scheduled_at: Utc::now() + Duration::hours(2),
                duration_hours: 1,
            })
            .await
            .unwrap();
        f.engine
            .respond(&session.id, "bob", Decision::Accept, None)
            .await
            .unwrap();
        f.engine.mark_complete(&session.id, mentee).await.unwrap();
        f.engine.mark_complete(&session.id, "bob").await.unwrap();
        session.id
    }

    fn submission(session_id: &str, mentee: &str, rating: i32) -> ReviewSubmission {
        ReviewSubmission {
            session_id: session_id.into(),
            mentee_id: mentee.into(),
            mentor_id: "bob".into(),
            rating,
            text: "Clear explanations, very patient".into(),
        }
    }

    /// Give bob a prior aggregate of 4.0 over two reviews
    async fn seed_prior_rating(ledger: &Ledger) {
        ledger
            .atomic("seed", |tx| {
                Box::pin(async move {
                    let mut bob: Account = tx.require("bob").await?;
                    bob.rating = 4.0;
                    bob.review_count = 2;
                    bob.total_rating = 8;
                    tx.put(&bob)
                })
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_review_updates_running_mean() {
        let f = fixture().await;
        seed_prior_rating(&f.ledger).await;
        let session_id = completed_session(&f, "alice").await;

        let (review, mentor) = f
            .reviews
            .submit_review(submission(&session_id, "alice", 3))
            .await
            .unwrap();

        assert_eq!(review.id, Review::id_for_session(&session_id));
        assert_eq!(mentor.review_count, 3);
        assert!((mentor.rating - 11.0 / 3.0).abs() < 1e-9);

        let stored = f.ledger.read_account("bob").await.unwrap();
        assert!((stored.rating - 3.667).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_second_review_is_duplicate() {
        let f = fixture().await;
        let session_id = completed_session(&f, "alice").await;

        f.reviews
            .submit_review(submission(&session_id, "alice", 5))
            .await
            .unwrap();
        let err = f
            .reviews
            .submit_review(submission(&session_id, "alice", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateReview(_)));

        let bob = f.ledger.read_account("bob").await.unwrap();
        assert_eq!(bob.review_count, 1);
        assert_eq!(bob.rating, 5.0);
    }

    #[tokio::test]
    async fn test_review_preconditions() {
        let f = fixture().await;
        let session_id = completed_session(&f, "alice").await;

        let err = f
            .reviews
            .submit_review(submission(&session_id, "bob", 4))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Permission(_)));

        let mut wrong_mentor = submission(&session_id, "alice", 4);
        wrong_mentor.mentor_id = "carol".into();
        assert!(matches!(
            f.reviews.submit_review(wrong_mentor).await,
            Err(LedgerError::Validation(_))
        ));

        let mut short = submission(&session_id, "alice", 4);
        short.text = "  great   ".into();
        assert!(matches!(
            f.reviews.submit_review(short).await,
            Err(LedgerError::Validation(_))
        ));

        assert!(matches!(
            f.reviews.submit_review(submission(&session_id, "alice", 6)).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_review_requires_completed_session() {
        let f = fixture().await;
        let session = f
            .engine
            .request_session(SessionRequest {
                mentee_id: "alice".into(),
                mentor_id: "bob".into(),
                skill: "Chess".into(),
                scheduled_at: Utc::now() + Duration::hours(1),
                duration_hours: 1,
            })
            .await
            .unwrap();

        let err = f
            .reviews
            .submit_review(submission(&session.id, "alice", 4))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reviews_for_one_mentor_lose_nothing() {
        let f = fixture().await;
        let first = completed_session(&f, "alice").await;
        let second = completed_session(&f, "carol").await;
        let reviews = Arc::new(f.reviews.clone());

        let a = {
            let reviews = reviews.clone();
            tokio::spawn(async move { reviews.submit_review(submission(&first, "alice", 5)).await })
        };
        let b = {
            let reviews = reviews.clone();
            tokio::spawn(async move { reviews.submit_review(submission(&second, "carol", 2)).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let bob = f.ledger.read_account("bob").await.unwrap();
        assert_eq!(bob.review_count, 2);
        assert_eq!(bob.total_rating, 7);
        assert!((bob.rating - 3.5).abs() < 1e-9);

        let listed = f.reviews.reviews_for_mentor("bob", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
    }
}
