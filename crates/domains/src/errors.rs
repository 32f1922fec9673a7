//! # Errors
//!
//! Error taxonomy for the review core. Each layer has its own enum so callers
//! can tell apart contention, infrastructure failures and broken domain rules.

use std::time::Duration;

use thiserror::Error;

/// Failures of the Snowflake identifier generator.
///
/// All of these are fatal: the generator never retries internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Node id outside the 10-bit range, rejected at construction.
    #[error("node id {0} is outside 0..=1023")]
    InvalidNodeId(i64),

    /// Wall clock moved backwards since the last issued id.
    #[error("clock moved backwards: last issued at {last_ms}ms, now {now_ms}ms")]
    ClockRegressed { last_ms: i64, now_ms: i64 },

    /// Wall clock reads earlier than the configured epoch.
    #[error("clock reads {now_ms}ms which is before the epoch {epoch_ms}ms")]
    ClockBeforeEpoch { now_ms: i64, epoch_ms: i64 },

    /// The 41-bit timestamp field is exhausted for this epoch.
    #[error("timestamp exceeds the 41-bit range of the id layout")]
    TimestampOverflow,
}

/// Failure talking to the shared lock store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("lock store unavailable: {0}")]
    Unavailable(String),
}

/// Lock manager outcomes that are not a successful acquisition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Contention: the key stayed held for the whole wait budget.
    #[error("lock '{key}' unavailable after waiting {waited:?}")]
    Unavailable { key: String, waited: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persistence boundary failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    /// A uniqueness constraint or an optimistic status guard was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A revision or vote write found its review no longer `IN_REVIEW`.
    #[error("review {review_id} is no longer IN_REVIEW")]
    ReviewClosed { review_id: i64 },

    /// Infrastructure failure (connection dropped, query failed).
    #[error("repository backend error: {0}")]
    Backend(String),
}

/// Domain-rule violations raised by the review lifecycle engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The requested transition is not legal from the current status.
    #[error("cannot {action} {entity} {id} while it is {status}")]
    InvalidTransition {
        entity: &'static str,
        id: i64,
        status: &'static str,
        action: &'static str,
    },

    /// Review is no longer accepting revisions or votes.
    #[error("review {review_id} is closed for contributions")]
    ReviewClosed { review_id: i64 },

    #[error("voter {voter} already voted on revision {revision_id}")]
    DuplicateVote { revision_id: i64, voter: String },

    #[error("voter {voter} has no vote on revision {revision_id}")]
    VoteNotFound { revision_id: i64, voter: String },

    /// Title and body can only change while the post is a draft.
    #[error("post {post_id} content is locked while {status}")]
    ContentLocked { post_id: i64, status: &'static str },

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Repository(#[from] RepoError),
}

impl DomainError {
    /// True when the error reports a review that was already settled,
    /// which is what a late scheduler instance observes after losing a race.
    pub fn is_already_settled(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidTransition {
                entity: "review",
                ..
            } | DomainError::Repository(RepoError::Conflict(_))
        )
    }
}

/// A specialized Result type for review logic.
pub type Result<T> = std::result::Result<T, DomainError>;
