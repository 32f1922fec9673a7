//! # Ports
//!
//! Contracts the review core depends on. Adapters in `storage-adapters`
//! implement the persistence and lock-store ports; `services` implements
//! the identifier and completion ports.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::errors::{DomainError, IdError, RepoError, StoreError};
use crate::models::{
    Post, PostId, PostReview, PostRevision, ReviewId, RevisionId, RevisionVote, Voter,
};

/// Source of the current wall-clock time.
#[cfg_attr(any(test, feature = "testing"), automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Mints unique 64-bit identifiers.
#[cfg_attr(any(test, feature = "testing"), automock)]
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Result<i64, IdError>;
}

/// The two atomic primitives the lock manager needs from the shared store.
///
/// Implementations must perform each call as a single atomic operation on the
/// store; no read-then-write from the client side.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait LockStore: Send + Sync {
    /// `SET key token NX PX ttl`. Returns `true` when the key was set.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Deletes `key` only if it currently holds `token`. Returns `true` when
    /// something was deleted.
    async fn delete_if_equals(&self, key: &str, token: &str) -> Result<bool, StoreError>;
}

/// Persistence boundary for posts, reviews, revisions and votes.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn find_post(&self, id: PostId) -> Result<Option<Post>, RepoError>;
    async fn find_review(&self, id: ReviewId) -> Result<Option<PostReview>, RepoError>;
    /// The review of `post_id` that is still `IN_REVIEW`, if any.
    async fn find_active_review(&self, post_id: PostId) -> Result<Option<PostReview>, RepoError>;
    async fn find_revision(&self, id: RevisionId) -> Result<Option<PostRevision>, RepoError>;
    async fn find_revisions(&self, review_id: ReviewId) -> Result<Vec<PostRevision>, RepoError>;
    /// Reviews with `status == IN_REVIEW && deadline < now`.
    async fn find_expired_reviews(&self, now: DateTime<Utc>) -> Result<Vec<PostReview>, RepoError>;
    async fn exists_vote(&self, revision_id: RevisionId, voter: &Voter) -> Result<bool, RepoError>;

    async fn save_post(&self, post: &Post) -> Result<(), RepoError>;
    async fn save_review(&self, review: &PostReview) -> Result<(), RepoError>;
    /// Stores a revision while its review is still `IN_REVIEW`, otherwise
    /// fails with `RepoError::ReviewClosed`.
    async fn save_revision(&self, revision: &PostRevision) -> Result<(), RepoError>;
    async fn save_vote(&self, vote: &RevisionVote) -> Result<(), RepoError>;

    /// Stores a post that just entered review together with its new review.
    async fn save_review_start(&self, post: &Post, review: &PostReview) -> Result<(), RepoError>;

    /// Stores the outcome of closing a review in one transaction.
    ///
    /// Fails with `RepoError::Conflict` unless the stored review is still
    /// `IN_REVIEW`, so a given review is closed at most once.
    async fn save_review_outcome(&self, post: &Post, review: &PostReview) -> Result<(), RepoError>;

    /// Inserts the vote and increments the revision's count atomically.
    /// A second vote by the same voter fails with `RepoError::Conflict`; a
    /// review that closed in the meantime fails with `RepoError::ReviewClosed`.
    async fn record_vote(&self, vote: &RevisionVote) -> Result<PostRevision, RepoError>;

    /// Removes the voter's vote and decrements the count, floored at zero.
    /// Fails with `RepoError::NotFound` when the voter has no vote and with
    /// `RepoError::ReviewClosed` once the review left `IN_REVIEW`.
    async fn remove_vote(&self, revision_id: RevisionId, voter: &Voter) -> Result<PostRevision, RepoError>;
}

/// Result of closing a review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub post: Post,
    pub review: PostReview,
    pub winner: Option<PostRevision>,
}

/// The completion transition, as seen by the deadline scheduler.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ReviewCompleter: Send + Sync {
    async fn complete(&self, review_id: ReviewId) -> Result<ReviewOutcome, DomainError>;
}
