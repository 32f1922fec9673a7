//! # Domain Models
//!
//! These structs represent the entities of the wiki review lifecycle.
//! Identifiers are Snowflake ids minted by the `IdGenerator` port.
//!
//! Records are never mutated in place: every transition returns the next
//! version of the record and leaves the current one untouched.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, Result};

/// Length of the review window, in hours.
pub const REVIEW_WINDOW_HOURS: i64 = 72;

/// The fixed review window as a chrono duration.
pub fn review_window() -> Duration {
    Duration::hours(REVIEW_WINDOW_HOURS)
}

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

snowflake_id!(
    /// Identity of a wiki post.
    PostId
);
snowflake_id!(
    /// Identity of a review round.
    ReviewId
);
snowflake_id!(
    /// Identity of a competing edit submitted during a review.
    RevisionId
);
snowflake_id!(
    /// Identity of a single vote.
    VoteId
);
snowflake_id!(
    /// Identity of a registered account (owned by the out-of-scope user module).
    UserId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostStatus {
    Draft,
    InReview,
    Reviewed,
    Deleted,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Draft => "DRAFT",
            PostStatus::InReview => "IN_REVIEW",
            PostStatus::Reviewed => "REVIEWED",
            PostStatus::Deleted => "DELETED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "DRAFT" => Some(PostStatus::Draft),
            "IN_REVIEW" => Some(PostStatus::InReview),
            "REVIEWED" => Some(PostStatus::Reviewed),
            "DELETED" => Some(PostStatus::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    InReview,
    Completed,
    Cancelled,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::InReview => "IN_REVIEW",
            ReviewStatus::Completed => "COMPLETED",
            ReviewStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "IN_REVIEW" => Some(ReviewStatus::InReview),
            "COMPLETED" => Some(ReviewStatus::Completed),
            "CANCELLED" => Some(ReviewStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wiki article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub body: String,
    pub status: PostStatus,
    pub tags: Vec<String>,
    pub author_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn draft(
        id: PostId,
        title: impl Into<String>,
        body: impl Into<String>,
        tags: Vec<String>,
        author_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::Validation("post title must not be empty".into()));
        }
        Ok(Self {
            id,
            title,
            body: body.into(),
            status: PostStatus::Draft,
            tags,
            author_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replaces title and body. Only drafts are editable.
    pub fn edited(&self, title: impl Into<String>, body: impl Into<String>, now: DateTime<Utc>) -> Result<Self> {
        match self.status {
            PostStatus::Draft => {}
            PostStatus::InReview | PostStatus::Reviewed => {
                return Err(DomainError::ContentLocked {
                    post_id: self.id.get(),
                    status: self.status.as_str(),
                })
            }
            PostStatus::Deleted => return Err(self.illegal("edit")),
        }
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::Validation("post title must not be empty".into()));
        }
        Ok(Self {
            title,
            body: body.into(),
            updated_at: now,
            ..self.clone()
        })
    }

    /// `DRAFT` -> `IN_REVIEW`.
    pub fn entering_review(&self, now: DateTime<Utc>) -> Result<Self> {
        if self.status != PostStatus::Draft {
            return Err(self.illegal("start a review of"));
        }
        Ok(self.with_status(PostStatus::InReview, now))
    }

    /// `IN_REVIEW` -> `REVIEWED`, adopting the winning revision's content.
    pub fn reviewed_with(&self, winner: &PostRevision, now: DateTime<Utc>) -> Result<Self> {
        if self.status != PostStatus::InReview {
            return Err(self.illegal("complete the review of"));
        }
        Ok(Self {
            title: winner.title.clone(),
            body: winner.body.clone(),
            status: PostStatus::Reviewed,
            updated_at: now,
            ..self.clone()
        })
    }

    /// Explicit return to `DRAFT`, from `REVIEWED` or from an abandoned review.
    pub fn back_to_draft(&self, now: DateTime<Utc>) -> Result<Self> {
        match self.status {
            PostStatus::Reviewed | PostStatus::InReview => Ok(self.with_status(PostStatus::Draft, now)),
            PostStatus::Draft | PostStatus::Deleted => Err(self.illegal("return to draft")),
        }
    }

    /// Any live status -> `DELETED` (terminal).
    pub fn deleted(&self, now: DateTime<Utc>) -> Result<Self> {
        if self.status == PostStatus::Deleted {
            return Err(self.illegal("delete"));
        }
        Ok(self.with_status(PostStatus::Deleted, now))
    }

    fn with_status(&self, status: PostStatus, now: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at: now,
            ..self.clone()
        }
    }

    fn illegal(&self, action: &'static str) -> DomainError {
        DomainError::InvalidTransition {
            entity: "post",
            id: self.id.get(),
            status: self.status.as_str(),
            action,
        }
    }
}

/// A time-boxed review round of one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReview {
    pub id: ReviewId,
    pub post_id: PostId,
    pub initiator_id: Option<UserId>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: ReviewStatus,
    pub winning_revision_id: Option<RevisionId>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PostReview {
    pub fn open(id: ReviewId, post_id: PostId, initiator_id: Option<UserId>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            post_id,
            initiator_id,
            started_at: now,
            deadline: now + review_window(),
            status: ReviewStatus::InReview,
            winning_revision_id: None,
            closed_at: None,
        }
    }

    /// True only while still `IN_REVIEW` and strictly past the deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReviewStatus::InReview && now > self.deadline
    }

    /// Revisions and votes are accepted up to and including the deadline.
    pub fn accepts_contributions(&self, now: DateTime<Utc>) -> bool {
        self.status == ReviewStatus::InReview && now <= self.deadline
    }

    /// `IN_REVIEW` -> `COMPLETED`.
    pub fn completed(&self, winning_revision_id: Option<RevisionId>, now: DateTime<Utc>) -> Result<Self> {
        self.close(ReviewStatus::Completed, winning_revision_id, "complete", now)
    }

    /// `IN_REVIEW` -> `CANCELLED`.
    pub fn cancelled(&self, now: DateTime<Utc>) -> Result<Self> {
        self.close(ReviewStatus::Cancelled, None, "cancel", now)
    }

    fn close(
        &self,
        status: ReviewStatus,
        winning_revision_id: Option<RevisionId>,
        action: &'static str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if self.status != ReviewStatus::InReview {
            return Err(DomainError::InvalidTransition {
                entity: "review",
                id: self.id.get(),
                status: self.status.as_str(),
                action,
            });
        }
        Ok(Self {
            status,
            winning_revision_id,
            closed_at: Some(now),
            ..self.clone()
        })
    }
}

/// A competing edit proposed during a review window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRevision {
    pub id: RevisionId,
    pub review_id: ReviewId,
    /// `None` for anonymous contributions.
    pub author_id: Option<UserId>,
    pub title: String,
    pub body: String,
    pub submitted_at: DateTime<Utc>,
    pub vote_count: u32,
}

impl PostRevision {
    pub fn submit(
        id: RevisionId,
        review_id: ReviewId,
        author_id: Option<UserId>,
        title: impl Into<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::Validation("revision title must not be empty".into()));
        }
        Ok(Self {
            id,
            review_id,
            author_id,
            title,
            body: body.into(),
            submitted_at: now,
            vote_count: 0,
        })
    }

    pub fn with_vote_added(&self) -> Self {
        Self {
            vote_count: self.vote_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Decrement floored at zero.
    pub fn with_vote_removed(&self) -> Self {
        Self {
            vote_count: self.vote_count.saturating_sub(1),
            ..self.clone()
        }
    }
}

/// Who cast a vote.
///
/// Anonymous voters are de-duplicated by a caller-supplied key (for example a
/// salted hash of the client address) since they have no account id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Voter {
    Member(UserId),
    Anonymous(String),
}

impl Voter {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Voter::Member(id) => Some(*id),
            Voter::Anonymous(_) => None,
        }
    }

    /// Key used for the one-vote-per-revision uniqueness check.
    pub fn dedup_key(&self) -> String {
        match self {
            Voter::Member(id) => format!("user:{id}"),
            Voter::Anonymous(key) => format!("anon:{key}"),
        }
    }
}

impl fmt::Display for Voter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dedup_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionVote {
    pub id: VoteId,
    pub revision_id: RevisionId,
    pub voter: Voter,
    pub cast_at: DateTime<Utc>,
}

impl RevisionVote {
    pub fn cast(id: VoteId, revision_id: RevisionId, voter: Voter, now: DateTime<Utc>) -> Self {
        Self {
            id,
            revision_id,
            voter,
            cast_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    fn draft() -> Post {
        Post::draft(PostId(1), "Rust", "ownership", vec!["lang".into()], None, at(0)).unwrap()
    }

    #[test]
    fn open_review_deadline_is_start_plus_window() {
        let review = PostReview::open(ReviewId(2), PostId(1), None, at(0));
        assert_eq!(review.deadline - review.started_at, Duration::hours(72));
        assert_eq!(review.status, ReviewStatus::InReview);
    }

    #[test]
    fn expiry_requires_in_review_and_strictly_after_deadline() {
        let review = PostReview::open(ReviewId(2), PostId(1), None, at(0));
        assert!(!review.is_expired(review.deadline));
        assert!(review.accepts_contributions(review.deadline));
        let later = review.deadline + Duration::milliseconds(1);
        assert!(review.is_expired(later));
        assert!(!review.accepts_contributions(later));

        let completed = review.completed(None, later).unwrap();
        assert!(!completed.is_expired(later + Duration::days(30)));
        let cancelled = review.cancelled(later).unwrap();
        assert!(!cancelled.is_expired(later + Duration::days(30)));
    }

    #[test]
    fn completed_review_cannot_change_again() {
        let review = PostReview::open(ReviewId(2), PostId(1), None, at(0));
        let done = review.completed(Some(RevisionId(9)), at(1)).unwrap();
        assert!(matches!(
            done.completed(None, at(2)),
            Err(DomainError::InvalidTransition { entity: "review", .. })
        ));
        assert!(done.cancelled(at(2)).is_err());
        assert_eq!(done.winning_revision_id, Some(RevisionId(9)));
    }

    #[test]
    fn post_transitions_leave_previous_version_untouched() {
        let post = draft();
        let in_review = post.entering_review(at(1)).unwrap();
        assert_eq!(post.status, PostStatus::Draft);
        assert_eq!(in_review.status, PostStatus::InReview);
        assert_eq!(in_review.updated_at, at(1));
        assert!(in_review.entering_review(at(2)).is_err());
    }

    #[test]
    fn reviewed_post_content_is_locked() {
        let revision = PostRevision::submit(RevisionId(5), ReviewId(2), None, "Rust 2", "borrowing", at(1)).unwrap();
        let reviewed = draft()
            .entering_review(at(1))
            .unwrap()
            .reviewed_with(&revision, at(2))
            .unwrap();
        assert_eq!(reviewed.title, "Rust 2");
        assert!(matches!(
            reviewed.edited("x", "y", at(3)),
            Err(DomainError::ContentLocked { status: "REVIEWED", .. })
        ));
        let redraft = reviewed.back_to_draft(at(3)).unwrap();
        assert_eq!(redraft.edited("x", "y", at(4)).unwrap().title, "x");
    }

    #[test]
    fn deleted_is_terminal() {
        let gone = draft().deleted(at(1)).unwrap();
        assert!(gone.deleted(at(2)).is_err());
        assert!(gone.back_to_draft(at(2)).is_err());
        assert!(matches!(gone.edited("a", "b", at(2)), Err(DomainError::InvalidTransition { .. })));
    }

    #[test]
    fn vote_count_floors_at_zero() {
        let revision = PostRevision::submit(RevisionId(5), ReviewId(2), None, "t", "b", at(1)).unwrap();
        assert_eq!(revision.with_vote_removed().vote_count, 0);
        assert_eq!(revision.with_vote_added().with_vote_added().with_vote_removed().vote_count, 1);
    }

    #[test]
    fn empty_title_is_rejected() {
        assert!(matches!(
            Post::draft(PostId(1), "  ", "", vec![], None, at(0)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn statuses_serialize_in_screaming_case() {
        assert_eq!(serde_json::to_value(PostStatus::InReview).unwrap(), "IN_REVIEW");
        assert_eq!(serde_json::to_value(ReviewStatus::Cancelled).unwrap(), "CANCELLED");
        assert_eq!(ReviewStatus::parse("COMPLETED"), Some(ReviewStatus::Completed));
        assert_eq!(PostStatus::parse("bogus"), None);
    }

    #[test]
    fn voter_dedup_keys_do_not_collide_across_kinds() {
        assert_ne!(Voter::Member(UserId(7)).dedup_key(), Voter::Anonymous("7".into()).dedup_key());
        assert_eq!(Voter::Anonymous("abc".into()).user_id(), None);
    }
}
