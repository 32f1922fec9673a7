//! # Review lifecycle engine
//!
//! Drives posts through `DRAFT -> IN_REVIEW -> REVIEWED` and their reviews
//! through `IN_REVIEW -> COMPLETED | CANCELLED`.
//!
//! Completion picks the revision with the most votes (ties: earliest
//! submission, then lowest id). A review with no revisions still completes,
//! and its post goes back to `DRAFT` with the content it had.

use std::sync::Arc;

use async_trait::async_trait;
use domains::voting::{ranked, select_winner};
use domains::{
    Clock, DomainError, IdGenerator, Post, PostId, PostReview, PostRevision, PostStatus, RepoError,
    Result, ReviewCompleter, ReviewId, ReviewOutcome, ReviewRepository, RevisionId, RevisionVote, UserId,
    VoteId, Voter,
};
use tracing::{info, instrument};

pub struct ReviewService {
    repo: Arc<dyn ReviewRepository>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl ReviewService {
    pub fn new(repo: Arc<dyn ReviewRepository>, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, ids, clock }
    }

    // ── Posts ───────────────────────────────────────────────────────────────

    pub async fn create_draft(
        &self,
        title: &str,
        body: &str,
        tags: Vec<String>,
        author_id: Option<UserId>,
    ) -> Result<Post> {
        let post = Post::draft(PostId(self.ids.next_id()?), title, body, tags, author_id, self.clock.now())?;
        self.repo.save_post(&post).await?;
        Ok(post)
    }

    pub async fn edit_draft(&self, post_id: PostId, title: &str, body: &str) -> Result<Post> {
        let post = self.load_post(post_id).await?.edited(title, body, self.clock.now())?;
        self.repo.save_post(&post).await?;
        Ok(post)
    }

    /// `REVIEWED` -> `DRAFT`. Posts still in review go back through
    /// [`ReviewService::cancel_review`] instead.
    pub async fn back_to_draft(&self, post_id: PostId) -> Result<Post> {
        let post = self.load_post(post_id).await?;
        if post.status != PostStatus::Reviewed {
            return Err(DomainError::InvalidTransition {
                entity: "post",
                id: post_id.get(),
                status: post.status.as_str(),
                action: "return to draft",
            });
        }
        let post = post.back_to_draft(self.clock.now())?;
        self.repo.save_post(&post).await?;
        Ok(post)
    }

    /// Deletes a post, cancelling its active review in the same save.
    pub async fn delete_post(&self, post_id: PostId) -> Result<Post> {
        let now = self.clock.now();
        let post = self.load_post(post_id).await?.deleted(now)?;
        match self.repo.find_active_review(post_id).await? {
            Some(review) => {
                let review = review.cancelled(now)?;
                self.repo.save_review_outcome(&post, &review).await?;
                info!(post_id = %post_id, review_id = %review.id, "deleted post and cancelled its review");
            }
            None => self.repo.save_post(&post).await?,
        }
        Ok(post)
    }

    // ── Reviews ─────────────────────────────────────────────────────────────

    /// Opens a review of a draft: deadline is now + 72h.
    #[instrument(skip_all, fields(post_id = %post_id))]
    pub async fn start_review(&self, post_id: PostId, initiator_id: Option<UserId>) -> Result<(Post, PostReview)> {
        let now = self.clock.now();
        let post = self.load_post(post_id).await?.entering_review(now)?;
        if let Some(active) = self.repo.find_active_review(post_id).await? {
            return Err(DomainError::InvalidTransition {
                entity: "post",
                id: post_id.get(),
                status: active.status.as_str(),
                action: "open a second review of",
            });
        }
        let review = PostReview::open(ReviewId(self.ids.next_id()?), post_id, initiator_id, now);
        self.repo.save_review_start(&post, &review).await?;
        info!(review_id = %review.id, deadline = %review.deadline, "review started");
        Ok((post, review))
    }

    pub async fn submit_revision(
        &self,
        review_id: ReviewId,
        title: &str,
        body: &str,
        author_id: Option<UserId>,
    ) -> Result<PostRevision> {
        let now = self.clock.now();
        let review = self.load_review(review_id).await?;
        if !review.accepts_contributions(now) {
            return Err(DomainError::ReviewClosed {
                review_id: review_id.get(),
            });
        }
        let revision = PostRevision::submit(RevisionId(self.ids.next_id()?), review_id, author_id, title, body, now)?;
        self.repo.save_revision(&revision).await.map_err(contribution_error)?;
        Ok(revision)
    }

    /// Records one vote per voter per revision and returns the updated revision.
    pub async fn cast_vote(&self, revision_id: RevisionId, voter: Voter) -> Result<PostRevision> {
        let now = self.clock.now();
        self.open_revision(revision_id, now).await?;

        if self.repo.exists_vote(revision_id, &voter).await? {
            return Err(DomainError::DuplicateVote {
                revision_id: revision_id.get(),
                voter: voter.dedup_key(),
            });
        }

        let vote = RevisionVote::cast(VoteId(self.ids.next_id()?), revision_id, voter, now);
        match self.repo.record_vote(&vote).await {
            Ok(updated) => Ok(updated),
            // Lost a race with a concurrent vote by the same voter.
            Err(RepoError::Conflict(_)) => Err(DomainError::DuplicateVote {
                revision_id: revision_id.get(),
                voter: vote.voter.dedup_key(),
            }),
            Err(e) => Err(contribution_error(e)),
        }
    }

    pub async fn retract_vote(&self, revision_id: RevisionId, voter: Voter) -> Result<PostRevision> {
        self.open_revision(revision_id, self.clock.now()).await?;
        match self.repo.remove_vote(revision_id, &voter).await {
            Ok(updated) => Ok(updated),
            Err(RepoError::NotFound { .. }) => Err(DomainError::VoteNotFound {
                revision_id: revision_id.get(),
                voter: voter.dedup_key(),
            }),
            Err(e) => Err(contribution_error(e)),
        }
    }

    /// Revisions of a review, best ranked first.
    pub async fn revisions(&self, review_id: ReviewId) -> Result<Vec<PostRevision>> {
        Ok(ranked(self.repo.find_revisions(review_id).await?))
    }

    /// Closes an `IN_REVIEW` review and applies the winning revision.
    #[instrument(skip_all, fields(review_id = %review_id))]
    pub async fn complete(&self, review_id: ReviewId) -> Result<ReviewOutcome> {
        let now = self.clock.now();
        let review = self.load_review(review_id).await?;
        let revisions = self.repo.find_revisions(review_id).await?;
        let winner = select_winner(&revisions).cloned();

        let review = review.completed(winner.as_ref().map(|w| w.id), now)?;
        let post = self.load_post(review.post_id).await?;
        let post = match &winner {
            Some(winner) => post.reviewed_with(winner, now)?,
            None => post.back_to_draft(now)?,
        };

        self.repo.save_review_outcome(&post, &review).await?;
        info!(
            post_id = %post.id,
            winning_revision_id = ?review.winning_revision_id,
            revisions = revisions.len(),
            post_status = %post.status,
            "review completed"
        );
        Ok(ReviewOutcome { post, review, winner })
    }

    /// `IN_REVIEW` -> `CANCELLED`; the post returns to `DRAFT` unchanged.
    pub async fn cancel_review(&self, review_id: ReviewId) -> Result<(Post, PostReview)> {
        let now = self.clock.now();
        let review = self.load_review(review_id).await?.cancelled(now)?;
        let post = self.load_post(review.post_id).await?.back_to_draft(now)?;
        self.repo.save_review_outcome(&post, &review).await?;
        info!(review_id = %review_id, post_id = %post.id, "review cancelled");
        Ok((post, review))
    }

    // ── Loading ─────────────────────────────────────────────────────────────

    async fn load_post(&self, id: PostId) -> Result<Post> {
        self.repo.find_post(id).await?.ok_or(DomainError::NotFound {
            entity: "post",
            id: id.get(),
        })
    }

    async fn load_review(&self, id: ReviewId) -> Result<PostReview> {
        self.repo.find_review(id).await?.ok_or(DomainError::NotFound {
            entity: "review",
            id: id.get(),
        })
    }

    /// Loads a revision whose review still accepts votes.
    async fn open_revision(&self, id: RevisionId, now: chrono::DateTime<chrono::Utc>) -> Result<PostRevision> {
        let revision = self.repo.find_revision(id).await?.ok_or(DomainError::NotFound {
            entity: "revision",
            id: id.get(),
        })?;
        let review = self.load_review(revision.review_id).await?;
        if !review.accepts_contributions(now) {
            return Err(DomainError::ReviewClosed {
                review_id: review.id.get(),
            });
        }
        Ok(revision)
    }
}

/// The review closed between the contribution check and the write.
fn contribution_error(e: RepoError) -> DomainError {
    match e {
        RepoError::ReviewClosed { review_id } => DomainError::ReviewClosed { review_id },
        other => other.into(),
    }
}

#[async_trait]
impl ReviewCompleter for ReviewService {
    async fn complete(&self, review_id: ReviewId) -> Result<ReviewOutcome> {
        ReviewService::complete(self, review_id).await
    }
}
