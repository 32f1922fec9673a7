//! In-memory implementation of `ReviewRepository`.
//!
//! All tables sit behind one `RwLock`, which makes every composite save
//! atomic. State is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    Post, PostId, PostReview, PostRevision, RepoError, ReviewId, ReviewRepository, ReviewStatus, RevisionId,
    RevisionVote, Voter,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    posts: HashMap<PostId, Post>,
    reviews: HashMap<ReviewId, PostReview>,
    revisions: HashMap<RevisionId, PostRevision>,
    /// Keyed by (revision, voter dedup key): one vote per voter per revision.
    votes: HashMap<(RevisionId, String), RevisionVote>,
}

impl Tables {
    fn active_review(&self, post_id: PostId) -> Option<&PostReview> {
        self.reviews
            .values()
            .find(|review| review.post_id == post_id && review.status == ReviewStatus::InReview)
    }

    /// Contributions are only written while their review is `IN_REVIEW`.
    fn ensure_open(&self, review_id: ReviewId) -> Result<(), RepoError> {
        match self.reviews.get(&review_id) {
            None => Err(RepoError::NotFound {
                entity: "review",
                id: review_id.get(),
            }),
            Some(review) if review.status != ReviewStatus::InReview => Err(RepoError::ReviewClosed {
                review_id: review_id.get(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn revision(&self, id: RevisionId) -> Result<&PostRevision, RepoError> {
        self.revisions.get(&id).ok_or(RepoError::NotFound {
            entity: "revision",
            id: id.get(),
        })
    }
}

#[derive(Default)]
pub struct InMemoryReviewRepository {
    tables: RwLock<Tables>,
}

impl InMemoryReviewRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of votes stored for a revision.
    pub async fn vote_count(&self, revision_id: RevisionId) -> usize {
        let tables = self.tables.read().await;
        tables.votes.keys().filter(|(id, _)| *id == revision_id).count()
    }
}

#[async_trait]
impl ReviewRepository for InMemoryReviewRepository {
    async fn find_post(&self, id: PostId) -> Result<Option<Post>, RepoError> {
        Ok(self.tables.read().await.posts.get(&id).cloned())
    }

    async fn find_review(&self, id: ReviewId) -> Result<Option<PostReview>, RepoError> {
        Ok(self.tables.read().await.reviews.get(&id).cloned())
    }

    async fn find_active_review(&self, post_id: PostId) -> Result<Option<PostReview>, RepoError> {
        Ok(self.tables.read().await.active_review(post_id).cloned())
    }

    async fn find_revision(&self, id: RevisionId) -> Result<Option<PostRevision>, RepoError> {
        Ok(self.tables.read().await.revisions.get(&id).cloned())
    }

    async fn find_revisions(&self, review_id: ReviewId) -> Result<Vec<PostRevision>, RepoError> {
        let tables = self.tables.read().await;
        let mut revisions: Vec<_> = tables
            .revisions
            .values()
            .filter(|revision| revision.review_id == review_id)
            .cloned()
            .collect();
        revisions.sort_by_key(|revision| (revision.submitted_at, revision.id));
        Ok(revisions)
    }

    async fn find_expired_reviews(&self, now: DateTime<Utc>) -> Result<Vec<PostReview>, RepoError> {
        let tables = self.tables.read().await;
        let mut expired: Vec<_> = tables
            .reviews
            .values()
            .filter(|review| review.status == ReviewStatus::InReview && review.deadline < now)
            .cloned()
            .collect();
        expired.sort_by_key(|review| (review.deadline, review.id));
        Ok(expired)
    }

    async fn exists_vote(&self, revision_id: RevisionId, voter: &Voter) -> Result<bool, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables.votes.contains_key(&(revision_id, voter.dedup_key())))
    }

    async fn save_post(&self, post: &Post) -> Result<(), RepoError> {
        self.tables.write().await.posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn save_review(&self, review: &PostReview) -> Result<(), RepoError> {
        self.tables.write().await.reviews.insert(review.id, review.clone());
        Ok(())
    }

    async fn save_revision(&self, revision: &PostRevision) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        tables.ensure_open(revision.review_id)?;
        tables.revisions.insert(revision.id, revision.clone());
        Ok(())
    }

    async fn save_vote(&self, vote: &RevisionVote) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        let key = (vote.revision_id, vote.voter.dedup_key());
        if tables.votes.contains_key(&key) {
            return Err(RepoError::Conflict(format!(
                "vote by {} on revision {} exists",
                key.1, vote.revision_id
            )));
        }
        tables.votes.insert(key, vote.clone());
        Ok(())
    }

    async fn save_review_start(&self, post: &Post, review: &PostReview) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        if let Some(active) = tables.active_review(post.id) {
            return Err(RepoError::Conflict(format!(
                "post {} already has active review {}",
                post.id, active.id
            )));
        }
        tables.posts.insert(post.id, post.clone());
        tables.reviews.insert(review.id, review.clone());
        Ok(())
    }

    async fn save_review_outcome(&self, post: &Post, review: &PostReview) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        match tables.reviews.get(&review.id) {
            None => {
                return Err(RepoError::NotFound {
                    entity: "review",
                    id: review.id.get(),
                })
            }
            Some(stored) if stored.status != ReviewStatus::InReview => {
                return Err(RepoError::Conflict(format!(
                    "review {} is already {}",
                    review.id, stored.status
                )))
            }
            Some(_) => {}
        }
        tables.posts.insert(post.id, post.clone());
        tables.reviews.insert(review.id, review.clone());
        Ok(())
    }

    async fn record_vote(&self, vote: &RevisionVote) -> Result<PostRevision, RepoError> {
        let mut tables = self.tables.write().await;
        let revision = tables.revision(vote.revision_id)?;
        tables.ensure_open(revision.review_id)?;
        let updated = revision.with_vote_added();

        let key = (vote.revision_id, vote.voter.dedup_key());
        if tables.votes.contains_key(&key) {
            return Err(RepoError::Conflict(format!(
                "vote by {} on revision {} exists",
                key.1, vote.revision_id
            )));
        }
        tables.votes.insert(key, vote.clone());
        tables.revisions.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn remove_vote(&self, revision_id: RevisionId, voter: &Voter) -> Result<PostRevision, RepoError> {
        let mut tables = self.tables.write().await;
        let revision = tables.revision(revision_id)?;
        tables.ensure_open(revision.review_id)?;
        let updated = revision.with_vote_removed();

        if tables.votes.remove(&(revision_id, voter.dedup_key())).is_none() {
            return Err(RepoError::NotFound {
                entity: "vote",
                id: revision_id.get(),
            });
        }
        tables.revisions.insert(revision_id, updated.clone());
        Ok(updated)
    }
}
