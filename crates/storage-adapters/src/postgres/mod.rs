//! # PostgreSQL `ReviewRepository`
//!
//! Maps the review entities onto the tables created by
//! `migrations/0001_review_lifecycle.sql`. Composite saves run inside one
//! transaction; the closing of a review is guarded on `status = 'IN_REVIEW'`
//! so two racing completions cannot both commit. Revision and vote writes
//! hold a `FOR SHARE` lock on their review row, so a review cannot close
//! underneath them and they cannot land on a closed review.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    Post, PostId, PostReview, PostRevision, PostStatus, RepoError, ReviewId, ReviewRepository, ReviewStatus,
    RevisionId, RevisionVote, UserId, Voter,
};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

const POST_COLUMNS: &str = "id, title, body, status, tags, author_id, created_at, updated_at";
const REVIEW_COLUMNS: &str =
    "id, post_id, initiator_id, started_at, deadline, status, winning_revision_id, closed_at";
const REVISION_COLUMNS: &str = "id, review_id, author_id, title, body, submitted_at, vote_count";

fn backend(e: sqlx::Error) -> RepoError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => RepoError::Conflict(db.message().to_string()),
        _ => RepoError::Backend(e.to_string()),
    }
}

fn post_from_row(row: &PgRow) -> Result<Post, RepoError> {
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(Post {
        id: PostId(row.try_get("id").map_err(backend)?),
        title: row.try_get("title").map_err(backend)?,
        body: row.try_get("body").map_err(backend)?,
        status: PostStatus::parse(&status)
            .ok_or_else(|| RepoError::Backend(format!("unknown post status '{status}'")))?,
        tags: row.try_get("tags").map_err(backend)?,
        author_id: row.try_get::<Option<i64>, _>("author_id").map_err(backend)?.map(UserId),
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn review_from_row(row: &PgRow) -> Result<PostReview, RepoError> {
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(PostReview {
        id: ReviewId(row.try_get("id").map_err(backend)?),
        post_id: PostId(row.try_get("post_id").map_err(backend)?),
        initiator_id: row.try_get::<Option<i64>, _>("initiator_id").map_err(backend)?.map(UserId),
        started_at: row.try_get("started_at").map_err(backend)?,
        deadline: row.try_get("deadline").map_err(backend)?,
        status: ReviewStatus::parse(&status)
            .ok_or_else(|| RepoError::Backend(format!("unknown review status '{status}'")))?,
        winning_revision_id: row
            .try_get::<Option<i64>, _>("winning_revision_id")
            .map_err(backend)?
            .map(RevisionId),
        closed_at: row.try_get("closed_at").map_err(backend)?,
    })
}

fn revision_from_row(row: &PgRow) -> Result<PostRevision, RepoError> {
    let vote_count: i32 = row.try_get("vote_count").map_err(backend)?;
    Ok(PostRevision {
        id: RevisionId(row.try_get("id").map_err(backend)?),
        review_id: ReviewId(row.try_get("review_id").map_err(backend)?),
        author_id: row.try_get::<Option<i64>, _>("author_id").map_err(backend)?.map(UserId),
        title: row.try_get("title").map_err(backend)?,
        body: row.try_get("body").map_err(backend)?,
        submitted_at: row.try_get("submitted_at").map_err(backend)?,
        vote_count: u32::try_from(vote_count).unwrap_or(0),
    })
}

fn ensure_open(row: Option<PgRow>, missing: RepoError) -> Result<(), RepoError> {
    let row = row.ok_or(missing)?;
    let review_id: i64 = row.try_get("id").map_err(backend)?;
    let status: String = row.try_get("status").map_err(backend)?;
    if status == ReviewStatus::InReview.as_str() {
        Ok(())
    } else {
        Err(RepoError::ReviewClosed { review_id })
    }
}

fn vote_count_param(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

pub struct PgReviewRepository {
    pool: PgPool,
}

impl PgReviewRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, RepoError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(backend)?;
        Ok(Self::new(pool))
    }

    /// Applies pending migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<(), RepoError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepoError::Backend(e.to_string()))?;
        info!("review schema migrations applied");
        Ok(())
    }

    async fn lock_open_review(conn: &mut PgConnection, review_id: ReviewId) -> Result<(), RepoError> {
        let row = sqlx::query("SELECT id, status FROM post_reviews WHERE id = $1 FOR SHARE")
            .bind(review_id.get())
            .fetch_optional(&mut *conn)
            .await
            .map_err(backend)?;
        ensure_open(
            row,
            RepoError::NotFound {
                entity: "review",
                id: review_id.get(),
            },
        )
    }

    async fn lock_review_of_revision(conn: &mut PgConnection, revision_id: RevisionId) -> Result<(), RepoError> {
        let row = sqlx::query(
            "SELECT r.id, r.status FROM post_reviews r
             JOIN post_revisions v ON v.review_id = r.id
             WHERE v.id = $1
             FOR SHARE OF r",
        )
        .bind(revision_id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;
        ensure_open(
            row,
            RepoError::NotFound {
                entity: "revision",
                id: revision_id.get(),
            },
        )
    }

    async fn upsert_post<'e, E>(executor: E, post: &Post) -> Result<(), RepoError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            "INSERT INTO posts (id, title, body, status, tags, author_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                body = EXCLUDED.body,
                status = EXCLUDED.status,
                tags = EXCLUDED.tags,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(post.id.get())
        .bind(&post.title)
        .bind(&post.body)
        .bind(post.status.as_str())
        .bind(&post.tags)
        .bind(post.author_id.map(UserId::get))
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(executor)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn upsert_review<'e, E>(executor: E, review: &PostReview) -> Result<(), RepoError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            "INSERT INTO post_reviews
                (id, post_id, initiator_id, started_at, deadline, status, winning_revision_id, closed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                winning_revision_id = EXCLUDED.winning_revision_id,
                closed_at = EXCLUDED.closed_at",
        )
        .bind(review.id.get())
        .bind(review.post_id.get())
        .bind(review.initiator_id.map(UserId::get))
        .bind(review.started_at)
        .bind(review.deadline)
        .bind(review.status.as_str())
        .bind(review.winning_revision_id.map(RevisionId::get))
        .bind(review.closed_at)
        .execute(executor)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl ReviewRepository for PgReviewRepository {
    async fn find_post(&self, id: PostId) -> Result<Option<Post>, RepoError> {
        sqlx::query(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(post_from_row)
            .transpose()
    }

    async fn find_review(&self, id: ReviewId) -> Result<Option<PostReview>, RepoError> {
        sqlx::query(&format!("SELECT {REVIEW_COLUMNS} FROM post_reviews WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(review_from_row)
            .transpose()
    }

    async fn find_active_review(&self, post_id: PostId) -> Result<Option<PostReview>, RepoError> {
        sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM post_reviews WHERE post_id = $1 AND status = 'IN_REVIEW'"
        ))
        .bind(post_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .as_ref()
        .map(review_from_row)
        .transpose()
    }

    async fn find_revision(&self, id: RevisionId) -> Result<Option<PostRevision>, RepoError> {
        sqlx::query(&format!("SELECT {REVISION_COLUMNS} FROM post_revisions WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(revision_from_row)
            .transpose()
    }

    async fn find_revisions(&self, review_id: ReviewId) -> Result<Vec<PostRevision>, RepoError> {
        sqlx::query(&format!(
            "SELECT {REVISION_COLUMNS} FROM post_revisions WHERE review_id = $1 ORDER BY submitted_at, id"
        ))
        .bind(review_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .iter()
        .map(revision_from_row)
        .collect()
    }

    async fn find_expired_reviews(&self, now: DateTime<Utc>) -> Result<Vec<PostReview>, RepoError> {
        sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM post_reviews
             WHERE status = 'IN_REVIEW' AND deadline < $1
             ORDER BY deadline, id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .iter()
        .map(review_from_row)
        .collect()
    }

    async fn exists_vote(&self, revision_id: RevisionId, voter: &Voter) -> Result<bool, RepoError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM revision_votes WHERE revision_id = $1 AND voter_key = $2) AS present",
        )
        .bind(revision_id.get())
        .bind(voter.dedup_key())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        row.try_get("present").map_err(backend)
    }

    async fn save_post(&self, post: &Post) -> Result<(), RepoError> {
        Self::upsert_post(&self.pool, post).await
    }

    async fn save_review(&self, review: &PostReview) -> Result<(), RepoError> {
        Self::upsert_review(&self.pool, review).await
    }

    async fn save_revision(&self, revision: &PostRevision) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        Self::lock_open_review(&mut *tx, revision.review_id).await?;
        sqlx::query(
            "INSERT INTO post_revisions (id, review_id, author_id, title, body, submitted_at, vote_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET vote_count = EXCLUDED.vote_count",
        )
        .bind(revision.id.get())
        .bind(revision.review_id.get())
        .bind(revision.author_id.map(UserId::get))
        .bind(&revision.title)
        .bind(&revision.body)
        .bind(revision.submitted_at)
        .bind(vote_count_param(revision.vote_count))
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn save_vote(&self, vote: &RevisionVote) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO revision_votes (id, revision_id, voter_key, voter_id, cast_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(vote.id.get())
        .bind(vote.revision_id.get())
        .bind(vote.voter.dedup_key())
        .bind(vote.voter.user_id().map(UserId::get))
        .bind(vote.cast_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn save_review_start(&self, post: &Post, review: &PostReview) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        Self::upsert_post(&mut *tx, post).await?;
        // The partial unique index rejects a second open review of the post.
        Self::upsert_review(&mut *tx, review).await?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn save_review_outcome(&self, post: &Post, review: &PostReview) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let closed = sqlx::query(
            "UPDATE post_reviews
             SET status = $2, winning_revision_id = $3, closed_at = $4
             WHERE id = $1 AND status = 'IN_REVIEW'",
        )
        .bind(review.id.get())
        .bind(review.status.as_str())
        .bind(review.winning_revision_id.map(RevisionId::get))
        .bind(review.closed_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if closed.rows_affected() == 0 {
            // Dropping `tx` rolls back.
            return Err(RepoError::Conflict(format!("review {} is no longer IN_REVIEW", review.id)));
        }

        Self::upsert_post(&mut *tx, post).await?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn record_vote(&self, vote: &RevisionVote) -> Result<PostRevision, RepoError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        Self::lock_review_of_revision(&mut *tx, vote.revision_id).await?;

        let inserted = sqlx::query(
            "INSERT INTO revision_votes (id, revision_id, voter_key, voter_id, cast_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (revision_id, voter_key) DO NOTHING",
        )
        .bind(vote.id.get())
        .bind(vote.revision_id.get())
        .bind(vote.voter.dedup_key())
        .bind(vote.voter.user_id().map(UserId::get))
        .bind(vote.cast_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if inserted.rows_affected() == 0 {
            return Err(RepoError::Conflict(format!(
                "vote by {} on revision {} exists",
                vote.voter, vote.revision_id
            )));
        }

        let row = sqlx::query(&format!(
            "UPDATE post_revisions SET vote_count = vote_count + 1 WHERE id = $1 RETURNING {REVISION_COLUMNS}"
        ))
        .bind(vote.revision_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or(RepoError::NotFound {
            entity: "revision",
            id: vote.revision_id.get(),
        })?;
        let updated = revision_from_row(&row)?;

        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn remove_vote(&self, revision_id: RevisionId, voter: &Voter) -> Result<PostRevision, RepoError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        Self::lock_review_of_revision(&mut *tx, revision_id).await?;

        let deleted = sqlx::query("DELETE FROM revision_votes WHERE revision_id = $1 AND voter_key = $2")
            .bind(revision_id.get())
            .bind(voter.dedup_key())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        if deleted.rows_affected() == 0 {
            return Err(RepoError::NotFound {
                entity: "vote",
                id: revision_id.get(),
            });
        }

        let row = sqlx::query(&format!(
            "UPDATE post_revisions SET vote_count = GREATEST(vote_count - 1, 0)
             WHERE id = $1 RETURNING {REVISION_COLUMNS}"
        ))
        .bind(revision_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or(RepoError::NotFound {
            entity: "revision",
            id: revision_id.get(),
        })?;
        let updated = revision_from_row(&row)?;

        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }
}
