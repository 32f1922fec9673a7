//! Shared fixtures for the scenario tests: a review core wired to the
//! in-memory adapters and a manual clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use domains::{
    DomainError, ManualClock, Post, PostReview, PostRevision, ReviewCompleter, ReviewId, ReviewOutcome, UserId,
    Voter,
};
use services::{LockConfig, LockManager, ReviewDeadlineScheduler, ReviewService, SchedulerConfig, SnowflakeGenerator};
use storage_adapters::memory::{InMemoryLockStore, InMemoryReviewRepository};
use tokio::sync::Notify;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
}

/// One review core over shared in-memory stores.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub repo: Arc<InMemoryReviewRepository>,
    pub store: Arc<InMemoryLockStore>,
    pub service: Arc<ReviewService>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let repo = Arc::new(InMemoryReviewRepository::new());
        let ids = Arc::new(SnowflakeGenerator::new(1, clock.clone()).expect("node id in range"));
        let service = Arc::new(ReviewService::new(repo.clone(), ids, clock.clone()));
        Self {
            clock,
            repo,
            store: Arc::new(InMemoryLockStore::new()),
            service,
        }
    }

    /// A lock manager as another instance would hold it: own tokens, shared store.
    pub fn lock_manager(&self) -> Arc<LockManager> {
        Arc::new(LockManager::new(
            self.store.clone(),
            LockConfig {
                retry_interval: Duration::from_millis(5),
                ..LockConfig::default()
            },
        ))
    }

    /// A scheduler instance completing through `completer`.
    pub fn scheduler(&self, completer: Arc<dyn ReviewCompleter>) -> ReviewDeadlineScheduler {
        ReviewDeadlineScheduler::new(
            self.repo.clone(),
            completer,
            self.lock_manager(),
            self.clock.clone(),
            SchedulerConfig::default(),
        )
    }

    pub async fn post_in_review(&self, title: &str) -> anyhow::Result<(Post, PostReview)> {
        let draft = self
            .service
            .create_draft(title, "original body", vec!["wiki".into()], Some(UserId(1)))
            .await?;
        Ok(self.service.start_review(draft.id, Some(UserId(1))).await?)
    }

    /// Casts `count` votes from distinct members.
    pub async fn votes(&self, revision: &PostRevision, count: i64) -> anyhow::Result<PostRevision> {
        let mut latest = revision.clone();
        for voter in 0..count {
            latest = self
                .service
                .cast_vote(revision.id, Voter::Member(UserId(1_000 + voter)))
                .await?;
        }
        Ok(latest)
    }

    /// Moves the clock just past the review window.
    pub fn pass_deadline(&self) {
        self.clock.advance(domains::review_window() + chrono::Duration::seconds(1));
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts completions and can hold each one until released.
pub struct CountingCompleter {
    inner: Arc<dyn ReviewCompleter>,
    calls: AtomicUsize,
    entered: Notify,
    gate: Option<Notify>,
}

impl CountingCompleter {
    pub fn new(inner: Arc<dyn ReviewCompleter>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            gate: None,
        }
    }

    /// Every completion waits for [`CountingCompleter::release`].
    pub fn gated(inner: Arc<dyn ReviewCompleter>) -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::new(inner)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolves once a completion has started.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }
}

#[async_trait]
impl ReviewCompleter for CountingCompleter {
    async fn complete(&self, review_id: ReviewId) -> Result<ReviewOutcome, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.inner.complete(review_id).await
    }
}
