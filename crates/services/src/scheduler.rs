//! # Review deadline scheduler
//!
//! Every instance runs this loop. Each tick lists the expired reviews, then
//! for each one takes a per-review lock without waiting and completes the
//! review under it. Instances that find the lock taken skip the review; a
//! review whose completion failed stays `IN_REVIEW` and is retried on a
//! later tick.

use std::sync::Arc;
use std::time::Duration;

use domains::{Clock, DomainError, PostReview, ReviewCompleter, ReviewId, ReviewRepository};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::lock_manager::LockManager;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);
/// Must comfortably exceed one completion transaction.
pub const DEFAULT_COMPLETION_LEASE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub lease: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_TICK_INTERVAL,
            lease: DEFAULT_COMPLETION_LEASE,
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Expired reviews found by the query.
    pub expired: usize,
    /// Reviews this instance completed.
    pub completed: usize,
    /// Reviews left alone: lock held elsewhere or already settled.
    pub skipped: usize,
    /// Reviews whose completion failed; retried next tick.
    pub failed: usize,
}

enum Disposition {
    Completed,
    Skipped,
    Failed,
}

/// Lock key guarding the completion of one review.
pub fn completion_lock_key(review_id: ReviewId) -> String {
    format!("review:complete:{review_id}")
}

pub struct ReviewDeadlineScheduler {
    repo: Arc<dyn ReviewRepository>,
    completer: Arc<dyn ReviewCompleter>,
    locks: Arc<LockManager>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl ReviewDeadlineScheduler {
    pub fn new(
        repo: Arc<dyn ReviewRepository>,
        completer: Arc<dyn ReviewCompleter>,
        locks: Arc<LockManager>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repo,
            completer,
            locks,
            clock,
            config,
        }
    }

    /// One pass over the expired reviews. Only the initial query can fail;
    /// per-review failures are logged and counted.
    pub async fn tick(&self) -> Result<TickReport, DomainError> {
        let expired = self.repo.find_expired_reviews(self.clock.now()).await?;
        let mut report = TickReport {
            expired: expired.len(),
            ..TickReport::default()
        };

        for review in &expired {
            match self.process(review).await {
                Disposition::Completed => report.completed += 1,
                Disposition::Skipped => report.skipped += 1,
                Disposition::Failed => report.failed += 1,
            }
        }

        if report.expired > 0 {
            info!(
                expired = report.expired,
                completed = report.completed,
                skipped = report.skipped,
                failed = report.failed,
                "review deadline tick"
            );
        }
        Ok(report)
    }

    async fn process(&self, review: &PostReview) -> Disposition {
        let key = completion_lock_key(review.id);
        let Some(lease) = self.locks.try_lock(&key, self.config.lease).await else {
            debug!(review_id = %review.id, "completion lock held elsewhere, skipping");
            return Disposition::Skipped;
        };

        let disposition = match self.completer.complete(review.id).await {
            Ok(_) => Disposition::Completed,
            Err(e) if e.is_already_settled() => {
                debug!(review_id = %review.id, "review already settled");
                Disposition::Skipped
            }
            Err(e) => {
                error!(review_id = %review.id, error = %e, "failed to complete expired review");
                Disposition::Failed
            }
        };

        self.locks.release_quietly(lease).await;
        disposition
    }

    /// Ticks on a fixed interval until `shutdown` is notified.
    ///
    /// Signal with `Notify::notify_one` so the permit is kept even if it
    /// arrives while a tick is running; that tick is finished first.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.config.interval, lease = ?self.config.lease, "review deadline scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "failed to query expired reviews");
                    }
                }
            }
        }

        info!("review deadline scheduler stopped");
    }
}
