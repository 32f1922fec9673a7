//! Several scheduler instances sharing one lock store and one repository.

use std::sync::Arc;

use async_trait::async_trait;
use domains::{DomainError, PostStatus, ReviewCompleter, ReviewId, ReviewOutcome, ReviewRepository, ReviewStatus};
use integration_tests::{CountingCompleter, Harness};
use services::scheduler::completion_lock_key;
use tokio::sync::Mutex;

#[tokio::test]
async fn review_is_completed_by_exactly_one_instance() -> anyhow::Result<()> {
    let h = Harness::new();
    let (_, review) = h.post_in_review("Concurrency").await?;
    h.pass_deadline();

    let completer = Arc::new(CountingCompleter::gated(h.service.clone()));
    let first = h.scheduler(completer.clone());
    let second = h.scheduler(completer.clone());

    // Hold the first instance inside completion while the second ticks.
    let running = tokio::spawn(async move { first.tick().await });
    completer.wait_entered().await;

    let report = second.tick().await?;
    assert_eq!(report.expired, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.completed, 0);

    completer.release();
    let report = running.await??;
    assert_eq!(report.completed, 1);

    assert_eq!(completer.calls(), 1);
    let review = h.repo.find_review(review.id).await?.unwrap();
    assert_eq!(review.status, ReviewStatus::Completed);
    assert_eq!(h.store.holder(&format!("wiki:lock:{}", completion_lock_key(review.id))), None);
    Ok(())
}

#[tokio::test]
async fn concurrent_ticks_settle_each_review_once() -> anyhow::Result<()> {
    let h = Harness::new();
    let mut reviews = Vec::new();
    for title in ["One", "Two", "Three"] {
        let (_, review) = h.post_in_review(title).await?;
        reviews.push(review);
    }
    h.pass_deadline();

    let completer = Arc::new(CountingCompleter::new(h.service.clone()));
    let a = h.scheduler(completer.clone());
    let b = h.scheduler(completer.clone());
    let (ra, rb) = tokio::join!(a.tick(), b.tick());
    let (ra, rb) = (ra?, rb?);

    assert_eq!(ra.completed + rb.completed, 3);
    assert_eq!(ra.failed + rb.failed, 0);
    // Anything not completed was skipped: lock busy or already settled.
    for report in [ra, rb] {
        assert_eq!(report.completed + report.skipped, report.expired);
    }
    assert!(completer.calls() >= 3);

    for review in reviews {
        let stored = h.repo.find_review(review.id).await?.unwrap();
        assert_eq!(stored.status, ReviewStatus::Completed);
        assert_eq!(h.repo.find_post(review.post_id).await?.unwrap().status, PostStatus::Draft);
    }
    Ok(())
}

/// Fails the first completion of every review, then delegates.
struct FlakyCompleter {
    inner: Arc<dyn ReviewCompleter>,
    failed: Mutex<Vec<ReviewId>>,
}

#[async_trait]
impl ReviewCompleter for FlakyCompleter {
    async fn complete(&self, review_id: ReviewId) -> Result<ReviewOutcome, DomainError> {
        let mut failed = self.failed.lock().await;
        if !failed.contains(&review_id) {
            failed.push(review_id);
            return Err(DomainError::Validation("store hiccup".into()));
        }
        drop(failed);
        self.inner.complete(review_id).await
    }
}

#[tokio::test]
async fn failed_completion_is_retried_on_the_next_tick() -> anyhow::Result<()> {
    let h = Harness::new();
    let (post, review) = h.post_in_review("Retry").await?;
    let revision = h.service.submit_revision(review.id, "Retry v2", "body", None).await?;
    h.votes(&revision, 1).await?;
    h.pass_deadline();

    let scheduler = h.scheduler(Arc::new(FlakyCompleter {
        inner: h.service.clone(),
        failed: Mutex::new(Vec::new()),
    }));

    let report = scheduler.tick().await?;
    assert_eq!(report.failed, 1);
    assert_eq!(h.repo.find_review(review.id).await?.unwrap().status, ReviewStatus::InReview);
    // The lock was released, so the retry does not wait for the lease.
    assert_eq!(h.store.holder(&format!("wiki:lock:{}", completion_lock_key(review.id))), None);

    let report = scheduler.tick().await?;
    assert_eq!(report.completed, 1);
    let post = h.repo.find_post(post.id).await?.unwrap();
    assert_eq!(post.status, PostStatus::Reviewed);
    assert_eq!(post.title, "Retry v2");
    Ok(())
}
