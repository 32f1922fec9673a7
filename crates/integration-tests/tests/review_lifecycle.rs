//! Full review lifecycle over the in-memory adapters.

use chrono::Duration;
use domains::{DomainError, PostStatus, ReviewRepository, ReviewStatus, UserId, Voter};
use integration_tests::{start_time, Harness};
use tokio_test::assert_err;

#[tokio::test]
async fn most_voted_revision_becomes_the_post() -> anyhow::Result<()> {
    let h = Harness::new();
    let (post, review) = h.post_in_review("Rust ownership").await?;
    assert_eq!(post.status, PostStatus::InReview);
    assert_eq!(review.deadline, start_time() + Duration::hours(72));

    let modest = h
        .service
        .submit_revision(review.id, "Ownership, briefly", "short body", Some(UserId(2)))
        .await?;
    h.clock.advance(Duration::minutes(5));
    let popular = h
        .service
        .submit_revision(review.id, "Ownership explained", "long body", Some(UserId(3)))
        .await?;
    h.votes(&modest, 3).await?;
    let popular = h.votes(&popular, 5).await?;
    assert_eq!(popular.vote_count, 5);

    h.pass_deadline();
    let report = h.scheduler(h.service.clone()).tick().await?;
    assert_eq!(report.expired, 1);
    assert_eq!(report.completed, 1);

    let review = h.repo.find_review(review.id).await?.unwrap();
    assert_eq!(review.status, ReviewStatus::Completed);
    assert_eq!(review.winning_revision_id, Some(popular.id));

    let post = h.repo.find_post(post.id).await?.unwrap();
    assert_eq!(post.status, PostStatus::Reviewed);
    assert_eq!(post.title, "Ownership explained");
    assert_eq!(post.body, "long body");

    // Nothing left for the next pass.
    let report = h.scheduler(h.service.clone()).tick().await?;
    assert_eq!(report.expired, 0);
    Ok(())
}

#[tokio::test]
async fn review_can_only_start_from_draft() -> anyhow::Result<()> {
    let h = Harness::new();
    let (post, _) = h.post_in_review("Lifetimes").await?;

    let err = assert_err!(h.service.start_review(post.id, None).await);
    assert!(matches!(err, DomainError::InvalidTransition { status: "IN_REVIEW", .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn second_vote_from_the_same_voter_is_rejected() -> anyhow::Result<()> {
    let h = Harness::new();
    let (_, review) = h.post_in_review("Traits").await?;
    let revision = h.service.submit_revision(review.id, "Traits", "body", None).await?;

    let member = Voter::Member(UserId(77));
    h.service.cast_vote(revision.id, member.clone()).await?;
    let err = assert_err!(h.service.cast_vote(revision.id, member).await);
    assert!(matches!(err, DomainError::DuplicateVote { .. }));

    let anon = Voter::Anonymous("203.0.113.9".into());
    h.service.cast_vote(revision.id, anon.clone()).await?;
    assert_err!(h.service.cast_vote(revision.id, anon).await);

    let stored = h.repo.find_revision(revision.id).await?.unwrap();
    assert_eq!(stored.vote_count, 2);
    assert_eq!(h.repo.vote_count(revision.id).await, 2);
    Ok(())
}

#[tokio::test]
async fn retracted_vote_can_be_cast_again() -> anyhow::Result<()> {
    let h = Harness::new();
    let (_, review) = h.post_in_review("Macros").await?;
    let revision = h.service.submit_revision(review.id, "Macros", "body", None).await?;
    let voter = Voter::Member(UserId(5));

    h.service.cast_vote(revision.id, voter.clone()).await?;
    let after = h.service.retract_vote(revision.id, voter.clone()).await?;
    assert_eq!(after.vote_count, 0);

    let err = assert_err!(h.service.retract_vote(revision.id, voter.clone()).await);
    assert!(matches!(err, DomainError::VoteNotFound { .. }));

    let again = h.service.cast_vote(revision.id, voter).await?;
    assert_eq!(again.vote_count, 1);
    Ok(())
}

#[tokio::test]
async fn contributions_close_at_the_deadline() -> anyhow::Result<()> {
    let h = Harness::new();
    let (_, review) = h.post_in_review("Async").await?;
    let revision = h.service.submit_revision(review.id, "Async", "body", None).await?;

    h.clock.set(review.deadline);
    h.service.cast_vote(revision.id, Voter::Member(UserId(1))).await?;

    h.clock.advance(Duration::seconds(1));
    let err = assert_err!(h.service.submit_revision(review.id, "Late", "body", None).await);
    assert!(matches!(err, DomainError::ReviewClosed { .. }));
    let err = assert_err!(h.service.cast_vote(revision.id, Voter::Member(UserId(2))).await);
    assert!(matches!(err, DomainError::ReviewClosed { .. }));
    Ok(())
}

#[tokio::test]
async fn tie_goes_to_the_earliest_submission() -> anyhow::Result<()> {
    let h = Harness::new();
    let (post, review) = h.post_in_review("Generics").await?;
    let first = h.service.submit_revision(review.id, "First", "a", None).await?;
    h.clock.advance(Duration::hours(1));
    let second = h.service.submit_revision(review.id, "Second", "b", None).await?;
    h.votes(&second, 2).await?;
    h.votes(&first, 2).await?;

    let ranked = h.service.revisions(review.id).await?;
    assert_eq!(ranked.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first.id, second.id]);

    h.pass_deadline();
    let outcome = h.service.complete(review.id).await?;
    assert_eq!(outcome.review.winning_revision_id, Some(first.id));
    assert_eq!(h.repo.find_post(post.id).await?.unwrap().title, "First");
    Ok(())
}

#[tokio::test]
async fn review_without_revisions_returns_post_to_draft() -> anyhow::Result<()> {
    let h = Harness::new();
    let (post, review) = h.post_in_review("Unsafe").await?;

    h.pass_deadline();
    let report = h.scheduler(h.service.clone()).tick().await?;
    assert_eq!(report.completed, 1);

    let review = h.repo.find_review(review.id).await?.unwrap();
    assert_eq!(review.status, ReviewStatus::Completed);
    assert_eq!(review.winning_revision_id, None);

    let stored = h.repo.find_post(post.id).await?.unwrap();
    assert_eq!(stored.status, PostStatus::Draft);
    assert_eq!(stored.title, "Unsafe");
    assert_eq!(stored.body, "original body");

    // The post can go through review again.
    h.service.start_review(post.id, None).await?;
    Ok(())
}

#[tokio::test]
async fn completed_review_cannot_complete_again() -> anyhow::Result<()> {
    let h = Harness::new();
    let (post, review) = h.post_in_review("Iterators").await?;
    let revision = h.service.submit_revision(review.id, "Iterators", "v1", None).await?;
    h.votes(&revision, 1).await?;

    h.pass_deadline();
    h.service.complete(review.id).await?;
    let reviewed_at = h.repo.find_post(post.id).await?.unwrap().updated_at;

    h.clock.advance(Duration::minutes(1));
    let err = assert_err!(h.service.complete(review.id).await);
    assert!(err.is_already_settled());
    assert_eq!(h.repo.find_post(post.id).await?.unwrap().updated_at, reviewed_at);
    Ok(())
}

#[tokio::test]
async fn cancelled_review_is_not_picked_up_by_the_scheduler() -> anyhow::Result<()> {
    let h = Harness::new();
    let (post, review) = h.post_in_review("Closures").await?;
    h.service.submit_revision(review.id, "Closures", "body", None).await?;

    let (post_after, review_after) = h.service.cancel_review(review.id).await?;
    assert_eq!(post_after.status, PostStatus::Draft);
    assert_eq!(post_after.title, post.title);
    assert_eq!(review_after.status, ReviewStatus::Cancelled);

    h.pass_deadline();
    let report = h.scheduler(h.service.clone()).tick().await?;
    assert_eq!(report.expired, 0);
    Ok(())
}

#[tokio::test]
async fn reviewed_post_is_locked_until_sent_back_to_draft() -> anyhow::Result<()> {
    let h = Harness::new();
    let (post, review) = h.post_in_review("Modules").await?;
    let revision = h.service.submit_revision(review.id, "Modules", "reviewed", None).await?;
    h.votes(&revision, 1).await?;
    h.pass_deadline();
    h.service.complete(review.id).await?;

    let err = assert_err!(h.service.edit_draft(post.id, "Modules", "sneaky").await);
    assert!(matches!(err, DomainError::ContentLocked { .. }));

    let draft = h.service.back_to_draft(post.id).await?;
    assert_eq!(draft.status, PostStatus::Draft);
    assert_eq!(draft.body, "reviewed");
    let edited = h.service.edit_draft(post.id, "Modules", "edited").await?;
    assert_eq!(edited.body, "edited");
    Ok(())
}

#[tokio::test]
async fn deleting_a_post_cancels_its_review() -> anyhow::Result<()> {
    let h = Harness::new();
    let (post, review) = h.post_in_review("Cargo").await?;

    let deleted = h.service.delete_post(post.id).await?;
    assert_eq!(deleted.status, PostStatus::Deleted);
    let review = h.repo.find_review(review.id).await?.unwrap();
    assert_eq!(review.status, ReviewStatus::Cancelled);

    h.pass_deadline();
    assert_eq!(h.scheduler(h.service.clone()).tick().await?.expired, 0);
    assert_err!(h.service.start_review(post.id, None).await);
    Ok(())
}

#[tokio::test]
async fn ids_minted_by_the_core_are_unique_across_entities() -> anyhow::Result<()> {
    let h = Harness::new();
    let (post, review) = h.post_in_review("Ids").await?;
    let revision = h.service.submit_revision(review.id, "Ids", "body", None).await?;

    let mut ids = vec![post.id.get(), review.id.get(), revision.id.get()];
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert!(post.id.get() < review.id.get() && review.id.get() < revision.id.get());
    Ok(())
}
