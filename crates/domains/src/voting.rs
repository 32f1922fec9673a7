//! Winner selection for a completed review.
//!
//! Ranking: most votes first, then the earliest submission, then the lowest
//! revision id. The ordering is total, so the winner is deterministic for any
//! set of revisions.

use std::cmp::Ordering;

use crate::models::PostRevision;

/// Orders `a` before `b` when `a` ranks higher.
pub fn rank(a: &PostRevision, b: &PostRevision) -> Ordering {
    b.vote_count
        .cmp(&a.vote_count)
        .then_with(|| a.submitted_at.cmp(&b.submitted_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sorts revisions in ranking order, best first.
pub fn ranked(mut revisions: Vec<PostRevision>) -> Vec<PostRevision> {
    revisions.sort_by(rank);
    revisions
}

/// Picks the winning revision, or `None` when nothing was submitted.
pub fn select_winner(revisions: &[PostRevision]) -> Option<&PostRevision> {
    revisions.iter().min_by(|a, b| rank(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReviewId, RevisionId};
    use chrono::{DateTime, TimeZone, Utc};

    fn revision(id: i64, votes: u32, minute: u32) -> PostRevision {
        let at: DateTime<Utc> = Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap();
        let mut revision = PostRevision::submit(RevisionId(id), ReviewId(1), None, format!("r{id}"), "", at).unwrap();
        revision.vote_count = votes;
        revision
    }

    #[test]
    fn highest_vote_count_wins() {
        let revisions = vec![revision(1, 3, 0), revision(2, 5, 1)];
        assert_eq!(select_winner(&revisions).map(|r| r.id), Some(RevisionId(2)));
    }

    #[test]
    fn ties_go_to_earliest_submission() {
        let revisions = vec![revision(1, 4, 30), revision(2, 4, 10), revision(3, 1, 0)];
        assert_eq!(select_winner(&revisions).map(|r| r.id), Some(RevisionId(2)));
    }

    #[test]
    fn full_ties_go_to_lowest_id() {
        let revisions = vec![revision(8, 2, 5), revision(4, 2, 5)];
        assert_eq!(select_winner(&revisions).map(|r| r.id), Some(RevisionId(4)));
    }

    #[test]
    fn no_revisions_no_winner() {
        assert!(select_winner(&[]).is_none());
    }

    #[test]
    fn ranked_order_matches_winner() {
        let ordered = ranked(vec![revision(1, 0, 0), revision(2, 7, 9), revision(3, 7, 2)]);
        let ids: Vec<_> = ordered.iter().map(|r| r.id.get()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
