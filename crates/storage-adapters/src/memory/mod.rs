//! In-memory adapters, used by tests and single-instance deployments.

mod lock_store;
mod review_repo;

pub use lock_store::InMemoryLockStore;
pub use review_repo::InMemoryReviewRepository;
