//! # services
//!
//! Business logic of the review core: identifier minting, distributed
//! locking, the review lifecycle engine and the deadline scheduler. Talks to
//! the outside world only through the ports in `domains`.

pub mod id_generator;
pub mod lock_manager;
pub mod review_service;
pub mod scheduler;

pub use id_generator::SnowflakeGenerator;
pub use lock_manager::{LockConfig, LockLease, LockManager};
pub use review_service::ReviewService;
pub use scheduler::{ReviewDeadlineScheduler, SchedulerConfig, TickReport};
