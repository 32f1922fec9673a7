//! # storage-adapters
//!
//! Implementations of the `domains` persistence and lock-store ports.
//! Backends beyond the in-memory ones are feature-gated:
//!
//! - `redis`: shared `LockStore` over Redis (`SET NX PX` + compare-and-delete script).
//! - `db-postgres`: `ReviewRepository` over PostgreSQL.
//!
//! `container-tests` enables both and runs their tests against containers.

pub mod memory;

#[cfg(feature = "db-postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis;
