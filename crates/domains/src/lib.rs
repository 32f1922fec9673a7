//! # domains
//!
//! Entities, rules and port traits of the wiki review core. Nothing in this
//! crate performs I/O.

pub mod clock;
pub mod errors;
pub mod models;
pub mod ports;
pub mod voting;

pub use clock::{ManualClock, SystemClock};
pub use errors::*;
pub use models::*;
pub use ports::*;
