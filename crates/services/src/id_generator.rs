//! # Snowflake identifiers
//!
//! Layout of a generated id, most significant bit first:
//!
//! ```text
//! | 0 | 41 bits: ms since epoch | 10 bits: node id | 12 bits: sequence |
//! ```
//!
//! Ids from one generator are strictly increasing while the clock does not
//! move backwards. Uniqueness across processes relies on every process
//! being configured with its own node id.

use std::sync::{Arc, Mutex};

use domains::{Clock, IdError, IdGenerator};
use tracing::error;

pub const TIMESTAMP_BITS: u32 = 41;
pub const NODE_ID_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;

pub const MAX_NODE_ID: i64 = (1 << NODE_ID_BITS) - 1;
pub const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;
const MAX_TIMESTAMP_OFFSET: i64 = (1 << TIMESTAMP_BITS) - 1;

const NODE_ID_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + NODE_ID_BITS;

/// 2024-01-01T00:00:00Z.
pub const DEFAULT_EPOCH_MS: i64 = 1_704_067_200_000;

/// The fields packed into an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnowflakeParts {
    pub timestamp_ms: i64,
    pub node_id: i64,
    pub sequence: i64,
}

struct State {
    last_ms: i64,
    sequence: i64,
}

pub struct SnowflakeGenerator {
    node_id: i64,
    epoch_ms: i64,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl SnowflakeGenerator {
    pub fn new(node_id: i64, clock: Arc<dyn Clock>) -> Result<Self, IdError> {
        Self::with_epoch(node_id, DEFAULT_EPOCH_MS, clock)
    }

    /// Rejects node ids outside `0..=1023`, and a clock reading before
    /// `epoch_ms`, before any id is produced.
    pub fn with_epoch(node_id: i64, epoch_ms: i64, clock: Arc<dyn Clock>) -> Result<Self, IdError> {
        if !(0..=MAX_NODE_ID).contains(&node_id) {
            return Err(IdError::InvalidNodeId(node_id));
        }
        let now_ms = clock.now().timestamp_millis();
        if now_ms < epoch_ms {
            return Err(IdError::ClockBeforeEpoch { now_ms, epoch_ms });
        }
        Ok(Self {
            node_id,
            epoch_ms,
            clock,
            state: Mutex::new(State {
                last_ms: -1,
                sequence: 0,
            }),
        })
    }

    pub fn node_id(&self) -> i64 {
        self.node_id
    }

    /// Splits an id produced with this generator's epoch.
    pub fn decompose(&self, id: i64) -> SnowflakeParts {
        SnowflakeParts {
            timestamp_ms: (id >> TIMESTAMP_SHIFT) + self.epoch_ms,
            node_id: (id >> NODE_ID_SHIFT) & MAX_NODE_ID,
            sequence: id & MAX_SEQUENCE,
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Busy-polls the clock until it passes `last_ms`.
    fn wait_next_millis(&self, last_ms: i64) -> Result<i64, IdError> {
        loop {
            let now = self.now_ms();
            if now > last_ms {
                return Ok(now);
            }
            if now < last_ms {
                return Err(self.regressed(last_ms, now));
            }
            std::hint::spin_loop();
        }
    }

    fn regressed(&self, last_ms: i64, now_ms: i64) -> IdError {
        error!(node_id = self.node_id, last_ms, now_ms, "clock moved backwards, refusing to issue ids");
        IdError::ClockRegressed { last_ms, now_ms }
    }

    fn compose(&self, timestamp_ms: i64, sequence: i64) -> Result<i64, IdError> {
        let offset = timestamp_ms - self.epoch_ms;
        if offset < 0 {
            return Err(IdError::ClockBeforeEpoch {
                now_ms: timestamp_ms,
                epoch_ms: self.epoch_ms,
            });
        }
        if offset > MAX_TIMESTAMP_OFFSET {
            return Err(IdError::TimestampOverflow);
        }
        Ok((offset << TIMESTAMP_SHIFT) | (self.node_id << NODE_ID_SHIFT) | sequence)
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn next_id(&self) -> Result<i64, IdError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.now_ms();

        if now < state.last_ms {
            return Err(self.regressed(state.last_ms, now));
        }

        // State only advances once an id has actually been composed.
        let (timestamp_ms, sequence) = if now == state.last_ms {
            match (state.sequence + 1) & MAX_SEQUENCE {
                0 => (self.wait_next_millis(state.last_ms)?, 0),
                next => (now, next),
            }
        } else {
            (now, 0)
        };

        let id = self.compose(timestamp_ms, sequence)?;
        state.last_ms = timestamp_ms;
        state.sequence = sequence;
        Ok(id)
    }
}
