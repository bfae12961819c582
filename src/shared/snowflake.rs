//! Snowflake ID Generator
//!
//! Twitter-style distributed unique ID generation. Ids produced by one
//! generator are strictly increasing, which the message store relies on for
//! per-conversation ordering.

use chrono::Utc;
use parking_lot::Mutex;

/// Marketplace epoch (2024-01-01T00:00:00.000Z)
pub const MARKETPLACE_EPOCH: u64 = 1704067200000;

const SEQUENCE_MASK: u64 = 0xFFF;

#[derive(Debug, Default)]
struct GeneratorState {
    last_timestamp: u64,
    sequence: u64,
}

/// Snowflake ID generator
#[derive(Debug)]
pub struct SnowflakeGenerator {
    machine_id: u64,
    node_id: u64,
    state: Mutex<GeneratorState>,
}

impl SnowflakeGenerator {
    /// Create a new snowflake generator
    pub fn new(machine_id: u64, node_id: u64) -> Self {
        Self {
            machine_id: machine_id & 0x1F, // 5 bits
            node_id: node_id & 0x1F,       // 5 bits
            state: Mutex::new(GeneratorState::default()),
        }
    }

    /// Generate a new snowflake ID
    pub fn generate(&self) -> i64 {
        let mut state = self.state.lock();
        let mut timestamp = current_timestamp().max(state.last_timestamp);

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond; borrow the next one.
                timestamp += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = timestamp;

        let id = ((timestamp - MARKETPLACE_EPOCH) << 22)
            | (self.machine_id << 17)
            | (self.node_id << 12)
            | state.sequence;

        id as i64
    }
}

fn current_timestamp() -> u64 {
    (Utc::now().timestamp_millis() as u64).max(MARKETPLACE_EPOCH)
}

/// Extract timestamp from snowflake ID
pub fn extract_timestamp(snowflake: i64) -> u64 {
    ((snowflake as u64) >> 22) + MARKETPLACE_EPOCH
}
