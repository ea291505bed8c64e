//! Distributed key generation for auto-increment columns.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::config::Props;

/// A generated key; the variant is fixed per algorithm.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i32),
    Long(i64),
    Text(String),
}

/// Produces unique keys for a logical table's key-generate column.
pub trait KeyGenerateAlgorithm: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &str;

    fn generate_key(&self) -> KeyValue;
}

/// Milliseconds of 2016-11-01T00:00:00Z, the snowflake epoch.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_477_929_600_000;
const SEQUENCE_BITS: u32 = 12;
const WORKER_ID_BITS: u32 = 10;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const WORKER_ID_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = WORKER_ID_BITS + SEQUENCE_BITS;
const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;

pub const WORKER_ID: &str = "worker-id";
pub const MAX_VIBRATION_OFFSET: &str = "max-vibration-offset";

/// `SNOWFLAKE`: 41-bit millisecond timestamp, 10-bit worker id, 12-bit sequence.
#[derive(Debug)]
pub struct SnowflakeKeyGenerateAlgorithm {
    worker_id: i64,
    max_vibration_offset: i64,
    state: Mutex<SnowflakeState>,
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: i64,
    sequence: i64,
    /// Rotating start offset so low-traffic shards still see varied low bits.
    vibration: i64,
}

impl SnowflakeKeyGenerateAlgorithm {
    pub fn from_props(props: &Props) -> anyhow::Result<Self> {
        let worker_id = parse_i64(props, WORKER_ID, 0)?;
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            bail!("`{WORKER_ID}` must be within 0..={MAX_WORKER_ID}, got {worker_id}");
        }
        let max_vibration_offset = parse_i64(props, MAX_VIBRATION_OFFSET, 1)?;
        if !(0..=SEQUENCE_MASK).contains(&max_vibration_offset) {
            bail!("`{MAX_VIBRATION_OFFSET}` must be within 0..={SEQUENCE_MASK}");
        }
        Ok(Self {
            worker_id,
            max_vibration_offset,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    fn next_id(&self, now_ms: i64) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Clock regressions reuse the last timestamp instead of minting duplicates.
        let mut now_ms = now_ms.max(state.last_ms);
        if now_ms == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond; borrow the next one.
                now_ms += 1;
                state.sequence = self.next_vibration(&mut state);
            }
        } else {
            state.sequence = self.next_vibration(&mut state);
        }
        state.last_ms = now_ms;
        ((now_ms - SNOWFLAKE_EPOCH_MS) << TIMESTAMP_SHIFT)
            | (self.worker_id << WORKER_ID_SHIFT)
            | state.sequence
    }

    fn next_vibration(&self, state: &mut SnowflakeState) -> i64 {
        let current = state.vibration;
        state.vibration = if current >= self.max_vibration_offset {
            0
        } else {
            current + 1
        };
        current
    }

    /// Worker id encoded into a previously generated key.
    pub fn worker_id_of(key: i64) -> i64 {
        (key >> WORKER_ID_SHIFT) & MAX_WORKER_ID
    }
}

impl KeyGenerateAlgorithm for SnowflakeKeyGenerateAlgorithm {
    fn type_name(&self) -> &str {
        "SNOWFLAKE"
    }

    fn generate_key(&self) -> KeyValue {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(SNOWFLAKE_EPOCH_MS);
        KeyValue::Long(self.next_id(now_ms))
    }
}

/// `INCREMENT`: process-local counter starting at 1. Wraps to `i32::MIN`
/// after `i32::MAX`.
#[derive(Debug, Default)]
pub struct IncrementKeyGenerateAlgorithm {
    counter: AtomicI32,
}

impl KeyGenerateAlgorithm for IncrementKeyGenerateAlgorithm {
    fn type_name(&self) -> &str {
        "INCREMENT"
    }

    fn generate_key(&self) -> KeyValue {
        KeyValue::Int(self.counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1))
    }
}

/// `UUID`: random v4 UUID without hyphens.
#[derive(Debug, Default)]
pub struct UuidKeyGenerateAlgorithm;

impl KeyGenerateAlgorithm for UuidKeyGenerateAlgorithm {
    fn type_name(&self) -> &str {
        "UUID"
    }

    fn generate_key(&self) -> KeyValue {
        KeyValue::Text(uuid::Uuid::new_v4().simple().to_string())
    }
}

fn parse_i64(props: &Props, key: &str, default_value: i64) -> anyhow::Result<i64> {
    match props.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .with_context(|| format!("invalid `{key}` value: {raw}")),
        None => Ok(default_value),
    }
}
