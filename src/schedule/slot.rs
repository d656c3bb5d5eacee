//! Slot keys and slot lifecycle states

use crate::granularity::Granularity;
use crate::shard::Shard;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies one unit of rollup work: a single time bucket at a given
/// granularity and shard.
///
/// Totally ordered (shard, then granularity finest-first, then slot) for
/// deterministic scheduling, with a compact string form for persistence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SlotKey {
    pub shard: Shard,
    pub granularity: Granularity,
    pub slot: i64,
}

impl SlotKey {
    pub fn new(shard: Shard, granularity: Granularity, slot: i64) -> Self {
        Self {
            shard,
            granularity,
            slot,
        }
    }

    /// The slot key covering `ts_ms` at the given granularity.
    pub fn containing(shard: Shard, granularity: Granularity, ts_ms: i64) -> Self {
        Self::new(shard, granularity, granularity.slot_number(ts_ms))
    }

    /// Half-open time range `[start, end)` of this slot's bucket.
    pub fn time_range(&self) -> (i64, i64) {
        self.granularity.bucket_range(self.slot)
    }

    /// End of this slot's bucket, exclusive.
    pub fn bucket_end(&self) -> i64 {
        self.time_range().1
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.shard, self.granularity, self.slot)
    }
}

impl FromStr for SlotKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (shard, gran, slot) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => return Err(Error::InvalidSlotKey(s.to_string())),
        };
        let shard = shard
            .parse::<u32>()
            .map_err(|_| Error::InvalidSlotKey(s.to_string()))?;
        let granularity = Granularity::from_str_name(gran)
            .ok_or_else(|| Error::InvalidSlotKey(s.to_string()))?;
        let slot = slot
            .parse::<i64>()
            .map_err(|_| Error::InvalidSlotKey(s.to_string()))?;
        Ok(SlotKey::new(Shard(shard), granularity, slot))
    }
}

/// Per-slot lifecycle state.
///
/// UNSEEN is implicit: a slot with no recorded state has never received
/// data. `Active` means data arrived and a rollup is owed; `Rolled` means
/// the last rollup covers all data seen so far. Late-arriving data moves a
/// `Rolled` slot back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Active,
    Rolled,
}
