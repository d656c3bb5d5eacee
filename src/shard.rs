//! Shard identifiers and stable metric-to-shard mapping
//!
//! Shards partition the metric identifier space so a fleet of processes can
//! divide scheduling work. The locator hash must be stable across processes
//! and releases, so it uses crc32 rather than the process-seeded std hasher.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Number of shards in the fixed shard space `[0, SHARD_COUNT)`.
pub const SHARD_COUNT: u32 = 128;

/// A hash-partition of the metric identifier space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Shard(pub u32);

impl Shard {
    /// Map a metric locator string to its shard.
    ///
    /// Deterministic and stable fleet-wide; must agree with the shard
    /// derivation used by ingestion routing.
    pub fn for_locator(locator: &str) -> Shard {
        Shard(crc32fast::hash(locator.as_bytes()) % SHARD_COUNT)
    }

    /// All shards in the shard space, ascending.
    pub fn all() -> impl Iterator<Item = Shard> {
        (0..SHARD_COUNT).map(Shard)
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A hierarchical metric identifier, e.g. `acct.web01.cpu.user`.
///
/// The locator's string form is the sole input to shard assignment, so
/// ingestion routing and rollup scheduling always agree on placement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Locator(String);

impl Locator {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn shard(&self) -> Shard {
        Shard::for_locator(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(s: &str) -> Self {
        Locator::new(s)
    }
}

/// An ordered set of shards, used for the managed-shard configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSet(BTreeSet<Shard>);

impl ShardSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// The full shard space.
    pub fn full() -> Self {
        Self(Shard::all().collect())
    }

    pub fn contains(&self, shard: Shard) -> bool {
        self.0.contains(&shard)
    }

    /// Returns true if the shard was not already present.
    pub fn insert(&mut self, shard: Shard) -> bool {
        self.0.insert(shard)
    }

    /// Returns true if the shard was present.
    pub fn remove(&mut self, shard: Shard) -> bool {
        self.0.remove(&shard)
    }

    pub fn iter(&self) -> impl Iterator<Item = Shard> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Shard> for ShardSet {
    fn from_iter<T: IntoIterator<Item = Shard>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromIterator<u32> for ShardSet {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self(iter.into_iter().map(Shard).collect())
    }
}
