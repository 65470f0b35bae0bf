//! Sharded concurrent registry.
//!
//! Maps a topic string to an ordered list of values. Keys are spread over a
//! fixed number of shards, each guarded by its own reader-writer lock, so
//! operations on different topics rarely contend.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Shard count used when none (or zero) is requested
pub const DEFAULT_SHARDS: usize = 16;

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// FNV-1a, 32 bit. Stable across processes and platforms.
pub fn fnv32(key: &str) -> u32 {
  key.bytes().fold(FNV32_OFFSET_BASIS, |hash, byte| {
    (hash ^ byte as u32).wrapping_mul(FNV32_PRIME)
  })
}

/// Multi-valued map partitioned into independently locked shards.
///
/// `size` and `keys` walk the shards one at a time and are not atomic
/// snapshots while other threads are writing.
pub struct ShardedRegistry<V> {
  shards: Vec<RwLock<HashMap<String, Vec<V>>>>,
}

impl<V: Clone> ShardedRegistry<V> {
  pub fn new() -> Self {
    Self::with_shards(DEFAULT_SHARDS)
  }

  /// Create a registry with `shards` partitions (0 falls back to the default)
  pub fn with_shards(shards: usize) -> Self {
    let shards = if shards == 0 { DEFAULT_SHARDS } else { shards };
    Self {
      shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
    }
  }

  pub fn shard_count(&self) -> usize {
    self.shards.len()
  }

  fn shard(&self, key: &str) -> &RwLock<HashMap<String, Vec<V>>> {
    let index = fnv32(key) as usize % self.shards.len();
    &self.shards[index]
  }

  /// Clone of the values stored under `key`
  pub fn get(&self, key: &str) -> Option<Vec<V>> {
    self.shard(key).read().get(key).cloned()
  }

  /// Replace the values stored under `key`
  pub fn set(&self, key: &str, values: Vec<V>) {
    self.shard(key).write().insert(key.to_string(), values);
  }

  /// Append a value to the list under `key`, creating the list if needed
  pub fn append(&self, key: &str, value: V) {
    self
      .shard(key)
      .write()
      .entry(key.to_string())
      .or_default()
      .push(value);
  }

  pub fn remove(&self, key: &str) -> Option<Vec<V>> {
    self.shard(key).write().remove(key)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.shard(key).read().contains_key(key)
  }

  /// Number of values under `key` (0 if absent)
  pub fn len_of(&self, key: &str) -> usize {
    self.shard(key).read().get(key).map(Vec::len).unwrap_or(0)
  }

  pub fn keys(&self) -> Vec<String> {
    self
      .shards
      .iter()
      .flat_map(|shard| shard.read().keys().cloned().collect::<Vec<_>>())
      .collect()
  }

  /// Number of keys across all shards
  pub fn size(&self) -> usize {
    self.shards.iter().map(|shard| shard.read().len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.shards.iter().all(|shard| shard.read().is_empty())
  }

  pub fn clear(&self) {
    for shard in &self.shards {
      shard.write().clear();
    }
  }
}

impl<V: Clone> Default for ShardedRegistry<V> {
  fn default() -> Self {
    Self::new()
  }
}
