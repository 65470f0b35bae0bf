//! In-process store with per-entry expiry

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Store, StoreError};

#[derive(Debug, Clone)]
struct Entry {
  value: String,
  expires_at: Option<Instant>,
}

impl Entry {
  fn new(value: String, ttl: Option<Duration>) -> Self {
    // A ttl too large to represent never expires
    let expires_at = ttl
      .filter(|d| !d.is_zero())
      .and_then(|d| Instant::now().checked_add(d));
    Self { value, expires_at }
  }

  fn is_expired(&self) -> bool {
    self
      .expires_at
      .map(|exp| Instant::now() >= exp)
      .unwrap_or(false)
  }
}

/// Thread-safe in-memory store.
///
/// Expired entries are never returned; they are removed lazily on access and
/// by [`MemoryStore::evict_expired`].
pub struct MemoryStore {
  data: RwLock<HashMap<String, Entry>>,
  closed: AtomicBool,
  expired: AtomicU64,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    Self {
      data: RwLock::new(HashMap::new()),
      closed: AtomicBool::new(false),
      expired: AtomicU64::new(0),
    }
  }

  fn ensure_open(&self) -> Result<(), StoreError> {
    if self.closed.load(Ordering::Acquire) {
      Err(StoreError::Closed)
    } else {
      Ok(())
    }
  }

  /// Remove every expired entry, returning how many were removed
  pub fn evict_expired(&self) -> usize {
    let mut data = self.data.write();
    let before = data.len();
    data.retain(|_, entry| !entry.is_expired());
    let count = before - data.len();
    self.expired.fetch_add(count as u64, Ordering::Relaxed);
    count
  }

  /// Number of live entries
  pub fn len(&self) -> usize {
    self
      .data
      .read()
      .values()
      .filter(|e| !e.is_expired())
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Entries removed because their expiry passed
  pub fn expired_count(&self) -> u64 {
    self.expired.load(Ordering::Relaxed)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self
      .data
      .read()
      .get(key)
      .map(|e| !e.is_expired())
      .unwrap_or(false)
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    self.ensure_open()?;

    {
      let data = self.data.read();
      match data.get(key) {
        None => return Ok(None),
        Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
        Some(_) => {}
      }
    }

    // Expired: drop it under the write lock, unless it was rewritten meanwhile
    let mut data = self.data.write();
    if let Some(entry) = data.get(key) {
      if entry.is_expired() {
        data.remove(key);
        self.expired.fetch_add(1, Ordering::Relaxed);
      } else {
        return Ok(Some(entry.value.clone()));
      }
    }
    Ok(None)
  }

  async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
    self.ensure_open()?;
    self
      .data
      .write()
      .insert(key.to_string(), Entry::new(value.to_string(), ttl));
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.ensure_open()?;
    self.data.write().remove(key);
    Ok(())
  }

  async fn ping(&self) -> Result<(), StoreError> {
    self.ensure_open()
  }

  async fn close(&self) -> Result<(), StoreError> {
    self.closed.store(true, Ordering::Release);
    self.data.write().clear();
    Ok(())
  }
}

/// Periodically sweep expired entries until the store is closed
pub async fn run_expiration_task(store: Arc<MemoryStore>, interval: Duration) {
  let interval = if interval.is_zero() {
    Duration::from_secs(1)
  } else {
    interval
  };

  loop {
    tokio::time::sleep(interval).await;
    if store.closed.load(Ordering::Acquire) {
      break;
    }
    let expired = store.evict_expired();
    if expired > 0 {
      tracing::debug!("Evicted {} expired keys", expired);
    }
  }
}
