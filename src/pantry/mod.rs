//! Freshness cache engine
//!
//! Values live in a [`Store`] with expiry set to their "use by" duration.
//! Next to each value the engine keeps a [`StorageDetails`] record under a
//! derived metadata key, so several engines sharing one store agree on
//! freshness. Every get classifies the value into a tier and publishes the
//! matching lifecycle [`Event`].

mod details;
mod options;

use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::config::PantryConfig;
use crate::error::{PantryError, Result};
use crate::events::{Backpressure, Event, EventBus, EventBusConfig, EventType, Handler};
use crate::store::Store;

pub use details::{Defaults, Freshness, StorageDetails, DEFAULT_BEST_BY, DEFAULT_USE_BY};
pub use options::{GetOptions, PutOptions, RestockFn, RestockFuture};

/// Default suffix of metadata keys
pub const DEFAULT_METADATA_SUFFIX: &str = ".config";

/// Outcome of a [`Pantry::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieval {
  value: Option<String>,
  freshness: Freshness,
}

impl Retrieval {
  fn found(value: String, freshness: Freshness) -> Self {
    Self {
      value: Some(value),
      freshness,
    }
  }

  fn missing(freshness: Freshness) -> Self {
    Self {
      value: None,
      freshness,
    }
  }

  pub fn is_found(&self) -> bool {
    self.value.is_some()
  }

  pub fn value(&self) -> Option<&str> {
    self.value.as_deref()
  }

  pub fn into_value(self) -> Option<String> {
    self.value
  }

  /// Tier the stored value was in when the get started
  pub fn freshness(&self) -> Freshness {
    self.freshness
  }
}

/// Builder for [`Pantry`]
pub struct PantryBuilder {
  store: Arc<dyn Store>,
  defaults: Defaults,
  events: EventBusConfig,
  restock_timeout: Option<Duration>,
  metadata_suffix: String,
}

impl PantryBuilder {
  pub fn defaults(mut self, defaults: Defaults) -> Self {
    self.defaults = defaults;
    self
  }

  pub fn events(mut self, events: EventBusConfig) -> Self {
    self.events = events;
    self
  }

  pub fn event_capacity(mut self, capacity: usize) -> Self {
    self.events.capacity = capacity;
    self
  }

  pub fn backpressure(mut self, backpressure: Backpressure) -> Self {
    self.events.backpressure = backpressure;
    self
  }

  pub fn shards(mut self, shards: usize) -> Self {
    self.events.shards = shards;
    self
  }

  /// Bound every restock call; unbounded by default
  pub fn restock_timeout(mut self, timeout: Duration) -> Self {
    self.restock_timeout = Some(timeout).filter(|t| !t.is_zero());
    self
  }

  /// Suffix appended to a key to form its metadata key. Empty keeps the default.
  pub fn metadata_suffix(mut self, suffix: impl Into<String>) -> Self {
    let suffix = suffix.into();
    if !suffix.is_empty() {
      self.metadata_suffix = suffix;
    }
    self
  }

  /// Start the event dispatcher and return the engine. Needs a Tokio runtime.
  pub fn build(self) -> Pantry {
    let bus = EventBus::with_config(&self.events);
    Pantry {
      inner: Arc::new(Inner {
        store: self.store,
        bus,
        defaults: self.defaults,
        restock_timeout: self.restock_timeout,
        metadata_suffix: self.metadata_suffix,
        restocks: Mutex::new(HashSet::new()),
      }),
    }
  }
}

struct Inner {
  store: Arc<dyn Store>,
  bus: EventBus<Event>,
  defaults: Defaults,
  restock_timeout: Option<Duration>,
  metadata_suffix: String,
  /// Keys with a background restock running in this process
  restocks: Mutex<HashSet<String>>,
}

/// Held by a background restock; releases the key when dropped
struct RestockSlot {
  inner: Arc<Inner>,
  key: String,
}

impl Drop for RestockSlot {
  fn drop(&mut self) {
    self.inner.restocks.lock().remove(&self.key);
  }
}

/// Freshness-tiered cache in front of a [`Store`].
///
/// Cheap to clone; clones share the store, the event bus and the defaults.
#[derive(Clone)]
pub struct Pantry {
  inner: Arc<Inner>,
}

impl Pantry {
  /// Engine with default durations and event settings
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self::builder(store).build()
  }

  pub fn builder(store: Arc<dyn Store>) -> PantryBuilder {
    PantryBuilder {
      store,
      defaults: Defaults::default(),
      events: EventBusConfig::default(),
      restock_timeout: None,
      metadata_suffix: DEFAULT_METADATA_SUFFIX.to_string(),
    }
  }

  /// Engine configured from a loaded [`PantryConfig`]
  pub fn from_config(store: Arc<dyn Store>, config: &PantryConfig) -> Result<Self> {
    let mut builder = Self::builder(store)
      .defaults(config.defaults()?)
      .events(config.events.clone())
      .metadata_suffix(config.metadata_suffix.clone());
    if let Some(timeout) = config.restock.timeout() {
      builder = builder.restock_timeout(timeout);
    }
    Ok(builder.build())
  }

  pub fn defaults(&self) -> Defaults {
    self.inner.defaults
  }

  /// Event bus carrying this engine's lifecycle events
  pub fn events(&self) -> &EventBus<Event> {
    &self.inner.bus
  }

  /// Call `handler` for every lifecycle event
  pub fn on_event<F>(&self, handler: F)
  where
    F: Fn(&Event) + Send + Sync + 'static,
  {
    let handler: Handler<Event> = Arc::new(handler);
    for event_type in EventType::ALL {
      self
        .inner
        .bus
        .subscribe_handler(event_type.as_str(), handler.clone());
    }
  }

  /// Call `handler` for events of one type only
  pub fn on<F>(&self, event_type: EventType, handler: F)
  where
    F: Fn(&Event) + Send + Sync + 'static,
  {
    self.inner.bus.subscribe(event_type.as_str(), handler);
  }

  /// Stock `value` under `key`.
  ///
  /// Durations come from `options`, else from the key's registration, else
  /// from the defaults. Invalid durations are rejected before anything is
  /// written.
  pub async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<()> {
    self.validate_key(key)?;

    let existing = match self.load_details(key).await {
      Ok(details) => details,
      Err(PantryError::Metadata { source, .. }) => {
        tracing::warn!("Overwriting unreadable metadata for '{}': {}", key, source);
        None
      }
      Err(e) => return Err(e),
    };
    let registration = existing.filter(|d| d.registered);

    let (best_by, use_by) = match (options.durations(), &registration) {
      (Some(durations), _) => durations,
      (None, Some(registered)) => (registered.best_by, registered.use_by),
      (None, None) => (self.inner.defaults.best_by(), self.inner.defaults.use_by()),
    };

    let mut details = StorageDetails::stocked(best_by, use_by, Utc::now())?;
    details.registered = registration.is_some();

    self.inner.store.set(key, value, Some(use_by)).await?;
    self.save_details(key, &details).await?;
    tracing::debug!("Stocked '{}' (best by {:?}, use by {:?})", key, best_by, use_by);
    Ok(())
  }

  /// Retrieve `key` and classify its freshness.
  ///
  /// Cold values are returned as-is while a restock runs in the background.
  /// Expired or evicted values are restocked before returning.
  pub async fn get(&self, key: &str, options: GetOptions) -> Result<Retrieval> {
    self.validate_key(key)?;
    let restock = options.restock().cloned();

    let Some(details) = self.load_details(key).await? else {
      self.publish(key, EventType::NotFound);
      return Ok(Retrieval::missing(Freshness::NotFound));
    };

    if details.timestamp.is_none() {
      // Registered but never stocked
      self.publish(key, EventType::NotFound);
      return self
        .restock(key, None, details, restock, Freshness::NotFound)
        .await;
    }

    let Some(value) = self.inner.store.get(key).await? else {
      self.publish(key, EventType::Expired);
      return self
        .restock(key, None, details, restock, Freshness::Expired)
        .await;
    };

    let now = Utc::now();
    match details.freshness(now) {
      Freshness::Fresh => {
        self.publish(key, EventType::Fresh);
        Ok(Retrieval::found(value, Freshness::Fresh))
      }
      Freshness::Cold => {
        self.publish(key, EventType::Cold);
        if details.restocking {
          tracing::debug!("Restock of '{}' already in flight", key);
        } else {
          self
            .restock_in_background(key, value.clone(), details, restock)
            .await;
        }
        Ok(Retrieval::found(value, Freshness::Cold))
      }
      Freshness::Expired | Freshness::NotFound => {
        self.publish(key, EventType::Expired);
        self
          .restock(key, Some(value), details, restock, Freshness::Expired)
          .await
      }
    }
  }

  /// Delete the value and its metadata. Removing a missing key is a no-op.
  pub async fn remove(&self, key: &str) -> Result<()> {
    self.validate_key(key)?;
    self.inner.store.remove(key).await?;
    self.inner.store.remove(&self.metadata_key(key)).await?;
    Ok(())
  }

  /// Override the default durations for one key.
  ///
  /// Later puts without explicit durations use these. A value already stocked
  /// keeps its stock time.
  pub async fn register(&self, key: &str, best_by: Duration, use_by: Duration) -> Result<()> {
    self.validate_key(key)?;
    let mut details = StorageDetails::registered(best_by, use_by)?;

    match self.load_details(key).await {
      Ok(Some(existing)) => {
        details.timestamp = existing.timestamp;
        details.restocking = existing.restocking;
      }
      Ok(None) => {}
      Err(PantryError::Metadata { source, .. }) => {
        tracing::warn!("Overwriting unreadable metadata for '{}': {}", key, source);
      }
      Err(e) => return Err(e),
    }

    self.save_details(key, &details).await
  }

  /// Drop the key's metadata, registration included
  pub async fn deregister(&self, key: &str) -> Result<()> {
    self.validate_key(key)?;
    self.inner.store.remove(&self.metadata_key(key)).await?;
    Ok(())
  }

  pub async fn ping(&self) -> Result<()> {
    self.inner.store.ping().await?;
    Ok(())
  }

  /// Close the event bus and the store
  pub async fn close(&self) -> Result<()> {
    self.inner.bus.close();
    self.inner.store.close().await?;
    tracing::info!("Pantry closed");
    Ok(())
  }

  fn metadata_key(&self, key: &str) -> String {
    format!("{}{}", key, self.inner.metadata_suffix)
  }

  fn validate_key(&self, key: &str) -> Result<()> {
    if key.is_empty() || key.ends_with(&self.inner.metadata_suffix) {
      return Err(PantryError::ReservedKey(key.to_string()));
    }
    Ok(())
  }

  fn publish(&self, key: &str, event_type: EventType) {
    tracing::debug!("{} {}", event_type, key);
    self
      .inner
      .bus
      .publish(event_type.as_str(), Event::new(key, event_type));
  }

  async fn load_details(&self, key: &str) -> Result<Option<StorageDetails>> {
    let Some(raw) = self.inner.store.get(&self.metadata_key(key)).await? else {
      return Ok(None);
    };
    serde_json::from_str(&raw)
      .map(Some)
      .map_err(|source| PantryError::Metadata {
        key: key.to_string(),
        source,
      })
  }

  async fn save_details(&self, key: &str, details: &StorageDetails) -> Result<()> {
    let raw = serde_json::to_string(details).map_err(|source| PantryError::Metadata {
      key: key.to_string(),
      source,
    })?;
    self
      .inner
      .store
      .set(&self.metadata_key(key), &raw, None)
      .await?;
    Ok(())
  }

  /// Synchronous restock: the caller waits for the fresh value
  async fn restock(
    &self,
    key: &str,
    cached: Option<String>,
    mut details: StorageDetails,
    restock: Option<RestockFn>,
    observed: Freshness,
  ) -> Result<Retrieval> {
    let Some(restock) = restock else {
      self.publish(key, EventType::OutOfStock);
      return Ok(Retrieval::missing(observed));
    };

    self.mark_restocking(key, &mut details).await?;
    self
      .complete_restock(key, cached, details, restock, observed)
      .await
  }

  /// Cold-path restock. The key is claimed in-process and the flag persisted
  /// before the task is spawned, so later gets skip their own restock.
  async fn restock_in_background(
    &self,
    key: &str,
    cached: String,
    mut details: StorageDetails,
    restock: Option<RestockFn>,
  ) {
    let Some(restock) = restock else {
      self.publish(key, EventType::OutOfStock);
      return;
    };

    let Some(slot) = self.claim_restock(key) else {
      tracing::debug!("Restock of '{}' already in flight", key);
      return;
    };

    if let Err(e) = self.mark_restocking(key, &mut details).await {
      tracing::warn!("Skipping background restock of '{}': {}", key, e);
      return;
    }

    let this = self.clone();
    let key = key.to_string();
    tokio::spawn(async move {
      let _slot = slot;
      let outcome = this
        .complete_restock(&key, Some(cached), details, restock, Freshness::Cold)
        .await;
      if let Err(e) = outcome {
        tracing::warn!("Background restock of '{}' failed: {}", key, e);
      }
    });
  }

  fn claim_restock(&self, key: &str) -> Option<RestockSlot> {
    if !self.inner.restocks.lock().insert(key.to_string()) {
      return None;
    }
    Some(RestockSlot {
      inner: self.inner.clone(),
      key: key.to_string(),
    })
  }

  async fn mark_restocking(&self, key: &str, details: &mut StorageDetails) -> Result<()> {
    details.restocking = true;
    self.save_details(key, details).await
  }

  async fn complete_restock(
    &self,
    key: &str,
    cached: Option<String>,
    details: StorageDetails,
    restock: RestockFn,
    observed: Freshness,
  ) -> Result<Retrieval> {
    tracing::debug!("Restocking '{}'", key);

    let fresh = match self.invoke_restock(key, &restock).await {
      Ok(fresh) => fresh,
      Err(err) => {
        self.clear_restocking(key).await;
        return Err(err);
      }
    };

    self.publish(key, EventType::Restock);
    let options = PutOptions::new().with_durations(details.best_by, details.use_by);
    if let Err(err) = self.put(key, &fresh, options).await {
      self.clear_restocking(key).await;
      return Err(err);
    }

    if cached.as_deref() == Some(fresh.as_str()) {
      self.publish(key, EventType::Unchanged);
    }
    Ok(Retrieval::found(fresh, observed))
  }

  async fn invoke_restock(&self, key: &str, restock: &RestockFn) -> Result<String> {
    // The closure itself may panic before handing back its future
    let future = catch_unwind(AssertUnwindSafe(|| restock())).map_err(|_| {
      PantryError::RestockFailure {
        key: key.to_string(),
        source: anyhow::anyhow!("restock function panicked"),
      }
    })?;
    let call = AssertUnwindSafe(future).catch_unwind();

    let outcome = match self.inner.restock_timeout {
      Some(timeout) => tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| PantryError::RestockTimeout {
          key: key.to_string(),
          timeout,
        })?,
      None => call.await,
    };

    let result = outcome.unwrap_or_else(|_| Err(anyhow::anyhow!("restock function panicked")));
    result.map_err(|source| PantryError::RestockFailure {
      key: key.to_string(),
      source,
    })
  }

  /// Reset the in-flight flag on the current record after a failed restock
  async fn clear_restocking(&self, key: &str) {
    let current = match self.load_details(key).await {
      Ok(Some(current)) => current,
      Ok(None) => return,
      Err(e) => {
        tracing::warn!("Could not reload metadata for '{}': {}", key, e);
        return;
      }
    };

    let details = StorageDetails {
      restocking: false,
      ..current
    };
    if let Err(e) = self.save_details(key, &details).await {
      tracing::warn!("Could not clear restocking flag for '{}': {}", key, e);
    }
  }
}
