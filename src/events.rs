//! Lifecycle events and the asynchronous event bus that delivers them.
//!
//! Publishers enqueue onto a bounded channel without blocking. A single
//! dispatcher task drains the channel and calls every handler registered for
//! the event's topic, in registration order.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::registry::{ShardedRegistry, DEFAULT_SHARDS};

/// Lifecycle event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
  /// Item has not passed its "best by" duration
  Fresh,
  /// Item has passed "best by" but not "use by"
  Cold,
  /// Item has passed "use by", or the store no longer holds it
  Expired,
  /// Item was never stocked
  NotFound,
  /// Item was replaced by a fresh one
  Restock,
  /// Item needed restocking but no restock function was given
  OutOfStock,
  /// Restocked item is identical to the one it replaced
  Unchanged,
}

impl EventType {
  pub const ALL: [EventType; 7] = [
    EventType::Fresh,
    EventType::Cold,
    EventType::Expired,
    EventType::NotFound,
    EventType::Restock,
    EventType::OutOfStock,
    EventType::Unchanged,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      EventType::Fresh => "FRESH",
      EventType::Cold => "COLD",
      EventType::Expired => "EXPIRED",
      EventType::NotFound => "NOT_FOUND",
      EventType::Restock => "RESTOCK",
      EventType::OutOfStock => "OUT_OF_STOCK",
      EventType::Unchanged => "UNCHANGED",
    }
  }
}

impl std::fmt::Display for EventType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for EventType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    EventType::ALL
      .into_iter()
      .find(|t| t.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| format!("Unknown event type: {}", s))
  }
}

/// A lifecycle event for a single key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
  pub key: String,
  pub event_type: EventType,
}

impl Event {
  pub fn new(key: impl Into<String>, event_type: EventType) -> Self {
    Self {
      key: key.into(),
      event_type,
    }
  }
}

/// What `publish` does when the queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
  /// Hand the event to a background task that waits for space
  #[default]
  Block,
  /// Discard the event
  Drop,
}

impl std::str::FromStr for Backpressure {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "block" | "retry" => Ok(Backpressure::Block),
      "drop" | "discard" => Ok(Backpressure::Drop),
      _ => Err(format!("Unknown backpressure policy: {}", s)),
    }
  }
}

impl std::fmt::Display for Backpressure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Backpressure::Block => write!(f, "block"),
      Backpressure::Drop => write!(f, "drop"),
    }
  }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
  /// Queue capacity
  #[serde(default = "default_capacity")]
  pub capacity: usize,

  /// Full-queue policy
  #[serde(default)]
  pub backpressure: Backpressure,

  /// Subscriber registry shards
  #[serde(default = "default_shards")]
  pub shards: usize,
}

fn default_capacity() -> usize {
  10_000
}

fn default_shards() -> usize {
  DEFAULT_SHARDS
}

impl Default for EventBusConfig {
  fn default() -> Self {
    Self {
      capacity: default_capacity(),
      backpressure: Backpressure::default(),
      shards: default_shards(),
    }
  }
}

/// Subscriber callback
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Envelope<E> {
  topic: String,
  payload: E,
}

/// Topic-based pub/sub with a single dispatcher task.
///
/// Handlers run on the dispatcher task, so a slow handler delays every
/// event behind it. Must be created inside a Tokio runtime.
pub struct EventBus<E> {
  tx: mpsc::Sender<Envelope<E>>,
  registry: Arc<ShardedRegistry<Handler<E>>>,
  closed: Arc<AtomicBool>,
  shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
  backpressure: Backpressure,
  dropped: AtomicU64,
}

impl<E> EventBus<E>
where
  E: Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::with_config(&EventBusConfig::default())
  }

  pub fn with_config(config: &EventBusConfig) -> Self {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let registry = Arc::new(ShardedRegistry::with_shards(config.shards));
    let closed = Arc::new(AtomicBool::new(false));

    tokio::spawn(run_dispatcher(
      rx,
      shutdown_rx,
      registry.clone(),
      closed.clone(),
    ));

    tracing::debug!(
      "Event bus started (capacity {}, backpressure {})",
      config.capacity.max(1),
      config.backpressure
    );

    Self {
      tx,
      registry,
      closed,
      shutdown_tx: Mutex::new(Some(shutdown_tx)),
      backpressure: config.backpressure,
      dropped: AtomicU64::new(0),
    }
  }

  /// Enqueue `payload` for every handler of `topic`. Never blocks.
  pub fn publish(&self, topic: &str, payload: E) {
    if self.is_closed() {
      tracing::debug!("Event bus closed, discarding event for '{}'", topic);
      return;
    }

    let envelope = Envelope {
      topic: topic.to_string(),
      payload,
    };

    match self.tx.try_send(envelope) {
      Ok(()) => {}
      Err(TrySendError::Full(envelope)) => match self.backpressure {
        Backpressure::Block => match tokio::runtime::Handle::try_current() {
          Ok(handle) => {
            let tx = self.tx.clone();
            handle.spawn(async move {
              // Fails only once the dispatcher is gone
              let _ = tx.send(envelope).await;
            });
          }
          Err(_) => self.record_drop(topic),
        },
        Backpressure::Drop => self.record_drop(topic),
      },
      Err(TrySendError::Closed(_)) => {
        tracing::debug!("Event dispatcher stopped, discarding event for '{}'", topic);
      }
    }
  }

  fn record_drop(&self, topic: &str) {
    self.dropped.fetch_add(1, Ordering::Relaxed);
    tracing::warn!("Event queue full, dropped event for '{}'", topic);
  }

  /// Register a handler for `topic`
  pub fn subscribe<F>(&self, topic: &str, handler: F)
  where
    F: Fn(&E) + Send + Sync + 'static,
  {
    self.subscribe_handler(topic, Arc::new(handler));
  }

  pub fn subscribe_handler(&self, topic: &str, handler: Handler<E>) {
    self.registry.append(topic, handler);
  }

  /// Remove every handler of `topic`, returning how many were removed
  pub fn unsubscribe_all(&self, topic: &str) -> usize {
    self.registry.remove(topic).map(|h| h.len()).unwrap_or(0)
  }

  pub fn subscriber_count(&self, topic: &str) -> usize {
    self.registry.len_of(topic)
  }

  pub fn topic_count(&self) -> usize {
    self.registry.size()
  }

  /// Events discarded because the queue was full
  pub fn dropped_count(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }

  /// Events waiting in the queue
  pub fn pending(&self) -> usize {
    self.tx.max_capacity() - self.tx.capacity()
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  /// Stop accepting events, discard queued ones and drop all subscribers
  pub fn close(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(tx) = self.shutdown_tx.lock().take() {
      let _ = tx.send(());
    }
    self.registry.clear();
    tracing::debug!("Event bus closed");
  }
}

impl<E> Default for EventBus<E>
where
  E: Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<E> Drop for EventBus<E> {
  fn drop(&mut self) {
    self.closed.store(true, Ordering::Release);
    if let Some(tx) = self.shutdown_tx.lock().take() {
      let _ = tx.send(());
    }
  }
}

async fn run_dispatcher<E>(
  mut rx: mpsc::Receiver<Envelope<E>>,
  mut shutdown_rx: oneshot::Receiver<()>,
  registry: Arc<ShardedRegistry<Handler<E>>>,
  closed: Arc<AtomicBool>,
) {
  loop {
    tokio::select! {
      biased;
      _ = &mut shutdown_rx => break,
      envelope = rx.recv() => {
        let Some(envelope) = envelope else { break };
        if closed.load(Ordering::Acquire) {
          break;
        }
        dispatch(&registry, &envelope);
      }
    }
  }

  rx.close();
  tracing::debug!("Event dispatcher stopped");
}

fn dispatch<E>(registry: &ShardedRegistry<Handler<E>>, envelope: &Envelope<E>) {
  // Clone the list so the shard lock is released before any handler runs
  let Some(handlers) = registry.get(&envelope.topic) else {
    return;
  };

  for handler in handlers {
    let result = catch_unwind(AssertUnwindSafe(|| handler(&envelope.payload)));
    if result.is_err() {
      tracing::error!("Event handler for '{}' panicked", envelope.topic);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_event_type_roundtrip_names() {
    for t in EventType::ALL {
      assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
    }
    assert_eq!("out_of_stock".parse::<EventType>().unwrap(), EventType::OutOfStock);
    assert!("STALE".parse::<EventType>().is_err());
  }

  #[test]
  fn test_event_type_serde() {
    let json = serde_json::to_string(&EventType::NotFound).unwrap();
    assert_eq!(json, "\"NOT_FOUND\"");
  }

  #[test]
  fn test_backpressure_parse() {
    assert_eq!("block".parse::<Backpressure>().unwrap(), Backpressure::Block);
    assert_eq!("DROP".parse::<Backpressure>().unwrap(), Backpressure::Drop);
    assert!("wait".parse::<Backpressure>().is_err());
  }

  #[tokio::test]
  async fn test_handlers_run_in_order() {
    let bus: EventBus<u32> = EventBus::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let first = tx.clone();
    bus.subscribe("numbers", move |n| {
      let _ = first.send(("first", *n));
    });
    let second = tx.clone();
    bus.subscribe("numbers", move |n| {
      let _ = second.send(("second", *n));
    });

    bus.publish("numbers", 7);

    assert_eq!(rx.recv().await, Some(("first", 7)));
    assert_eq!(rx.recv().await, Some(("second", 7)));
  }

  #[tokio::test]
  async fn test_close_discards_new_events() {
    let bus: EventBus<u32> = EventBus::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    bus.subscribe("t", move |n| {
      let _ = tx.send(*n);
    });

    bus.close();
    assert!(bus.is_closed());
    assert_eq!(bus.subscriber_count("t"), 0);

    bus.publish("t", 1);
    let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(!matches!(received, Ok(Some(_))));
  }
}
