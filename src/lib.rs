//! Pantry: a freshness-tiered cache in front of a key-value store.
//!
//! Values are stocked with a "best by" and a "use by" duration. Reads past
//! best by return the stale value and refresh it in the background. Reads
//! past use by refresh synchronously through a caller-supplied restock
//! function. Every read publishes a lifecycle [`Event`].

pub mod config;
pub mod error;
pub mod events;
pub mod pantry;
pub mod registry;
pub mod store;

pub use config::PantryConfig;
pub use error::{PantryError, Result};
pub use events::{Backpressure, Event, EventBus, EventBusConfig, EventType, Handler};
pub use pantry::{
  Defaults, Freshness, GetOptions, Pantry, PantryBuilder, PutOptions, RestockFn, Retrieval,
  StorageDetails,
};
pub use registry::ShardedRegistry;
pub use store::{MemoryStore, Store, StoreBackend, StoreError};
#[cfg(feature = "redis")]
pub use store::RedisStore;
