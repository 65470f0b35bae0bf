//! Backing key-value stores
//!
//! The engine only needs get / set-with-expiry / remove / ping / close.
//! Any store implementing [`Store`] can sit behind a [`crate::Pantry`].

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use memory::{run_expiration_task, MemoryStore};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Store operation error
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("store is closed")]
  Closed,
  #[error("backend error: {0}")]
  Backend(String),
  #[cfg(feature = "redis")]
  #[error("redis error: {0}")]
  Redis(#[from] ::redis::RedisError),
}

/// Key-value store contract consumed by the engine
#[async_trait]
pub trait Store: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

  /// Store `value` under `key`. `None` or a zero ttl means no expiry.
  async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

  /// Remove `key`. Removing a missing key is not an error.
  async fn remove(&self, key: &str) -> Result<(), StoreError>;

  async fn ping(&self) -> Result<(), StoreError>;

  async fn close(&self) -> Result<(), StoreError>;
}

/// Which store the binary connects to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
  /// In-process store (default)
  #[default]
  Memory,
  /// External Redis server
  Redis,
}

impl std::fmt::Display for StoreBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StoreBackend::Memory => write!(f, "memory"),
      StoreBackend::Redis => write!(f, "redis"),
    }
  }
}

impl std::str::FromStr for StoreBackend {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "memory" | "inmemory" | "builtin" => Ok(StoreBackend::Memory),
      "redis" | "external" => Ok(StoreBackend::Redis),
      _ => Err(format!("Unknown store backend: {}", s)),
    }
  }
}

/// Connection settings for an external Redis server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
  #[serde(default = "default_host")]
  pub host: String,

  #[serde(default = "default_redis_port")]
  pub port: u16,

  #[serde(default)]
  pub password: Option<String>,

  /// Redis database number
  #[serde(default)]
  pub database: u8,

  #[serde(default)]
  pub tls_enabled: bool,
}

fn default_host() -> String {
  "localhost".to_string()
}

fn default_redis_port() -> u16 {
  6379
}

impl Default for RedisConfig {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_redis_port(),
      password: None,
      database: 0,
      tls_enabled: false,
    }
  }
}

impl RedisConfig {
  /// Redis connection URL, e.g. `redis://:secret@localhost:6379/0`
  pub fn connection_url(&self) -> String {
    let scheme = if self.tls_enabled { "rediss" } else { "redis" };
    let auth = match &self.password {
      Some(pwd) if !pwd.is_empty() => format!(":{}@", pwd),
      _ => String::new(),
    };
    format!(
      "{}://{}{}:{}/{}",
      scheme, auth, self.host, self.port, self.database
    )
  }
}
