//! Store backed by an external Redis server

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{RedisConfig, Store, StoreError};

/// Redis adds the current time to an expiry and rejects overflow
const MAX_EXPIRE_MILLIS: u64 = (i64::MAX / 2) as u64;

/// PSETEX milliseconds for `ttl`, or `None` when the key should not expire
fn expiry_millis(ttl: Option<Duration>) -> Option<u64> {
  let ttl = ttl.filter(|d| !d.is_zero())?;
  // PSETEX rejects 0, so sub-millisecond ttls round up
  let millis = u64::try_from(ttl.as_millis()).ok()?.max(1);
  (millis <= MAX_EXPIRE_MILLIS).then_some(millis)
}

/// Redis store using a reconnecting connection manager
pub struct RedisStore {
  connection: ConnectionManager,
  closed: AtomicBool,
}

impl RedisStore {
  /// Connect using the given configuration
  pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
    let client = Client::open(config.connection_url())?;
    let connection = ConnectionManager::new(client).await?;
    tracing::info!("Connected to Redis at {}:{}", config.host, config.port);

    Ok(Self {
      connection,
      closed: AtomicBool::new(false),
    })
  }

  fn connection(&self) -> Result<ConnectionManager, StoreError> {
    if self.closed.load(Ordering::Acquire) {
      return Err(StoreError::Closed);
    }
    Ok(self.connection.clone())
  }
}

#[async_trait]
impl Store for RedisStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    let mut conn = self.connection()?;
    let value: Option<String> = conn.get(key).await?;
    Ok(value)
  }

  async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
    let mut conn = self.connection()?;
    match expiry_millis(ttl) {
      Some(millis) => {
        redis::cmd("PSETEX")
          .arg(key)
          .arg(millis)
          .arg(value)
          .query_async::<()>(&mut conn)
          .await?;
      }
      None => {
        conn.set::<_, _, ()>(key, value).await?;
      }
    }
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<(), StoreError> {
    let mut conn = self.connection()?;
    conn.del::<_, ()>(key).await?;
    Ok(())
  }

  async fn ping(&self) -> Result<(), StoreError> {
    let mut conn = self.connection()?;
    redis::cmd("PING").query_async::<()>(&mut conn).await?;
    Ok(())
  }

  async fn close(&self) -> Result<(), StoreError> {
    // The manager owns no resources beyond its socket, which goes with the last clone
    self.closed.store(true, Ordering::Release);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_expiry_millis() {
    assert_eq!(expiry_millis(None), None);
    assert_eq!(expiry_millis(Some(Duration::ZERO)), None);
    assert_eq!(expiry_millis(Some(Duration::from_micros(10))), Some(1));
    assert_eq!(expiry_millis(Some(Duration::from_secs(2))), Some(2000));
  }

  #[test]
  fn test_huge_ttl_does_not_expire() {
    assert_eq!(expiry_millis(Some(Duration::MAX)), None);
    assert_eq!(
      expiry_millis(Some(Duration::from_millis(MAX_EXPIRE_MILLIS))),
      Some(MAX_EXPIRE_MILLIS)
    );
    assert_eq!(
      expiry_millis(Some(Duration::from_millis(MAX_EXPIRE_MILLIS + 1))),
      None
    );
  }
}
