use pantry::store::{MemoryStore, StoreBackend};
use pantry::{Backpressure, Pantry, PantryConfig, PantryError, PutOptions};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn write_config(content: &str) -> tempfile::NamedTempFile {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  file.write_all(content.as_bytes()).unwrap();
  file
}

// =============================================================================
// Config File Tests
// =============================================================================

#[test]
fn test_config_default() {
  let config = PantryConfig::default();
  assert_eq!(config.defaults.best_by_secs, 3600);
  assert_eq!(config.defaults.use_by_secs, 86400);
  assert_eq!(config.events.capacity, 10_000);
  assert_eq!(config.events.shards, 16);
  assert_eq!(config.store.backend, StoreBackend::Memory);
  assert_eq!(config.store.sweep_interval(), Duration::from_secs(1));
  assert_eq!(config.metadata_suffix, ".config");
}

#[test]
fn test_config_from_file() {
  let file = write_config(
    r#"
defaults:
  best_by_secs: 60
  use_by_secs: 600
events:
  capacity: 128
  backpressure: drop
  shards: 4
restock:
  timeout_ms: 1500
store:
  backend: redis
  sweep_interval_secs: 5
  redis:
    host: cache.internal
    database: 3
metadata_suffix: ":meta"
logging:
  level: debug
"#,
  );

  let config = PantryConfig::from_file(file.path()).unwrap();
  assert_eq!(config.defaults.best_by_secs, 60);
  assert_eq!(config.events.capacity, 128);
  assert_eq!(config.events.backpressure, Backpressure::Drop);
  assert_eq!(config.events.shards, 4);
  assert_eq!(config.restock.timeout(), Some(Duration::from_millis(1500)));
  assert_eq!(config.store.backend, StoreBackend::Redis);
  assert_eq!(config.store.redis.host, "cache.internal");
  assert_eq!(config.store.redis.port, 6379);
  assert_eq!(config.store.redis.database, 3);
  assert_eq!(config.metadata_suffix, ":meta");
  assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_config_env_expansion() {
  std::env::set_var("PANTRY_IT_REDIS_HOST", "redis.example");
  let file = write_config("store:\n  redis:\n    host: ${PANTRY_IT_REDIS_HOST}\n");

  let config = PantryConfig::from_file(file.path()).unwrap();
  assert_eq!(config.store.redis.host, "redis.example");
}

#[test]
fn test_config_missing_file() {
  assert!(PantryConfig::from_file("/nonexistent/pantry.yaml").is_err());
}

#[test]
fn test_config_invalid_yaml() {
  let file = write_config("events: [not, a, map]\n");
  assert!(PantryConfig::from_file(file.path()).is_err());
}

// =============================================================================
// Pantry From Config Tests
// =============================================================================

#[tokio::test]
async fn test_pantry_from_config() {
  let config = PantryConfig::from_yaml(
    "defaults: { best_by_secs: 5, use_by_secs: 50 }\nmetadata_suffix: \"#meta\"\n",
  )
  .unwrap();
  let store = Arc::new(MemoryStore::new());
  let pantry = Pantry::from_config(store.clone(), &config).unwrap();

  assert_eq!(pantry.defaults().best_by(), Duration::from_secs(5));
  assert_eq!(pantry.defaults().use_by(), Duration::from_secs(50));

  pantry.put("food", "Pizza", PutOptions::new()).await.unwrap();
  assert!(store.contains_key("food#meta"));
  assert!(!store.contains_key("food.config"));
}

#[tokio::test]
async fn test_pantry_from_config_rejects_bad_defaults() {
  let config = PantryConfig::from_yaml("defaults: { best_by_secs: 50, use_by_secs: 5 }").unwrap();
  let result = Pantry::from_config(Arc::new(MemoryStore::new()), &config);
  assert!(matches!(result, Err(PantryError::InvalidDurations { .. })));
}
