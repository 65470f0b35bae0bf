use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::events::EventBusConfig;
use crate::pantry::{Defaults, DEFAULT_METADATA_SUFFIX};
use crate::store::{RedisConfig, StoreBackend};

/// Replace `${VAR}` and `$VAR` with environment values. Unset variables expand to "".
fn expand_env_vars(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  let mut rest = input;

  while let Some(pos) = rest.find('$') {
    out.push_str(&rest[..pos]);
    let after = &rest[pos + 1..];

    if let Some(braced) = after.strip_prefix('{') {
      match braced.find('}') {
        Some(end) => {
          out.push_str(&std::env::var(&braced[..end]).unwrap_or_default());
          rest = &braced[end + 1..];
        }
        None => {
          // Unterminated, keep the remainder verbatim
          out.push_str(&rest[pos..]);
          return out;
        }
      }
      continue;
    }

    let name_len = after
      .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
      .unwrap_or(after.len());
    if name_len == 0 {
      out.push('$');
    } else {
      out.push_str(&std::env::var(&after[..name_len]).unwrap_or_default());
    }
    rest = &after[name_len..];
  }

  out.push_str(rest);
  out
}

/// Top-level configuration, usually read from `pantry.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PantryConfig {
  #[serde(default)]
  pub defaults: DefaultsSection,
  #[serde(default)]
  pub events: EventBusConfig,
  #[serde(default)]
  pub restock: RestockSection,
  #[serde(default)]
  pub store: StoreSection,
  #[serde(default = "default_metadata_suffix")]
  pub metadata_suffix: String,
  #[serde(default)]
  pub logging: LoggingSection,
}

fn default_metadata_suffix() -> String {
  DEFAULT_METADATA_SUFFIX.to_string()
}

impl Default for PantryConfig {
  fn default() -> Self {
    Self {
      defaults: DefaultsSection::default(),
      events: EventBusConfig::default(),
      restock: RestockSection::default(),
      store: StoreSection::default(),
      metadata_suffix: default_metadata_suffix(),
      logging: LoggingSection::default(),
    }
  }
}

/// Fallback durations, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsSection {
  #[serde(default = "default_best_by_secs")]
  pub best_by_secs: u64,
  #[serde(default = "default_use_by_secs")]
  pub use_by_secs: u64,
}

fn default_best_by_secs() -> u64 {
  crate::pantry::DEFAULT_BEST_BY.as_secs()
}

fn default_use_by_secs() -> u64 {
  crate::pantry::DEFAULT_USE_BY.as_secs()
}

impl Default for DefaultsSection {
  fn default() -> Self {
    Self {
      best_by_secs: default_best_by_secs(),
      use_by_secs: default_use_by_secs(),
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestockSection {
  /// Upper bound for one restock call; 0 means unbounded
  #[serde(default)]
  pub timeout_ms: u64,
}

impl RestockSection {
  pub fn timeout(&self) -> Option<Duration> {
    (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
  #[serde(default)]
  pub backend: StoreBackend,
  /// How often the memory store sweeps expired entries
  #[serde(default = "default_sweep_interval_secs")]
  pub sweep_interval_secs: u64,
  #[serde(default)]
  pub redis: RedisConfig,
}

fn default_sweep_interval_secs() -> u64 {
  1
}

impl Default for StoreSection {
  fn default() -> Self {
    Self {
      backend: StoreBackend::default(),
      sweep_interval_secs: default_sweep_interval_secs(),
      redis: RedisConfig::default(),
    }
  }
}

impl StoreSection {
  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_log_level")]
  pub level: String,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_log_level(),
    }
  }
}

impl PantryConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml(&content)
  }

  /// Parse YAML after environment expansion
  pub fn from_yaml(content: &str) -> Result<Self, anyhow::Error> {
    let expanded = expand_env_vars(content);
    Ok(serde_yaml::from_str(&expanded)?)
  }

  /// Load `pantry.yaml` or `pantry.yml` from the working directory, if present
  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    for p in ["pantry.yaml", "pantry.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  /// Validated engine defaults
  pub fn defaults(&self) -> Result<Defaults> {
    Defaults::new(
      Duration::from_secs(self.defaults.best_by_secs),
      Duration::from_secs(self.defaults.use_by_secs),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::events::Backpressure;

  #[test]
  fn test_expand_braced_and_bare() {
    std::env::set_var("PANTRY_TEST_HOST", "cache.local");
    assert_eq!(expand_env_vars("host: ${PANTRY_TEST_HOST}"), "host: cache.local");
    assert_eq!(expand_env_vars("host: $PANTRY_TEST_HOST!"), "host: cache.local!");
  }

  #[test]
  fn test_expand_unset_and_literal_dollar() {
    assert_eq!(expand_env_vars("a${PANTRY_TEST_UNSET_VAR}b"), "ab");
    assert_eq!(expand_env_vars("cost: 5$"), "cost: 5$");
    assert_eq!(expand_env_vars("x: ${unterminated"), "x: ${unterminated");
  }

  #[test]
  fn test_empty_yaml_uses_defaults() {
    let config = PantryConfig::from_yaml("{}").unwrap();
    assert_eq!(config.defaults.best_by_secs, 3600);
    assert_eq!(config.defaults.use_by_secs, 86400);
    assert_eq!(config.events.capacity, 10_000);
    assert_eq!(config.events.backpressure, Backpressure::Block);
    assert_eq!(config.metadata_suffix, ".config");
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.restock.timeout(), None);
    assert_eq!(config.logging.level, "info");
  }

  #[test]
  fn test_partial_sections() {
    let yaml = r#"
defaults:
  best_by_secs: 10
events:
  backpressure: drop
restock:
  timeout_ms: 250
store:
  backend: redis
  redis:
    port: 6380
"#;
    let config = PantryConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.defaults.best_by_secs, 10);
    assert_eq!(config.defaults.use_by_secs, 86400);
    assert_eq!(config.events.backpressure, Backpressure::Drop);
    assert_eq!(config.events.shards, 16);
    assert_eq!(config.restock.timeout(), Some(Duration::from_millis(250)));
    assert_eq!(config.store.backend, StoreBackend::Redis);
    assert_eq!(config.store.redis.port, 6380);
    assert_eq!(config.store.redis.host, "localhost");
  }

  #[test]
  fn test_invalid_defaults() {
    let config = PantryConfig::from_yaml("defaults: { best_by_secs: 20, use_by_secs: 10 }").unwrap();
    assert!(config.defaults().is_err());
  }
}
