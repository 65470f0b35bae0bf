//! Per-key storage metadata and default durations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PantryError, Result};

pub const DEFAULT_BEST_BY: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_USE_BY: Duration = Duration::from_secs(24 * 60 * 60);

fn check_durations(best_by: Duration, use_by: Duration) -> Result<()> {
  if best_by > use_by {
    return Err(PantryError::InvalidDurations { best_by, use_by });
  }
  Ok(())
}

/// Fallback durations for puts that do not specify their own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Defaults {
  best_by: Duration,
  use_by: Duration,
}

impl Defaults {
  pub fn new(best_by: Duration, use_by: Duration) -> Result<Self> {
    check_durations(best_by, use_by)?;
    Ok(Self { best_by, use_by })
  }

  pub fn best_by(&self) -> Duration {
    self.best_by
  }

  pub fn use_by(&self) -> Duration {
    self.use_by
  }
}

impl Default for Defaults {
  fn default() -> Self {
    Self {
      best_by: DEFAULT_BEST_BY,
      use_by: DEFAULT_USE_BY,
    }
  }
}

/// Freshness tier of a value at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
  Fresh,
  Cold,
  Expired,
  NotFound,
}

/// Metadata kept in the store next to each value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDetails {
  /// When the value was last stocked; `None` if only registered
  #[serde(default)]
  pub timestamp: Option<DateTime<Utc>>,
  pub best_by: Duration,
  pub use_by: Duration,
  /// An asynchronous restock is in flight
  #[serde(default)]
  pub restocking: bool,
  /// Durations came from an explicit registration
  #[serde(default)]
  pub registered: bool,
}

impl StorageDetails {
  /// Details for a value stocked at `timestamp`
  pub fn stocked(best_by: Duration, use_by: Duration, timestamp: DateTime<Utc>) -> Result<Self> {
    check_durations(best_by, use_by)?;
    Ok(Self {
      timestamp: Some(timestamp),
      best_by,
      use_by,
      restocking: false,
      registered: false,
    })
  }

  /// Details for a registered key that has not been stocked yet
  pub fn registered(best_by: Duration, use_by: Duration) -> Result<Self> {
    check_durations(best_by, use_by)?;
    Ok(Self {
      timestamp: None,
      best_by,
      use_by,
      restocking: false,
      registered: true,
    })
  }

  /// Classify the value as of `now`. Boundaries belong to the later tier.
  pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
    let Some(stocked_at) = self.timestamp else {
      return Freshness::NotFound;
    };

    if now < add_duration(stocked_at, self.best_by) {
      Freshness::Fresh
    } else if now < add_duration(stocked_at, self.use_by) {
      Freshness::Cold
    } else {
      Freshness::Expired
    }
  }
}

/// Saturates instead of overflowing for absurdly long durations
fn add_duration(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(duration)
    .ok()
    .and_then(|d| instant.checked_add_signed(d))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
  }

  #[test]
  fn test_defaults() {
    let defaults = Defaults::default();
    assert_eq!(defaults.best_by(), secs(3600));
    assert_eq!(defaults.use_by(), secs(86400));
  }

  #[test]
  fn test_defaults_override() {
    let defaults = Defaults::new(secs(60), secs(120)).unwrap();
    assert_eq!(defaults.best_by(), secs(60));
    assert_eq!(defaults.use_by(), secs(120));
  }

  #[test]
  fn test_invalid_defaults_rejected() {
    let err = Defaults::new(secs(2), secs(1)).unwrap_err();
    assert!(matches!(err, PantryError::InvalidDurations { .. }));
  }

  #[test]
  fn test_equal_durations_allowed() {
    assert!(Defaults::new(secs(5), secs(5)).is_ok());
    assert!(StorageDetails::stocked(secs(5), secs(5), Utc::now()).is_ok());
  }

  #[test]
  fn test_freshness_tiers() {
    let stocked_at = Utc::now();
    let details = StorageDetails::stocked(secs(1), secs(2), stocked_at).unwrap();

    assert_eq!(details.freshness(stocked_at), Freshness::Fresh);
    assert_eq!(
      details.freshness(stocked_at + chrono::Duration::milliseconds(999)),
      Freshness::Fresh
    );
    // Half-open: the best by instant itself is already cold
    assert_eq!(
      details.freshness(stocked_at + chrono::Duration::seconds(1)),
      Freshness::Cold
    );
    assert_eq!(
      details.freshness(stocked_at + chrono::Duration::seconds(2)),
      Freshness::Expired
    );
  }

  #[test]
  fn test_registered_is_not_found() {
    let details = StorageDetails::registered(secs(1), secs(2)).unwrap();
    assert!(details.registered);
    assert_eq!(details.freshness(Utc::now()), Freshness::NotFound);
  }

  #[test]
  fn test_huge_duration_does_not_overflow() {
    let details = StorageDetails::stocked(Duration::MAX, Duration::MAX, Utc::now()).unwrap();
    assert_eq!(details.freshness(Utc::now()), Freshness::Fresh);
  }

  #[test]
  fn test_details_json_roundtrip() {
    let details = StorageDetails::stocked(secs(1), secs(2), Utc::now()).unwrap();
    let json = serde_json::to_string(&details).unwrap();
    let parsed: StorageDetails = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, details);
  }
}
