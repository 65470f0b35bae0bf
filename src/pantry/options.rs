//! Per-call options for puts and gets

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Future returned by a restock function
pub type RestockFuture = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>;

/// Caller-supplied function producing a fresh value
pub type RestockFn = Arc<dyn Fn() -> RestockFuture + Send + Sync>;

/// Options for [`crate::Pantry::put`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
  durations: Option<(Duration, Duration)>,
}

impl PutOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Use these durations instead of the registered or default ones
  pub fn with_durations(mut self, best_by: Duration, use_by: Duration) -> Self {
    self.durations = Some((best_by, use_by));
    self
  }

  pub fn durations(&self) -> Option<(Duration, Duration)> {
    self.durations
  }
}

/// Options for [`crate::Pantry::get`]
#[derive(Clone, Default)]
pub struct GetOptions {
  restock: Option<RestockFn>,
}

impl GetOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Shorthand for `GetOptions::new().with_restock(f)`
  pub fn restock_with<F, Fut>(f: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
  {
    Self::new().with_restock(f)
  }

  /// Refresh stale or missing values with `f`
  pub fn with_restock<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
  {
    self.restock = Some(Arc::new(move || -> RestockFuture { Box::pin(f()) }));
    self
  }

  pub fn restock(&self) -> Option<&RestockFn> {
    self.restock.as_ref()
  }
}

impl std::fmt::Debug for GetOptions {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GetOptions")
      .field("restock", &self.restock.is_some())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_put_options_default() {
    assert_eq!(PutOptions::new().durations(), None);
  }

  #[test]
  fn test_put_options_with_durations() {
    let options = PutOptions::new().with_durations(Duration::from_secs(1), Duration::from_secs(2));
    assert_eq!(
      options.durations(),
      Some((Duration::from_secs(1), Duration::from_secs(2)))
    );
  }

  #[test]
  fn test_get_options_default_has_no_restock() {
    assert!(GetOptions::new().restock().is_none());
  }

  #[tokio::test]
  async fn test_get_options_with_restock() {
    let options = GetOptions::restock_with(|| async { Ok("Hi".to_string()) });
    let restock = options.restock().unwrap();
    assert_eq!(restock().await.unwrap(), "Hi");
    assert_eq!(format!("{:?}", options), "GetOptions { restock: true }");
  }
}
