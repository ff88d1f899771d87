//! Cache tuning knobs.

use serde::Deserialize;
use std::time::Duration;

const DEFAULT_KEEP_UNUSED_FOR_SECS: u64 = 60;

/// Cache configuration, read from the `cache` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Seconds an entry without subscribers is kept before removal.
  pub keep_unused_for_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      keep_unused_for_secs: DEFAULT_KEEP_UNUSED_FOR_SECS,
    }
  }
}

impl CacheConfig {
  /// Grace period before an unused entry is dropped.
  pub fn keep_unused_for(&self) -> Duration {
    Duration::from_secs(self.keep_unused_for_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_apply_to_missing_fields() {
    let config: CacheConfig = serde_yaml::from_str("{}").unwrap();
    assert_eq!(config, CacheConfig::default());
    assert_eq!(config.keep_unused_for(), Duration::from_secs(60));

    let config: CacheConfig = serde_yaml::from_str("keep_unused_for_secs: 5").unwrap();
    assert_eq!(config.keep_unused_for(), Duration::from_secs(5));
  }
}
