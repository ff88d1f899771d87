use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tagq::CacheConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the API server, e.g. https://metabase.example.com
  pub url: String,
  /// Header carrying the API key
  #[serde(default = "default_api_key_header")]
  pub api_key_header: String,
}

fn default_api_key_header() -> String {
  "x-api-key".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Default filter directive; RUST_LOG takes precedence
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Write logs to a daily-rotated file at this path instead of stderr
  pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tagq.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tagq/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/tagq/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("tagq.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tagq").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the API key from the environment, if set.
  ///
  /// Checks TAGQ_API_KEY.
  pub fn get_api_key() -> Option<String> {
    std::env::var("TAGQ_API_KEY").ok().filter(|k| !k.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("api:\n  url: https://metabase.example.com\n").unwrap();
    assert_eq!(config.api.url, "https://metabase.example.com");
    assert_eq!(config.api.api_key_header, "x-api-key");
    assert_eq!(config.cache.keep_unused_for(), Duration::from_secs(60));
    assert_eq!(config.log.level, "info");
    assert!(config.log.file.is_none());
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  url: http://localhost:3000
  api_key_header: x-metabase-session
cache:
  keep_unused_for_secs: 5
log:
  level: tagq=debug
  file: /tmp/tagq.log
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.api.api_key_header, "x-metabase-session");
    assert_eq!(config.cache.keep_unused_for_secs, 5);
    assert_eq!(config.log.level, "tagq=debug");
    assert_eq!(config.log.file, Some(PathBuf::from("/tmp/tagq.log")));
  }

  #[test]
  fn test_missing_api_section_is_an_error() {
    assert!(Config::from_yaml("cache: {}\n").is_err());
  }

  #[test]
  fn test_explicit_missing_path_is_an_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
