//! Settings for the `skein` binary.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use skein_core::{engine::EngineConfig, model::UserId};
use skein_twitter::TwitterConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  pub store_path:           PathBuf,
  #[serde(default = "default_api_base")]
  pub api_base:             String,
  pub bearer_token:         String,
  /// The reader's own user ID.
  pub me:                   String,
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs:   u64,
  #[serde(default = "default_max_ids")]
  pub max_ids_per_request:  usize,
  #[serde(default = "default_max_requests")]
  pub max_requests_per_run: usize,
  #[serde(default = "default_max_pages")]
  pub max_pages:            usize,
}

fn default_api_base() -> String { "https://api.twitter.com/2".to_owned() }

fn default_poll_interval() -> u64 { 300 }

fn default_max_ids() -> usize { 100 }

fn default_max_requests() -> usize { 500 }

fn default_max_pages() -> usize { 10 }

impl SyncConfig {
  /// `path` (if it exists) layered under `SKEIN_*` environment variables.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("SKEIN"))
      .build()
      .context("failed to read config file")?;
    settings.try_deserialize().context("failed to deserialise SyncConfig")
  }

  pub fn engine(&self) -> EngineConfig {
    EngineConfig {
      max_ids_per_request:  self.max_ids_per_request,
      max_requests_per_run: self.max_requests_per_run,
    }
  }

  pub fn twitter(&self) -> TwitterConfig {
    TwitterConfig {
      api_base:     self.api_base.clone(),
      bearer_token: self.bearer_token.clone(),
      me:           UserId::from(self.me.as_str()),
      max_pages:    self.max_pages,
    }
  }

  /// `store_path` with a leading `~` expanded.
  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(toml: &str) -> SyncConfig {
    config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn optional_settings_take_defaults() {
    let cfg = parse(
      r#"
      store_path   = "/var/lib/skein.db"
      bearer_token = "t"
      me           = "12"
      "#,
    );
    assert_eq!(cfg.api_base, "https://api.twitter.com/2");
    assert_eq!(cfg.poll_interval_secs, 300);
    assert_eq!(cfg.engine(), EngineConfig::default());
    assert_eq!(cfg.twitter().me, UserId::from("12"));
  }

  #[test]
  fn missing_token_is_an_error() {
    let result = config::Config::builder()
      .add_source(config::File::from_str(r#"store_path = "x.db""#, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize::<SyncConfig>();
    assert!(result.is_err());
  }

  #[test]
  fn tilde_expands_against_home() {
    let Ok(home) = std::env::var("HOME") else {
      return;
    };
    assert_eq!(expand_tilde(Path::new("~/skein.db")), PathBuf::from(home).join("skein.db"));
    assert_eq!(expand_tilde(Path::new("/abs/skein.db")), PathBuf::from("/abs/skein.db"));
  }
}
