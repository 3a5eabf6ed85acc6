//! Runtime settings: built-in defaults, then an optional TOML file, then
//! `QUICKPOLL_*` environment variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use quickpoll_live::GatewayConfig;
use quickpoll_store_sqlite::RelayOptions;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  /// SQLite database shared by every `quickpoll` process on this machine.
  pub store_path:           PathBuf,
  /// JSON file holding the persisted session identifier.
  pub session_file:         PathBuf,
  pub request_timeout_ms:   u64,
  /// How often the change relay looks for writes from other processes.
  pub relay_interval_ms:    u64,
  pub change_log_retention: u64,
  pub atomic_create:        bool,
}

impl Settings {
  pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
    let mut builder = config::Config::builder()
      .set_default("store_path", "~/.local/share/quickpoll/polls.db")?
      .set_default("session_file", "~/.local/share/quickpoll/session.json")?
      .set_default("request_timeout_ms", 10_000_i64)?
      .set_default("relay_interval_ms", 250_i64)?
      .set_default("change_log_retention", 10_000_i64)?
      .set_default("atomic_create", true)?;

    if let Some(path) = file {
      builder = builder.add_source(config::File::from(path).required(true));
    }

    builder
      .add_source(config::Environment::with_prefix("QUICKPOLL").try_parsing(true))
      .build()?
      .try_deserialize()
  }

  pub fn gateway(&self) -> GatewayConfig {
    GatewayConfig {
      request_timeout: Duration::from_millis(self.request_timeout_ms),
      atomic_create:   self.atomic_create,
    }
  }

  pub fn relay(&self) -> RelayOptions {
    RelayOptions {
      interval: Duration::from_millis(self.relay_interval_ms),
      retention: self.change_log_retention,
      ..RelayOptions::default()
    }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
