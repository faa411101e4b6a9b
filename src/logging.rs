//! Logging setup for applications running flows.
//!
//! The crate itself only emits `tracing` events. [`init_logging`] installs a
//! `tracing-subscriber` fmt subscriber for binaries and tests that want to see
//! them; `RUST_LOG`, when set, overrides the configured directive.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Subscriber options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// An `EnvFilter` directive such as `info` or `weaveflow=debug`.
  pub level: String,
  /// Emit JSON lines instead of human-readable output.
  pub json: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      json: false,
    }
  }
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
  EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.level))
    .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber.
///
/// Returns `false` when a global subscriber was already installed; the
/// existing one is kept.
pub fn init_logging(config: &LoggingConfig) -> bool {
  let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config));
  if config.json {
    builder.json().try_init().is_ok()
  } else {
    builder.try_init().is_ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_second_init_keeps_first_subscriber() {
    let config = LoggingConfig::default();
    let _ = init_logging(&config);
    assert!(!init_logging(&config));
  }

  #[test]
  fn test_invalid_directive_does_not_panic() {
    let config = LoggingConfig {
      level: "=[bad".to_string(),
      json: false,
    };
    let _ = env_filter(&config);
  }
}
