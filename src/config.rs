//! Flow builder configuration.
//!
//! [`FlowConfig`] carries the settings shared by every flow a builder
//! assembles: the prefix of generated flow ids, the poller used by polling
//! sources that configure none, whether each stage is wrapped in a
//! [`TracingAdvice`](crate::advice::TracingAdvice), and logging options.
//!
//! Configs deserialize from JSON with every field optional:
//!
//! ```rust
//! use weaveflow::config::FlowConfig;
//!
//! let config = FlowConfig::from_json_str(r#"{"id_prefix": "orders", "log_stages": true}"#).unwrap();
//! assert_eq!(config.id_prefix, "orders");
//! assert_eq!(config.default_poller.max_messages_per_poll, 1);
//! ```

use crate::endpoint::PollerSpec;
use crate::error::FlowResult;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Settings applied to flows built with this config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
  /// Prefix of generated flow ids (`<prefix>#<n>`).
  pub id_prefix: String,
  /// Poller for polling sources without their own.
  pub default_poller: PollerSpec,
  /// Wraps every stage in a tracing advice.
  pub log_stages: bool,
  /// Logging options, see [`init_logging`](crate::logging::init_logging).
  pub logging: LoggingConfig,
}

impl FlowConfig {
  /// Parses a JSON config document.
  pub fn from_json_str(json: &str) -> FlowResult<Self> {
    Ok(serde_json::from_str(json)?)
  }

  /// Sets the flow id prefix.
  #[must_use]
  pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.id_prefix = prefix.into();
    self
  }

  /// Sets the default poller.
  #[must_use]
  pub fn with_default_poller(mut self, poller: PollerSpec) -> Self {
    self.default_poller = poller;
    self
  }

  /// Enables or disables per-stage tracing.
  #[must_use]
  pub fn with_log_stages(mut self, enabled: bool) -> Self {
    self.log_stages = enabled;
    self
  }

  /// Sets logging options.
  #[must_use]
  pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
    self.logging = logging;
    self
  }
}

impl Default for FlowConfig {
  fn default() -> Self {
    Self {
      id_prefix: "flow".to_string(),
      default_poller: PollerSpec::default(),
      log_stages: false,
      logging: LoggingConfig::default(),
    }
  }
}
