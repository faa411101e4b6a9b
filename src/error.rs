//! # Error Handling System
//!
//! Errors raised while composing flows and while dispatching messages through
//! them, plus the per-stage error strategies that decide what happens when a
//! stage fails.
//!
//! ## Overview
//!
//! - **FlowError**: every failure the crate surfaces, composition and dispatch alike
//! - **StageInfo**: stage id and kind, attached to dispatch errors for debugging
//! - **ErrorAction**: Stop, Skip, or Retry when a stage fails
//! - **ErrorStrategy**: Configurable per-stage policy (Stop, Skip, Retry, Custom),
//!   installed on a stage as advice
//!
//! Composition is one-shot and deterministic: nothing here is retried unless
//! the caller installs an [`ErrorStrategy`] on a stage.
//!
//! ## Example
//!
//! ```rust
//! use weaveflow::error::{ErrorAction, ErrorStrategy};
//!
//! // Retry a flaky stage up to 3 times
//! let strategy = ErrorStrategy::Retry(3);
//!
//! // Skip anything that fails twice
//! let strategy = ErrorStrategy::new_custom(|_error, retries| {
//!     if retries < 1 { ErrorAction::Retry } else { ErrorAction::Skip }
//! });
//! ```

use crate::endpoint::StageKind;
use crate::message::MessageId;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error type used for wrapped causes.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Result alias used throughout the crate.
pub type FlowResult<T> = Result<T, FlowError>;

/// Identifies a stage in error reports and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
  /// The endpoint id of the stage.
  pub id: String,
  /// What kind of stage it is.
  pub kind: StageKind,
}

impl StageInfo {
  /// Creates a new `StageInfo`.
  pub fn new(id: impl Into<String>, kind: StageKind) -> Self {
    Self {
      id: id.into(),
      kind,
    }
  }
}

impl fmt::Display for StageInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} stage '{}'", self.kind, self.id)
  }
}

/// Errors raised by flow composition and dispatch.
#[derive(Debug, Error)]
pub enum FlowError {
  /// A declared type is missing or unusable.
  #[error("cannot resolve the declared type of a {stage} stage: {reason}")]
  TypeResolution {
    /// The stage being appended.
    stage: StageKind,
    /// Why the type could not be resolved.
    reason: String,
  },

  /// A component name is already registered in the flow.
  #[error("a component named '{0}' is already registered in this flow")]
  DuplicateComponentName(String),

  /// A stage or channel has no resolvable predecessor, or the flow cannot be finalized.
  #[error("invalid flow cursor: {0}")]
  InvalidCursor(String),

  /// The composition callback failed.
  #[error("flow composition failed: {0}")]
  CompositionFailure(#[source] BoxError),

  /// A payload could not be converted to the requested type.
  #[error("cannot convert {found} payload to {target}: {source}")]
  Conversion {
    /// Target type name.
    target: &'static str,
    /// Actual payload type name.
    found: &'static str,
    /// The underlying decoding error.
    #[source]
    source: BoxError,
  },

  /// A payload does not match the declared input type of a stage.
  #[error("{stage} expects a {expected} payload but received {found}")]
  PayloadType {
    /// The stage that received the message.
    stage: StageInfo,
    /// Declared input type name.
    expected: &'static str,
    /// Actual payload type name.
    found: &'static str,
  },

  /// A filter rejected a message and is configured to raise on rejection.
  #[error("message {message_id} rejected by {stage}")]
  MessageRejected {
    /// The filter stage.
    stage: StageInfo,
    /// Id of the rejected message.
    message_id: MessageId,
  },

  /// No channel could be resolved for a destination.
  #[error("no channel could be resolved for '{0}'")]
  DestinationResolution(String),

  /// A user-supplied stage function failed.
  #[error("error in {stage}: {source}")]
  Handler {
    /// The failing stage.
    stage: StageInfo,
    /// The error returned by the stage function.
    #[source]
    source: BoxError,
  },

  /// A channel can no longer accept messages.
  #[error("channel '{0}' is closed")]
  ChannelClosed(String),

  /// A configuration document could not be parsed.
  #[error("invalid configuration: {0}")]
  Config(#[from] serde_json::Error),

  /// A source or runner could not be started or stopped.
  #[error("lifecycle error: {0}")]
  Lifecycle(String),
}

impl FlowError {
  /// Wraps a foreign error raised inside a composition callback.
  pub fn composition<E>(error: E) -> Self
  where
    E: Into<BoxError>,
  {
    FlowError::CompositionFailure(error.into())
  }

  /// Wraps an error returned by a user stage function.
  pub fn handler<E>(stage: &StageInfo, error: E) -> Self
  where
    E: Into<BoxError>,
  {
    FlowError::Handler {
      stage: stage.clone(),
      source: error.into(),
    }
  }
}

/// A simple error type that wraps a string message.
#[derive(Debug)]
pub struct StringError(pub String);

impl fmt::Display for StringError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl Error for StringError {}

/// Action to take when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
  /// Propagate the error to the caller.
  Stop,
  /// Drop the message and continue.
  Skip,
  /// Invoke the stage again with the same message.
  Retry,
}

type CustomErrorHandler = Arc<dyn Fn(&FlowError, usize) -> ErrorAction + Send + Sync>;

/// Per-stage error handling policy.
///
/// Installed on a stage through its advice chain; see
/// [`EndpointSpec::error_strategy`](crate::endpoint::EndpointSpec::error_strategy).
pub enum ErrorStrategy {
  /// Propagate the first error. The default.
  Stop,
  /// Drop messages whose stage invocation fails.
  Skip,
  /// Retry up to the given number of times, then propagate.
  Retry(usize),
  /// Decide per failure; the handler receives the error and the number of
  /// retries already made for this message.
  Custom(CustomErrorHandler),
}

impl ErrorStrategy {
  /// Creates a custom strategy from a handler function.
  pub fn new_custom<F>(f: F) -> Self
  where
    F: Fn(&FlowError, usize) -> ErrorAction + Send + Sync + 'static,
  {
    Self::Custom(Arc::new(f))
  }

  /// The action to take for `error` after `retries` retries.
  #[must_use]
  pub fn decide(&self, error: &FlowError, retries: usize) -> ErrorAction {
    match self {
      ErrorStrategy::Stop => ErrorAction::Stop,
      ErrorStrategy::Skip => ErrorAction::Skip,
      ErrorStrategy::Retry(max) if retries < *max => ErrorAction::Retry,
      ErrorStrategy::Retry(_) => ErrorAction::Stop,
      ErrorStrategy::Custom(handler) => handler(error, retries),
    }
  }
}

impl Default for ErrorStrategy {
  fn default() -> Self {
    ErrorStrategy::Stop
  }
}

impl Clone for ErrorStrategy {
  fn clone(&self) -> Self {
    match self {
      ErrorStrategy::Stop => ErrorStrategy::Stop,
      ErrorStrategy::Skip => ErrorStrategy::Skip,
      ErrorStrategy::Retry(n) => ErrorStrategy::Retry(*n),
      ErrorStrategy::Custom(handler) => ErrorStrategy::Custom(handler.clone()),
    }
  }
}

impl fmt::Debug for ErrorStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorStrategy::Stop => write!(f, "ErrorStrategy::Stop"),
      ErrorStrategy::Skip => write!(f, "ErrorStrategy::Skip"),
      ErrorStrategy::Retry(n) => write!(f, "ErrorStrategy::Retry({})", n),
      ErrorStrategy::Custom(_) => write!(f, "ErrorStrategy::Custom"),
    }
  }
}

impl PartialEq for ErrorStrategy {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (ErrorStrategy::Stop, ErrorStrategy::Stop) => true,
      (ErrorStrategy::Skip, ErrorStrategy::Skip) => true,
      (ErrorStrategy::Retry(n1), ErrorStrategy::Retry(n2)) => n1 == n2,
      (ErrorStrategy::Custom(_), ErrorStrategy::Custom(_)) => true,
      _ => false,
    }
  }
}
