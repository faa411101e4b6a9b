//! # Endpoint Specs
//!
//! An endpoint is one processing stage of a flow. While a stage is being
//! appended the caller configures it through an [`EndpointSpec`] (or one of
//! the stage-specific specs that deref to it); once appended it becomes an
//! immutable [`Endpoint`] holding its handler and advice chain.
//!
//! ## Configuration surface
//!
//! Every stage accepts:
//!
//! - `id`: the endpoint id, also registered as the component name
//! - `advice`: around-advice applied to the handler, outermost first
//! - `poller`: polling options for stages fed by pollable channels
//! - `output_channel`: an explicit output channel, ending implicit wiring
//!
//! Filters, splitters and routers add their own options on
//! [`FilterEndpointSpec`], [`SplitterEndpointSpec`] and [`RouterSpec`].

use crate::advice::{Advice, invoke_chain};
use crate::channel::ChannelRef;
use crate::error::{ErrorStrategy, FlowResult, StageInfo};
use crate::handler::{HandlerOutcome, MessageHandler};
use crate::message::Message;
use crate::types::TypeDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

/// The kind of processing a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
  /// 1-in/1-out payload transformation.
  Transform,
  /// Payload conversion into a declared type.
  Convert,
  /// 1-in/boolean predicate.
  Filter,
  /// 1-in/many-out.
  Split,
  /// 1-in/key-out channel selection.
  Route,
  /// Pass-through between two channels.
  Bridge,
  /// One-way terminal consumer.
  Handle,
  /// Pass-through that logs each message.
  Log,
}

impl fmt::Display for StageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      StageKind::Transform => "transform",
      StageKind::Convert => "convert",
      StageKind::Filter => "filter",
      StageKind::Split => "split",
      StageKind::Route => "route",
      StageKind::Bridge => "bridge",
      StageKind::Handle => "handle",
      StageKind::Log => "log",
    };
    f.write_str(name)
  }
}

/// Polling options: how often and how much to poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSpec {
  /// Delay between the end of one poll and the start of the next.
  #[serde(rename = "fixed_delay_ms", with = "duration_ms")]
  pub fixed_delay: Duration,
  /// Upper bound of messages taken per poll.
  pub max_messages_per_poll: usize,
}

impl PollerSpec {
  /// A poller with the given fixed delay, taking one message per poll.
  #[must_use]
  pub fn fixed_delay(delay: Duration) -> Self {
    Self {
      fixed_delay: delay,
      ..Self::default()
    }
  }

  /// Sets the number of messages taken per poll (at least one).
  #[must_use]
  pub fn max_messages_per_poll(mut self, max: usize) -> Self {
    self.max_messages_per_poll = max.max(1);
    self
  }
}

impl Default for PollerSpec {
  fn default() -> Self {
    Self {
      fixed_delay: Duration::from_secs(1),
      max_messages_per_poll: 1,
    }
  }
}

mod duration_ms {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
  }
}

/// Endpoint options shared by every stage.
///
/// Configurer closures receive `&mut` access and chain setters:
///
/// ```rust
/// use weaveflow::endpoint::EndpointSpec;
/// use weaveflow::error::ErrorStrategy;
///
/// let mut spec = EndpointSpec::default();
/// spec.id("doubler").error_strategy(ErrorStrategy::Retry(2));
/// ```
#[derive(Clone, Default)]
pub struct EndpointSpec {
  pub(crate) id: Option<String>,
  pub(crate) advice_chain: Vec<Arc<dyn Advice>>,
  pub(crate) poller: Option<PollerSpec>,
  pub(crate) output_channel: Option<ChannelRef>,
}

/// Spec used by transform, convert, bridge, handle and log stages.
pub type GenericEndpointSpec = EndpointSpec;

impl EndpointSpec {
  /// Sets the endpoint id.
  pub fn id(&mut self, id: impl Into<String>) -> &mut Self {
    self.id = Some(id.into());
    self
  }

  /// Appends an advice to the chain.
  pub fn advice(&mut self, advice: impl Advice + 'static) -> &mut Self {
    self.advice_chain.push(Arc::new(advice));
    self
  }

  /// Appends an [`ErrorStrategy`] advice to the chain.
  pub fn error_strategy(&mut self, strategy: ErrorStrategy) -> &mut Self {
    self.advice(strategy)
  }

  /// Sets the poller options.
  pub fn poller(&mut self, poller: PollerSpec) -> &mut Self {
    self.poller = Some(poller);
    self
  }

  /// Sets an explicit output channel.
  pub fn output_channel(&mut self, channel: impl Into<ChannelRef>) -> &mut Self {
    self.output_channel = Some(channel.into());
    self
  }

  /// The configured id, if any.
  #[must_use]
  pub fn configured_id(&self) -> Option<&str> {
    self.id.as_deref()
  }
}

impl fmt::Debug for EndpointSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EndpointSpec")
      .field("id", &self.id)
      .field("advice_chain", &self.advice_chain.len())
      .field("poller", &self.poller)
      .field("output_channel", &self.output_channel)
      .finish()
  }
}

macro_rules! deref_endpoint_spec {
  ($spec:ty) => {
    impl Deref for $spec {
      type Target = EndpointSpec;

      fn deref(&self) -> &EndpointSpec {
        &self.endpoint
      }
    }

    impl DerefMut for $spec {
      fn deref_mut(&mut self) -> &mut EndpointSpec {
        &mut self.endpoint
      }
    }
  };
}

/// Filter stage options.
#[derive(Debug, Clone, Default)]
pub struct FilterEndpointSpec {
  pub(crate) endpoint: EndpointSpec,
  pub(crate) discard_channel: Option<ChannelRef>,
  pub(crate) throw_exception_on_rejection: bool,
}

impl FilterEndpointSpec {
  /// Sends rejected messages to `channel` instead of dropping them.
  pub fn discard_channel(&mut self, channel: impl Into<ChannelRef>) -> &mut Self {
    self.discard_channel = Some(channel.into());
    self
  }

  /// Fails dispatch with `MessageRejected` when the predicate rejects.
  pub fn throw_exception_on_rejection(&mut self, throw: bool) -> &mut Self {
    self.throw_exception_on_rejection = throw;
    self
  }
}

deref_endpoint_spec!(FilterEndpointSpec);

/// Splitter stage options.
#[derive(Debug, Clone)]
pub struct SplitterEndpointSpec {
  pub(crate) endpoint: EndpointSpec,
  pub(crate) apply_sequence: bool,
}

impl SplitterEndpointSpec {
  /// Whether to stamp correlation and sequence headers on each part.
  pub fn apply_sequence(&mut self, apply: bool) -> &mut Self {
    self.apply_sequence = apply;
    self
  }
}

impl Default for SplitterEndpointSpec {
  fn default() -> Self {
    Self {
      endpoint: EndpointSpec::default(),
      apply_sequence: true,
    }
  }
}

deref_endpoint_spec!(SplitterEndpointSpec);

/// Router stage options.
///
/// A routing key is resolved through the explicit mappings first; an
/// unmapped key names a channel directly, decorated with the configured
/// prefix and suffix. When that channel cannot be resolved the default
/// output channel is used, and without one the message either fails
/// dispatch (`resolution_required`, the default) or falls through to the
/// router's output channel.
#[derive(Debug, Clone)]
pub struct RouterSpec<K> {
  pub(crate) endpoint: EndpointSpec,
  pub(crate) mappings: HashMap<K, ChannelRef>,
  pub(crate) default_output_channel: Option<ChannelRef>,
  pub(crate) resolution_required: bool,
  pub(crate) prefix: String,
  pub(crate) suffix: String,
}

impl<K: Eq + Hash> RouterSpec<K> {
  /// Maps a routing key to a channel.
  pub fn channel_mapping(&mut self, key: K, channel: impl Into<ChannelRef>) -> &mut Self {
    self.mappings.insert(key, channel.into());
    self
  }

  /// Channel for keys that resolve to nothing.
  pub fn default_output_channel(&mut self, channel: impl Into<ChannelRef>) -> &mut Self {
    self.default_output_channel = Some(channel.into());
    self
  }

  /// Whether an unresolvable key fails dispatch.
  pub fn resolution_required(&mut self, required: bool) -> &mut Self {
    self.resolution_required = required;
    self
  }

  /// Prefix added to unmapped keys.
  pub fn prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
    self.prefix = prefix.into();
    self
  }

  /// Suffix added to unmapped keys.
  pub fn suffix(&mut self, suffix: impl Into<String>) -> &mut Self {
    self.suffix = suffix.into();
    self
  }
}

impl<K> Default for RouterSpec<K> {
  fn default() -> Self {
    Self {
      endpoint: EndpointSpec::default(),
      mappings: HashMap::new(),
      default_output_channel: None,
      resolution_required: true,
      prefix: String::new(),
      suffix: String::new(),
    }
  }
}

impl<K> Deref for RouterSpec<K> {
  type Target = EndpointSpec;

  fn deref(&self) -> &EndpointSpec {
    &self.endpoint
  }
}

impl<K> DerefMut for RouterSpec<K> {
  fn deref_mut(&mut self) -> &mut EndpointSpec {
    &mut self.endpoint
  }
}

/// An appended stage: its identity, declared type, handler and options.
///
/// Only the output channel is still written after appending, when the
/// builder wires the stage to its successor.
pub struct Endpoint {
  info: StageInfo,
  declared_type: TypeDescriptor,
  handler: Arc<dyn MessageHandler>,
  advice_chain: Vec<Arc<dyn Advice>>,
  poller: Option<PollerSpec>,
  pub(crate) output_channel: Option<ChannelRef>,
}

impl Endpoint {
  pub(crate) fn new(
    info: StageInfo,
    declared_type: TypeDescriptor,
    handler: Arc<dyn MessageHandler>,
    spec: EndpointSpec,
  ) -> Self {
    Self {
      info,
      declared_type,
      handler,
      advice_chain: spec.advice_chain,
      poller: spec.poller,
      output_channel: spec.output_channel,
    }
  }

  /// The endpoint id.
  #[must_use]
  pub fn id(&self) -> &str {
    &self.info.id
  }

  /// The stage kind.
  #[must_use]
  pub fn kind(&self) -> StageKind {
    self.info.kind
  }

  /// Id and kind together.
  #[must_use]
  pub fn info(&self) -> &StageInfo {
    &self.info
  }

  /// The declared input type (the target type for convert stages).
  #[must_use]
  pub fn declared_type(&self) -> TypeDescriptor {
    self.declared_type
  }

  /// The configured poller, if any.
  #[must_use]
  pub fn poller(&self) -> Option<&PollerSpec> {
    self.poller.as_ref()
  }

  /// Where the stage's results go.
  #[must_use]
  pub fn output_channel(&self) -> Option<&ChannelRef> {
    self.output_channel.as_ref()
  }

  /// Number of advices wrapped around the handler.
  #[must_use]
  pub fn advice_count(&self) -> usize {
    self.advice_chain.len()
  }

  /// Runs the handler for one message through the advice chain.
  pub fn invoke(&self, message: Message) -> FlowResult<HandlerOutcome> {
    invoke_chain(&self.advice_chain, self.handler.as_ref(), &self.info, message)
  }
}

impl fmt::Debug for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Endpoint")
      .field("id", &self.info.id)
      .field("kind", &self.info.kind)
      .field("declared_type", &self.declared_type)
      .field("advice_chain", &self.advice_chain.len())
      .field("poller", &self.poller)
      .field("output_channel", &self.output_channel)
      .finish()
  }
}
