//! # Flow Assembly
//!
//! Entry points that bind a [`FlowSource`] to a composition callback and
//! produce an immutable [`Flow`].
//!
//! The callback runs exactly once, synchronously, against a fresh
//! [`FlowDefinition`]. Builder errors it returns propagate unchanged; foreign
//! errors should be wrapped with [`FlowError::composition`] so they surface as
//! [`FlowError::CompositionFailure`] with the cause attached. A failed
//! composition never yields a partial flow.
//!
//! ```rust
//! use weaveflow::flows::IntegrationFlows;
//!
//! let flow = IntegrationFlows::from_gateway::<String>(|gateway| {
//!     gateway.bean_name("upcase");
//! })
//! .id("upcase-flow")
//! .compose(|f| {
//!     f.transform::<String, String>(|s| s.to_uppercase())?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! assert_eq!(flow.id(), "upcase-flow");
//! assert!(flow.output_channel().unwrap().is_anonymous());
//! ```
//!
//! [`FlowError::composition`]: crate::error::FlowError::composition
//! [`FlowError::CompositionFailure`]: crate::error::FlowError::CompositionFailure

use crate::channel::MessageChannel;
use crate::config::FlowConfig;
use crate::definition::FlowDefinition;
use crate::error::FlowResult;
use crate::flow::Flow;
use crate::message::Message;
use crate::source::{
  FlowSource, GatewayProxySpec, MessageProducer, MessageSource, SourcePollingChannelAdapterSpec,
};
use futures::Stream;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

static FLOW_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// Builder binding a source, an optional id and a config to a composition.
#[derive(Debug)]
pub struct IntegrationFlows {
  source: FlowSource,
  id: Option<String>,
  config: FlowConfig,
}

impl IntegrationFlows {
  /// Starts a flow from any source.
  #[must_use]
  pub fn new(source: FlowSource) -> Self {
    Self {
      source,
      id: None,
      config: FlowConfig::default(),
    }
  }

  /// Starts a flow from a named channel.
  pub fn from_channel(name: impl Into<String>) -> Self {
    Self::new(FlowSource::channel(name))
  }

  /// Starts a flow from a fixed-subscriber channel.
  pub fn from_fixed_subscriber_channel(name: impl Into<String>) -> Self {
    Self::new(FlowSource::fixed_subscriber_channel(name))
  }

  /// Starts a flow from a live channel.
  pub fn from_channel_instance(channel: Arc<dyn MessageChannel>) -> Self {
    Self::new(FlowSource::channel_instance(channel))
  }

  /// Starts a flow from a polled source.
  pub fn from_source(
    source: impl MessageSource + 'static,
    options: impl FnOnce(&mut SourcePollingChannelAdapterSpec),
  ) -> Self {
    Self::new(FlowSource::polling(source, options))
  }

  /// Starts a flow from a polled supplier function.
  pub fn from_supplier<T>(
    supplier: impl Fn() -> T + Send + Sync + 'static,
    options: impl FnOnce(&mut SourcePollingChannelAdapterSpec),
  ) -> Self
  where
    T: Any + Send + Sync,
  {
    Self::new(FlowSource::supplier(supplier, options))
  }

  /// Starts a flow from a reactive publisher.
  pub fn from_publisher(stream: impl Stream<Item = Message> + Send + 'static) -> Self {
    Self::new(FlowSource::publisher(stream))
  }

  /// Starts a flow behind a gateway for the service type `S`.
  pub fn from_gateway<S: Any>(configure: impl FnOnce(&mut GatewayProxySpec)) -> Self {
    Self::new(FlowSource::gateway::<S>(configure))
  }

  /// Starts a flow from a message producer.
  pub fn from_producer(producer: impl MessageProducer + 'static) -> Self {
    Self::new(FlowSource::producer(producer))
  }

  /// Sets the flow id; generated from the config's prefix otherwise.
  #[must_use]
  pub fn id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  /// Applies a config.
  #[must_use]
  pub fn with_config(mut self, config: FlowConfig) -> Self {
    self.config = config;
    self
  }

  /// Runs `compose` once against a fresh definition and finalizes the flow.
  ///
  /// Errors returned by `compose` are passed through as they are: builder
  /// errors keep their own variant and are never wrapped in
  /// [`FlowError::CompositionFailure`]. That variant only appears when the
  /// callback builds it itself with [`FlowError::composition`].
  ///
  /// [`FlowError::composition`]: crate::error::FlowError::composition
  /// [`FlowError::CompositionFailure`]: crate::error::FlowError::CompositionFailure
  pub fn compose<F>(self, compose: F) -> FlowResult<Flow>
  where
    F: FnOnce(&mut FlowDefinition) -> FlowResult<()>,
  {
    let id = self.id.unwrap_or_else(|| {
      let sequence = FLOW_SEQUENCE.fetch_add(1, Ordering::Relaxed);
      format!("{}#{}", self.config.id_prefix, sequence)
    });
    let mut definition = FlowDefinition::new(id, self.source, self.config)?;
    if let Err(error) = compose(&mut definition) {
      warn!(flow = %definition.id(), error = %error, "flow composition failed");
      return Err(error);
    }
    definition.into_flow()
  }
}

/// Composes a flow from `source` with a generated id and the default config.
pub fn integration_flow<F>(source: FlowSource, compose: F) -> FlowResult<Flow>
where
  F: FnOnce(&mut FlowDefinition) -> FlowResult<()>,
{
  IntegrationFlows::new(source).compose(compose)
}
