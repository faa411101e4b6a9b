//! # Flow Sources
//!
//! Where a flow's messages come from. A [`FlowSource`] is the first element
//! of every flow:
//!
//! - a named channel, optionally fixed-subscriber
//! - a live channel instance
//! - a pollable [`MessageSource`] with [`SourcePollingChannelAdapterSpec`] options
//! - a reactive publisher (any `futures` stream of messages)
//! - a gateway, described by a service type and [`GatewayProxySpec`] options
//! - a push-based [`MessageProducer`]
//!
//! Sources are descriptors: nothing is polled or subscribed until a runtime
//! such as [`FlowRunner`](crate::runner::FlowRunner) starts the flow.

use crate::channel::{ChannelRef, MessageChannel};
use crate::endpoint::PollerSpec;
use crate::message::Message;
use crate::types::TypeDescriptor;
use futures::Stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A pollable source of messages.
pub trait MessageSource: Send + Sync {
  /// Returns the next message, or `None` when nothing is available.
  fn receive(&self) -> Option<Message>;
}

/// A source that calls a supplier function on every poll.
pub struct SupplierSource<F> {
  supplier: F,
}

impl<F> SupplierSource<F> {
  /// Wraps a supplier.
  pub fn new(supplier: F) -> Self {
    Self { supplier }
  }
}

impl<T, F> MessageSource for SupplierSource<F>
where
  T: Any + Send + Sync,
  F: Fn() -> T + Send + Sync,
{
  fn receive(&self) -> Option<Message> {
    Some(Message::new((self.supplier)()))
  }
}

/// A source that yields the items of an iterator, then nothing.
pub struct IteratorSource<I> {
  items: Mutex<I>,
}

impl<I> IteratorSource<I> {
  /// Wraps anything iterable.
  pub fn new<C>(items: C) -> Self
  where
    C: IntoIterator<IntoIter = I>,
  {
    Self {
      items: Mutex::new(items.into_iter()),
    }
  }
}

impl<I> MessageSource for IteratorSource<I>
where
  I: Iterator + Send,
  I::Item: Any + Send + Sync,
{
  fn receive(&self) -> Option<Message> {
    self.items.lock().ok()?.next().map(Message::new)
  }
}

/// A push-based producer of messages, subscribed to when the flow starts.
pub trait MessageProducer: Send + Sync {
  /// The producer's name, used in logs and component listings.
  fn name(&self) -> &str;

  /// Opens the stream of produced messages.
  fn subscribe(&self) -> BoxStream<'static, Message>;
}

/// Options of the adapter that polls a [`MessageSource`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePollingChannelAdapterSpec {
  pub(crate) id: Option<String>,
  pub(crate) poller: Option<PollerSpec>,
}

impl SourcePollingChannelAdapterSpec {
  /// Sets the adapter id, registered as the source's component name.
  pub fn id(&mut self, id: impl Into<String>) -> &mut Self {
    self.id = Some(id.into());
    self
  }

  /// Sets the poller; without one the flow's default poller is used.
  pub fn poller(&mut self, poller: PollerSpec) -> &mut Self {
    self.poller = Some(poller);
    self
  }

  /// The configured poller, if any.
  #[must_use]
  pub fn configured_poller(&self) -> Option<&PollerSpec> {
    self.poller.as_ref()
  }
}

/// Options of a gateway source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayProxySpec {
  pub(crate) bean_name: Option<String>,
  pub(crate) default_reply_timeout: Duration,
  pub(crate) error_channel: Option<ChannelRef>,
}

impl GatewayProxySpec {
  /// Sets the gateway's component name.
  pub fn bean_name(&mut self, name: impl Into<String>) -> &mut Self {
    self.bean_name = Some(name.into());
    self
  }

  /// How long a request waits for its reply.
  pub fn default_reply_timeout(&mut self, timeout: Duration) -> &mut Self {
    self.default_reply_timeout = timeout;
    self
  }

  /// Channel that receives the error when a request fails.
  pub fn error_channel(&mut self, channel: impl Into<ChannelRef>) -> &mut Self {
    self.error_channel = Some(channel.into());
    self
  }

  /// The reply timeout.
  #[must_use]
  pub fn reply_timeout(&self) -> Duration {
    self.default_reply_timeout
  }

  /// The error channel, if any.
  #[must_use]
  pub fn configured_error_channel(&self) -> Option<&ChannelRef> {
    self.error_channel.as_ref()
  }
}

impl Default for GatewayProxySpec {
  fn default() -> Self {
    Self {
      bean_name: None,
      default_reply_timeout: Duration::from_secs(1),
      error_channel: None,
    }
  }
}

/// The starting point of a flow.
pub enum FlowSource {
  /// A channel known by name. A fixed-subscriber channel admits exactly one
  /// consumer and must be followed by a stage.
  Channel {
    /// The channel name.
    name: String,
    /// Whether the channel is fixed-subscriber.
    fixed_subscriber: bool,
  },
  /// A live channel.
  ChannelInstance(Arc<dyn MessageChannel>),
  /// A pollable source and its adapter options.
  Polling {
    /// The polled source.
    source: Arc<dyn MessageSource>,
    /// Adapter options.
    adapter: SourcePollingChannelAdapterSpec,
  },
  /// A reactive publisher, taken by the runtime when the flow starts.
  Publisher(Mutex<Option<BoxStream<'static, Message>>>),
  /// A gateway exposing the flow as a request/reply service.
  Gateway {
    /// The service interface the gateway stands for.
    service: TypeDescriptor,
    /// Gateway options.
    spec: GatewayProxySpec,
  },
  /// A push-based producer.
  Producer(Arc<dyn MessageProducer>),
}

impl FlowSource {
  /// A named channel source.
  pub fn channel(name: impl Into<String>) -> Self {
    FlowSource::Channel {
      name: name.into(),
      fixed_subscriber: false,
    }
  }

  /// A named fixed-subscriber channel source.
  pub fn fixed_subscriber_channel(name: impl Into<String>) -> Self {
    FlowSource::Channel {
      name: name.into(),
      fixed_subscriber: true,
    }
  }

  /// A live channel source.
  pub fn channel_instance(channel: Arc<dyn MessageChannel>) -> Self {
    FlowSource::ChannelInstance(channel)
  }

  /// A polled source with adapter options.
  pub fn polling(
    source: impl MessageSource + 'static,
    options: impl FnOnce(&mut SourcePollingChannelAdapterSpec),
  ) -> Self {
    let mut adapter = SourcePollingChannelAdapterSpec::default();
    options(&mut adapter);
    FlowSource::Polling {
      source: Arc::new(source),
      adapter,
    }
  }

  /// A polled supplier function with adapter options.
  pub fn supplier<T, F>(
    supplier: F,
    options: impl FnOnce(&mut SourcePollingChannelAdapterSpec),
  ) -> Self
  where
    T: Any + Send + Sync,
    F: Fn() -> T + Send + Sync + 'static,
  {
    Self::polling(SupplierSource::new(supplier), options)
  }

  /// A reactive publisher source.
  pub fn publisher(stream: impl Stream<Item = Message> + Send + 'static) -> Self {
    FlowSource::Publisher(Mutex::new(Some(stream.boxed())))
  }

  /// A gateway source for the service type `S`.
  pub fn gateway<S: Any>(configure: impl FnOnce(&mut GatewayProxySpec)) -> Self {
    let mut spec = GatewayProxySpec::default();
    configure(&mut spec);
    FlowSource::Gateway {
      service: TypeDescriptor::of::<S>(),
      spec,
    }
  }

  /// A message-producer source.
  pub fn producer(producer: impl MessageProducer + 'static) -> Self {
    FlowSource::Producer(Arc::new(producer))
  }

  /// The channel this source stands for, for channel sources.
  #[must_use]
  pub fn channel_ref(&self) -> Option<ChannelRef> {
    match self {
      FlowSource::Channel { name, .. } => Some(ChannelRef::Named(name.clone())),
      FlowSource::ChannelInstance(channel) => Some(ChannelRef::Instance(channel.clone())),
      _ => None,
    }
  }

  /// Returns true for fixed-subscriber channel sources.
  #[must_use]
  pub fn is_fixed_subscriber(&self) -> bool {
    matches!(
      self,
      FlowSource::Channel {
        fixed_subscriber: true,
        ..
      }
    )
  }

  /// The component name the source registers under, if it has one.
  #[must_use]
  pub fn component_name(&self) -> Option<&str> {
    match self {
      FlowSource::Polling { adapter, .. } => adapter.id.as_deref(),
      FlowSource::Gateway { spec, .. } => spec.bean_name.as_deref(),
      _ => None,
    }
  }

  /// Takes the publisher stream; `None` once taken or for other sources.
  pub fn take_publisher(&self) -> Option<BoxStream<'static, Message>> {
    match self {
      FlowSource::Publisher(stream) => stream.lock().ok()?.take(),
      _ => None,
    }
  }

  /// A short description for logs and component listings.
  #[must_use]
  pub fn describe(&self) -> String {
    match self {
      FlowSource::Channel {
        name,
        fixed_subscriber: true,
      } => format!("fixed-subscriber channel '{}'", name),
      FlowSource::Channel { name, .. } => format!("channel '{}'", name),
      FlowSource::ChannelInstance(channel) => format!("channel '{}'", channel.name()),
      FlowSource::Polling { adapter, .. } => match &adapter.id {
        Some(id) => format!("polling source '{}'", id),
        None => "polling source".to_string(),
      },
      FlowSource::Publisher(_) => "publisher".to_string(),
      FlowSource::Gateway { service, .. } => format!("gateway for {}", service),
      FlowSource::Producer(producer) => format!("producer '{}'", producer.name()),
    }
  }
}

impl fmt::Debug for FlowSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "FlowSource({})", self.describe())
  }
}
