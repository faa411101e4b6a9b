//! # Channels
//!
//! Channels are the conduits between endpoints. A flow definition only holds
//! [`ChannelRef`]s: names, anonymous names generated by the builder, or
//! handles to live channels. Turning a name into a live channel is the job of
//! the runtime, which looks it up in a [`ChannelRegistry`].
//!
//! [`QueueChannel`] is the in-process channel implementation: an unbounded
//! tokio queue with blocking-free sends and async receives.

use crate::error::{FlowError, FlowResult};
use crate::message::Message;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

/// A live channel that accepts messages.
pub trait MessageChannel: Send + Sync {
  /// The channel's name.
  fn name(&self) -> &str;

  /// Sends a message into the channel without blocking.
  fn send(&self, message: Message) -> FlowResult<()>;
}

/// Reference to a channel from within a flow definition.
#[derive(Clone)]
pub enum ChannelRef {
  /// A channel known by name and resolved by the runtime.
  Named(String),
  /// A live channel handle.
  Instance(Arc<dyn MessageChannel>),
  /// A channel generated by the builder between two stages.
  Anonymous(String),
}

impl ChannelRef {
  /// Creates a named channel reference.
  pub fn named(name: impl Into<String>) -> Self {
    ChannelRef::Named(name.into())
  }

  /// The name under which the channel is known.
  #[must_use]
  pub fn name(&self) -> &str {
    match self {
      ChannelRef::Named(name) | ChannelRef::Anonymous(name) => name,
      ChannelRef::Instance(channel) => channel.name(),
    }
  }

  /// Returns true for builder-generated channels.
  #[must_use]
  pub fn is_anonymous(&self) -> bool {
    matches!(self, ChannelRef::Anonymous(_))
  }
}

impl PartialEq for ChannelRef {
  fn eq(&self, other: &Self) -> bool {
    self.name() == other.name()
  }
}

impl Eq for ChannelRef {}

impl fmt::Debug for ChannelRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChannelRef::Named(name) => write!(f, "Named({})", name),
      ChannelRef::Instance(channel) => write!(f, "Instance({})", channel.name()),
      ChannelRef::Anonymous(name) => write!(f, "Anonymous({})", name),
    }
  }
}

impl fmt::Display for ChannelRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl From<&str> for ChannelRef {
  fn from(name: &str) -> Self {
    ChannelRef::Named(name.to_string())
  }
}

impl From<String> for ChannelRef {
  fn from(name: String) -> Self {
    ChannelRef::Named(name)
  }
}

impl From<Arc<dyn MessageChannel>> for ChannelRef {
  fn from(channel: Arc<dyn MessageChannel>) -> Self {
    ChannelRef::Instance(channel)
  }
}

impl From<Arc<QueueChannel>> for ChannelRef {
  fn from(channel: Arc<QueueChannel>) -> Self {
    ChannelRef::Instance(channel)
  }
}

/// An unbounded in-process queue channel.
///
/// # Example
///
/// ```rust
/// use weaveflow::channel::{MessageChannel, QueueChannel};
/// use weaveflow::message::Message;
///
/// let queue = QueueChannel::new("results");
/// queue.send(Message::new(7u32)).unwrap();
/// assert_eq!(queue.try_receive().unwrap().payload().downcast_ref::<u32>(), Some(&7));
/// ```
pub struct QueueChannel {
  name: String,
  sender: mpsc::UnboundedSender<Message>,
  receiver: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl QueueChannel {
  /// Creates an empty queue channel.
  pub fn new(name: impl Into<String>) -> Self {
    let (sender, receiver) = mpsc::unbounded_channel();
    Self {
      name: name.into(),
      sender,
      receiver: Mutex::new(receiver),
    }
  }

  /// Waits for the next message.
  pub async fn receive(&self) -> Option<Message> {
    self.receiver.lock().await.recv().await
  }

  /// Waits at most `timeout` for the next message.
  pub async fn receive_timeout(&self, timeout: Duration) -> Option<Message> {
    tokio::time::timeout(timeout, self.receive())
      .await
      .ok()
      .flatten()
  }

  /// Takes the next message if one is queued and no receiver is waiting.
  #[must_use]
  pub fn try_receive(&self) -> Option<Message> {
    self.receiver.try_lock().ok()?.try_recv().ok()
  }

  /// Takes every queued message.
  #[must_use]
  pub fn drain(&self) -> Vec<Message> {
    std::iter::from_fn(|| self.try_receive()).collect()
  }
}

impl MessageChannel for QueueChannel {
  fn name(&self) -> &str {
    &self.name
  }

  fn send(&self, message: Message) -> FlowResult<()> {
    trace!(channel = %self.name, message_id = %message.id(), "queued message");
    self
      .sender
      .send(message)
      .map_err(|_| FlowError::ChannelClosed(self.name.clone()))
  }
}

impl fmt::Debug for QueueChannel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueChannel")
      .field("name", &self.name)
      .finish()
  }
}

/// Name-to-channel lookup used by runtimes to resolve [`ChannelRef`]s.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
  channels: HashMap<String, Arc<dyn MessageChannel>>,
}

impl ChannelRegistry {
  /// Creates an empty registry.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a live channel under its own name.
  pub fn register(&mut self, channel: Arc<dyn MessageChannel>) -> FlowResult<()> {
    let name = channel.name().to_string();
    if self.channels.contains_key(&name) {
      return Err(FlowError::DuplicateComponentName(name));
    }
    self.channels.insert(name, channel);
    Ok(())
  }

  /// Creates and registers a [`QueueChannel`], returning a handle to it.
  pub fn queue(&mut self, name: impl Into<String>) -> FlowResult<Arc<QueueChannel>> {
    let queue = Arc::new(QueueChannel::new(name));
    self.register(queue.clone())?;
    Ok(queue)
  }

  /// Looks a channel up by name.
  #[must_use]
  pub fn get(&self, name: &str) -> Option<Arc<dyn MessageChannel>> {
    self.channels.get(name).cloned()
  }

  /// Resolves a reference to a live channel.
  #[must_use]
  pub fn resolve(&self, channel: &ChannelRef) -> Option<Arc<dyn MessageChannel>> {
    match channel {
      ChannelRef::Instance(live) => Some(live.clone()),
      ChannelRef::Named(name) | ChannelRef::Anonymous(name) => self.get(name),
    }
  }

  /// Returns true if a channel with this name is registered.
  #[must_use]
  pub fn contains(&self, name: &str) -> bool {
    self.channels.contains_key(name)
  }
}

impl fmt::Debug for ChannelRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names: Vec<&String> = self.channels.keys().collect();
    names.sort();
    f.debug_struct("ChannelRegistry")
      .field("channels", &names)
      .finish()
  }
}
