//! Message envelope types for flow dispatch.
//!
//! Every item travelling through a flow is a [`Message`]: a type-erased
//! [`Payload`], a unique [`MessageId`] and a set of [`MessageHeaders`].
//!
//! # Overview
//!
//! - [`MessageId`]: A unique identifier for messages
//! - [`Payload`]: A shared, type-erased payload that remembers its type name
//! - [`MessageHeaders`]: Timestamp, content type, reply channel and sequence details
//! - [`Message`]: The envelope itself
//!
//! # Example
//!
//! ```rust
//! use weaveflow::message::Message;
//!
//! let msg = Message::new(42i32).with_header("origin", "sensor-7");
//!
//! assert_eq!(msg.payload().downcast_ref::<i32>(), Some(&42));
//! assert_eq!(msg.headers().get("origin"), Some("sensor-7"));
//! ```

use crate::channel::ChannelRef;
use chrono::{DateTime, Utc};
use std::any::{Any, TypeId};
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A unique identifier for messages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MessageId {
  /// A UUID-based identifier (128-bit).
  Uuid(u128),

  /// A sequence-based identifier (64-bit).
  Sequence(u64),

  /// A custom string identifier.
  Custom(String),
}

impl MessageId {
  /// Create a new random (version 4) UUID message ID.
  #[must_use]
  pub fn new_uuid() -> Self {
    let raw: u128 = rand::random();
    // Set version 4 and RFC 4122 variant bits
    let uuid = (raw & !(0xF << 76) & !(0x3 << 62)) | (0x4 << 76) | (0x2 << 62);
    MessageId::Uuid(uuid)
  }

  /// Create a new sequence-based message ID.
  #[must_use]
  pub const fn new_sequence(seq: u64) -> Self {
    MessageId::Sequence(seq)
  }

  /// Create a custom message ID from a string.
  #[must_use]
  pub fn new_custom(id: impl Into<String>) -> Self {
    MessageId::Custom(id.into())
  }

  /// Returns true if this is a UUID-based ID.
  #[must_use]
  pub const fn is_uuid(&self) -> bool {
    matches!(self, MessageId::Uuid(_))
  }
}

impl Display for MessageId {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      MessageId::Uuid(uuid) => write!(
        f,
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        (uuid >> 96) as u32,
        (uuid >> 80) as u16,
        (uuid >> 64) as u16,
        (uuid >> 48) as u16,
        (uuid & 0xFFFF_FFFF_FFFF) as u64
      ),
      MessageId::Sequence(seq) => write!(f, "seq:{}", seq),
      MessageId::Custom(id) => write!(f, "custom:{}", id),
    }
  }
}

impl Hash for MessageId {
  fn hash<H: Hasher>(&self, state: &mut H) {
    std::mem::discriminant(self).hash(state);
    match self {
      MessageId::Uuid(uuid) => uuid.hash(state),
      MessageId::Sequence(seq) => seq.hash(state),
      MessageId::Custom(id) => id.hash(state),
    }
  }
}

impl Default for MessageId {
  fn default() -> Self {
    MessageId::new_uuid()
  }
}

/// A shared, type-erased message payload.
///
/// Cloning a payload only bumps a reference count. The concrete type name is
/// recorded at construction so that type mismatches can be reported.
#[derive(Clone)]
pub struct Payload {
  value: Arc<dyn Any + Send + Sync>,
  type_name: &'static str,
}

impl Payload {
  /// Wraps a value as a payload.
  pub fn new<T: Any + Send + Sync>(value: T) -> Self {
    Self {
      value: Arc::new(value),
      type_name: std::any::type_name::<T>(),
    }
  }

  /// The type name of the wrapped value.
  #[must_use]
  pub fn type_name(&self) -> &'static str {
    self.type_name
  }

  /// The [`TypeId`] of the wrapped value.
  #[must_use]
  pub fn type_id(&self) -> TypeId {
    (*self.value).type_id()
  }

  /// Returns true if the payload holds a `T`.
  #[must_use]
  pub fn is<T: Any>(&self) -> bool {
    self.value.is::<T>()
  }

  /// Borrows the payload as a `T`.
  #[must_use]
  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.value.downcast_ref::<T>()
  }

  /// Returns a shared handle to the payload as a `T`.
  #[must_use]
  pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    self.value.clone().downcast::<T>().ok()
  }

  /// Extracts an owned `T`, cloning only when the payload is still shared.
  #[must_use]
  pub fn extract<T: Any + Send + Sync + Clone>(self) -> Option<T> {
    let value = self.value.downcast::<T>().ok()?;
    Some(Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone()))
  }
}

impl fmt::Debug for Payload {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "Payload<{}>", self.type_name)
  }
}

/// Headers carried alongside a payload.
#[derive(Clone, Debug)]
pub struct MessageHeaders {
  /// When the message was created.
  pub timestamp: DateTime<Utc>,

  /// MIME type of the payload, e.g. `application/json`.
  pub content_type: Option<String>,

  /// Where a terminal reply should go when the flow has no explicit output.
  pub reply_channel: Option<ChannelRef>,

  /// Id of the message a split part was derived from.
  pub correlation_id: Option<MessageId>,

  /// 1-based position of a split part.
  pub sequence_number: Option<usize>,

  /// Number of parts produced by the split.
  pub sequence_size: Option<usize>,

  /// Additional string headers.
  pub custom: Vec<(String, String)>,
}

impl Default for MessageHeaders {
  fn default() -> Self {
    Self {
      timestamp: Utc::now(),
      content_type: None,
      reply_channel: None,
      correlation_id: None,
      sequence_number: None,
      sequence_size: None,
      custom: Vec::new(),
    }
  }
}

impl MessageHeaders {
  /// Get a custom header by name.
  #[must_use]
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .custom
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }

  /// Sets a custom header, replacing any previous value.
  pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    match self.custom.iter_mut().find(|(k, _)| *k == name) {
      Some(entry) => entry.1 = value,
      None => self.custom.push((name, value)),
    }
  }
}

/// A message envelope: id, payload and headers.
///
/// # Example
///
/// ```rust
/// use weaveflow::message::{Message, MessageId};
///
/// let msg = Message::new("hello").with_id(MessageId::new_sequence(1));
/// assert_eq!(msg.id(), &MessageId::Sequence(1));
/// ```
#[derive(Clone, Debug)]
pub struct Message {
  id: MessageId,
  payload: Payload,
  headers: MessageHeaders,
}

impl Message {
  /// Create a new message with a fresh UUID.
  pub fn new<T: Any + Send + Sync>(value: T) -> Self {
    Self::from_payload(Payload::new(value))
  }

  /// Create a new message around an existing payload.
  #[must_use]
  pub fn from_payload(payload: Payload) -> Self {
    Self {
      id: MessageId::new_uuid(),
      payload,
      headers: MessageHeaders::default(),
    }
  }

  /// Replace the message id.
  #[must_use]
  pub fn with_id(mut self, id: MessageId) -> Self {
    self.id = id;
    self
  }

  /// Add a custom header.
  #[must_use]
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.set(name, value);
    self
  }

  /// Set the content type header.
  #[must_use]
  pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
    self.headers.content_type = Some(content_type.into());
    self
  }

  /// Set the reply channel header.
  #[must_use]
  pub fn with_reply_channel(mut self, channel: impl Into<ChannelRef>) -> Self {
    self.headers.reply_channel = Some(channel.into());
    self
  }

  /// Get the message ID.
  #[must_use]
  pub fn id(&self) -> &MessageId {
    &self.id
  }

  /// Get the payload.
  #[must_use]
  pub fn payload(&self) -> &Payload {
    &self.payload
  }

  /// Get the headers.
  #[must_use]
  pub fn headers(&self) -> &MessageHeaders {
    &self.headers
  }

  /// Get a mutable reference to the headers.
  pub fn headers_mut(&mut self) -> &mut MessageHeaders {
    &mut self.headers
  }

  /// Consume the message and return just the payload.
  #[must_use]
  pub fn into_payload(self) -> Payload {
    self.payload
  }

  /// Builds the message a stage emits for this input: a fresh id and
  /// timestamp, the given payload, and a copy of the remaining headers.
  #[must_use]
  pub fn reply_with(&self, payload: Payload) -> Message {
    let mut headers = self.headers.clone();
    headers.timestamp = Utc::now();
    Message {
      id: MessageId::new_uuid(),
      payload,
      headers,
    }
  }
}
