//! # Message Handlers
//!
//! The handler shapes behind each stage kind. Stage factories on
//! [`FlowDefinition`](crate::definition::FlowDefinition) wrap a user function
//! in one of these and append it as an endpoint:
//!
//! | Stage     | Function shape                     | Handler             |
//! |-----------|------------------------------------|---------------------|
//! | transform | `Fn(P) -> T`                       | [`TransformHandler`] |
//! | filter    | `Fn(&P) -> bool`                   | [`FilterHandler`]    |
//! | split     | `Fn(P) -> impl IntoIterator<T>`    | [`SplitHandler`]     |
//! | route     | `Fn(&P) -> K`                      | [`RouterHandler`]    |
//! | handle    | `Fn(P)`                            | [`ServiceHandler`]   |
//!
//! Handlers downcast the payload to their declared input type and fail with
//! [`FlowError::PayloadType`] when it does not match.

use crate::channel::ChannelRef;
use crate::error::{BoxError, FlowError, FlowResult, StageInfo};
use crate::message::{Message, Payload};
use crate::types::TypeDescriptor;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::marker::PhantomData;
use tracing::{Level, debug, error, info, trace, warn};

/// What a stage produced for one message.
pub enum HandlerOutcome {
  /// One message continues to the stage's output channel.
  Reply(Message),
  /// Each message continues to the stage's output channel.
  Many(Vec<Message>),
  /// The message was rejected; it goes to `channel` or nowhere.
  Discard {
    /// The rejected message.
    message: Message,
    /// Discard channel, if configured.
    channel: Option<ChannelRef>,
  },
  /// The message goes to a channel chosen by a router.
  Route(RouteDecision),
  /// The stage consumed the message and produced nothing.
  Done,
}

/// A router's choice for one message.
pub struct RouteDecision {
  /// The routed message.
  pub message: Message,
  /// The channel chosen for the routing key.
  pub channel: ChannelRef,
  /// Fallback when `channel` cannot be resolved.
  pub default_output: Option<ChannelRef>,
  /// Whether an unresolvable destination without fallback is an error.
  pub resolution_required: bool,
}

/// Processes a single message for a stage.
pub trait MessageHandler: Send + Sync {
  /// Handles `message` on behalf of `stage`.
  fn handle(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome>;
}

fn payload_type_error(stage: &StageInfo, expected: &'static str, message: &Message) -> FlowError {
  FlowError::PayloadType {
    stage: stage.clone(),
    expected,
    found: message.payload().type_name(),
  }
}

/// Extracts an owned `P` from the message payload.
fn extract<P>(stage: &StageInfo, message: &Message) -> FlowResult<P>
where
  P: Any + Send + Sync + Clone,
{
  message
    .payload()
    .clone()
    .extract::<P>()
    .ok_or_else(|| payload_type_error(stage, std::any::type_name::<P>(), message))
}

/// Borrows the message payload as a `P`.
fn borrow<'m, P: Any>(stage: &StageInfo, message: &'m Message) -> FlowResult<&'m P> {
  message
    .payload()
    .downcast_ref::<P>()
    .ok_or_else(|| payload_type_error(stage, std::any::type_name::<P>(), message))
}

/// 1-in/1-out transformation of a typed payload.
pub struct TransformHandler<P, T, F> {
  function: F,
  _types: PhantomData<fn(P) -> T>,
}

impl<P, T, E, F> TransformHandler<P, T, F>
where
  F: Fn(P) -> Result<T, E>,
{
  /// Wraps a fallible transformation.
  pub fn new(function: F) -> Self {
    Self {
      function,
      _types: PhantomData,
    }
  }
}

impl<P, T, E, F> MessageHandler for TransformHandler<P, T, F>
where
  P: Any + Send + Sync + Clone,
  T: Any + Send + Sync,
  E: Into<BoxError>,
  F: Fn(P) -> Result<T, E> + Send + Sync,
{
  fn handle(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
    let input = extract::<P>(stage, &message)?;
    let output = (self.function)(input).map_err(|e| FlowError::handler(stage, e))?;
    Ok(HandlerOutcome::Reply(message.reply_with(Payload::new(output))))
  }
}

/// Transformation over the raw payload, checked against a runtime descriptor.
pub struct PayloadTransformHandler<F> {
  input: TypeDescriptor,
  function: F,
}

impl<F> PayloadTransformHandler<F> {
  /// Wraps `function`, accepting only payloads described by `input`.
  pub fn new(input: TypeDescriptor, function: F) -> Self {
    Self { input, function }
  }
}

impl<F> MessageHandler for PayloadTransformHandler<F>
where
  F: Fn(&Payload) -> FlowResult<Payload> + Send + Sync,
{
  fn handle(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
    if !self.input.matches(message.payload()) {
      return Err(payload_type_error(stage, self.input.name(), &message));
    }
    let output = (self.function)(message.payload())?;
    Ok(HandlerOutcome::Reply(message.reply_with(output)))
  }
}

/// Predicate stage.
pub struct FilterHandler<P, F> {
  predicate: F,
  discard_channel: Option<ChannelRef>,
  throw_exception_on_rejection: bool,
  _types: PhantomData<fn(&P)>,
}

impl<P, F> FilterHandler<P, F> {
  /// Wraps a predicate with the rejection options of a filter spec.
  pub fn new(
    predicate: F,
    discard_channel: Option<ChannelRef>,
    throw_exception_on_rejection: bool,
  ) -> Self
  where
    F: Fn(&P) -> bool,
  {
    Self {
      predicate,
      discard_channel,
      throw_exception_on_rejection,
      _types: PhantomData,
    }
  }

  fn reject(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
    if self.throw_exception_on_rejection {
      return Err(FlowError::MessageRejected {
        stage: stage.clone(),
        message_id: message.id().clone(),
      });
    }
    trace!(stage = %stage, message_id = %message.id(), "message rejected by filter");
    Ok(HandlerOutcome::Discard {
      message,
      channel: self.discard_channel.clone(),
    })
  }
}

impl<P, F> MessageHandler for FilterHandler<P, F>
where
  P: Any,
  F: Fn(&P) -> bool + Send + Sync,
{
  fn handle(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
    let accepted = (self.predicate)(borrow::<P>(stage, &message)?);
    if accepted {
      Ok(HandlerOutcome::Reply(message))
    } else {
      self.reject(stage, message)
    }
  }
}

/// Predicate over the raw payload, checked against a runtime descriptor.
pub struct PayloadFilterHandler<F> {
  input: TypeDescriptor,
  inner: FilterHandler<Payload, F>,
}

impl<F> PayloadFilterHandler<F> {
  /// Wraps `predicate`, accepting only payloads described by `input`.
  pub fn new(
    input: TypeDescriptor,
    predicate: F,
    discard_channel: Option<ChannelRef>,
    throw_exception_on_rejection: bool,
  ) -> Self
  where
    F: Fn(&Payload) -> bool,
  {
    Self {
      input,
      inner: FilterHandler::new(predicate, discard_channel, throw_exception_on_rejection),
    }
  }
}

impl<F> MessageHandler for PayloadFilterHandler<F>
where
  F: Fn(&Payload) -> bool + Send + Sync,
{
  fn handle(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
    if !self.input.matches(message.payload()) {
      return Err(payload_type_error(stage, self.input.name(), &message));
    }
    if (self.inner.predicate)(message.payload()) {
      Ok(HandlerOutcome::Reply(message))
    } else {
      self.inner.reject(stage, message)
    }
  }
}

/// 1-in/many-out stage.
pub struct SplitHandler<P, T, F> {
  function: F,
  apply_sequence: bool,
  _types: PhantomData<fn(P) -> T>,
}

impl<P, T, F> SplitHandler<P, T, F> {
  /// Wraps a splitting function.
  pub fn new<I>(function: F, apply_sequence: bool) -> Self
  where
    F: Fn(P) -> I,
    I: IntoIterator<Item = T>,
  {
    Self {
      function,
      apply_sequence,
      _types: PhantomData,
    }
  }
}

impl<P, T, I, F> MessageHandler for SplitHandler<P, T, F>
where
  P: Any + Send + Sync + Clone,
  T: Any + Send + Sync,
  I: IntoIterator<Item = T>,
  F: Fn(P) -> I + Send + Sync,
{
  fn handle(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
    let input = extract::<P>(stage, &message)?;
    let items: Vec<T> = (self.function)(input).into_iter().collect();
    let size = items.len();
    let parts = items
      .into_iter()
      .enumerate()
      .map(|(index, item)| {
        let mut part = message.reply_with(Payload::new(item));
        if self.apply_sequence {
          let headers = part.headers_mut();
          headers.correlation_id = Some(message.id().clone());
          headers.sequence_number = Some(index + 1);
          headers.sequence_size = Some(size);
        }
        part
      })
      .collect();
    Ok(HandlerOutcome::Many(parts))
  }
}

/// Content-based router.
pub struct RouterHandler<P, K, F> {
  function: F,
  mappings: HashMap<K, ChannelRef>,
  default_output: Option<ChannelRef>,
  resolution_required: bool,
  prefix: String,
  suffix: String,
  _types: PhantomData<fn(&P)>,
}

impl<P, K, F> RouterHandler<P, K, F> {
  /// Wraps a key function with the resolution options of a router spec.
  pub fn new(
    function: F,
    mappings: HashMap<K, ChannelRef>,
    default_output: Option<ChannelRef>,
    resolution_required: bool,
    prefix: String,
    suffix: String,
  ) -> Self
  where
    F: Fn(&P) -> K,
  {
    Self {
      function,
      mappings,
      default_output,
      resolution_required,
      prefix,
      suffix,
      _types: PhantomData,
    }
  }
}

impl<P, K, F> RouterHandler<P, K, F>
where
  K: Eq + Hash + Display,
{
  /// The channel a routing key resolves to.
  pub fn channel_for(&self, key: &K) -> ChannelRef {
    match self.mappings.get(key) {
      Some(channel) => channel.clone(),
      None => ChannelRef::Named(format!("{}{}{}", self.prefix, key, self.suffix)),
    }
  }
}

impl<P, K, F> MessageHandler for RouterHandler<P, K, F>
where
  P: Any,
  K: Eq + Hash + Display + Send + Sync,
  F: Fn(&P) -> K + Send + Sync,
{
  fn handle(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
    let key = (self.function)(borrow::<P>(stage, &message)?);
    let channel = self.channel_for(&key);
    trace!(stage = %stage, key = %key, channel = %channel, "routing message");
    Ok(HandlerOutcome::Route(RouteDecision {
      message,
      channel,
      default_output: self.default_output.clone(),
      resolution_required: self.resolution_required,
    }))
  }
}

/// One-way terminal consumer.
pub struct ServiceHandler<P, F> {
  function: F,
  _types: PhantomData<fn(P)>,
}

impl<P, F> ServiceHandler<P, F> {
  /// Wraps a consumer function.
  pub fn new(function: F) -> Self
  where
    F: Fn(P),
  {
    Self {
      function,
      _types: PhantomData,
    }
  }
}

impl<P, F> MessageHandler for ServiceHandler<P, F>
where
  P: Any + Send + Sync + Clone,
  F: Fn(P) + Send + Sync,
{
  fn handle(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
    (self.function)(extract::<P>(stage, &message)?);
    Ok(HandlerOutcome::Done)
  }
}

/// Pass-through between two channels.
#[derive(Debug, Default)]
pub struct BridgeHandler;

impl MessageHandler for BridgeHandler {
  fn handle(&self, _stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
    Ok(HandlerOutcome::Reply(message))
  }
}

/// Pass-through that logs every message through `tracing`.
#[derive(Debug)]
pub struct LoggingHandler {
  level: Level,
  category: String,
}

impl LoggingHandler {
  /// Logs at `level`, tagging each event with `category`.
  pub fn new(level: Level, category: impl Into<String>) -> Self {
    Self {
      level,
      category: category.into(),
    }
  }
}

impl MessageHandler for LoggingHandler {
  fn handle(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
    let id = message.id();
    let payload = message.payload().type_name();
    let category = self.category.as_str();
    if self.level == Level::ERROR {
      error!(category, stage = %stage, message_id = %id, payload, "message");
    } else if self.level == Level::WARN {
      warn!(category, stage = %stage, message_id = %id, payload, "message");
    } else if self.level == Level::INFO {
      info!(category, stage = %stage, message_id = %id, payload, "message");
    } else if self.level == Level::DEBUG {
      debug!(category, stage = %stage, message_id = %id, payload, "message");
    } else {
      trace!(category, stage = %stage, message_id = %id, payload, "message");
    }
    Ok(HandlerOutcome::Reply(message))
  }
}
