//! # Payload Conversion
//!
//! JSON conversion behind the `convert` stage. A [`JsonConverter<T>`]
//! deserializes textual, binary or already-parsed JSON payloads into `T`;
//! payloads that already hold a `T` pass through untouched.
//!
//! Accepted payload types: `String`, `&'static str`, `Vec<u8>`,
//! `serde_json::Value` and `T` itself. Anything else, and any malformed
//! document, fails with [`FlowError::Conversion`].

use crate::error::{BoxError, FlowError, FlowResult, StageInfo, StringError};
use crate::handler::{HandlerOutcome, MessageHandler};
use crate::message::{Message, Payload};
use crate::types::TypeDescriptor;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Converts JSON payloads into `T`.
pub struct JsonConverter<T> {
  _target: PhantomData<fn() -> T>,
}

impl<T> JsonConverter<T> {
  /// Creates a converter into `T`.
  #[must_use]
  pub fn new() -> Self {
    Self {
      _target: PhantomData,
    }
  }
}

impl<T> Default for JsonConverter<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> JsonConverter<T>
where
  T: DeserializeOwned + Any + Send + Sync,
{
  /// Decodes a payload into `T`.
  pub fn convert(&self, payload: &Payload) -> FlowResult<T> {
    let decoded: Result<T, BoxError> = if let Some(text) = payload.downcast_ref::<String>() {
      serde_json::from_str(text).map_err(Into::into)
    } else if let Some(text) = payload.downcast_ref::<&'static str>() {
      serde_json::from_str(text).map_err(Into::into)
    } else if let Some(bytes) = payload.downcast_ref::<Vec<u8>>() {
      serde_json::from_slice(bytes).map_err(Into::into)
    } else if let Some(value) = payload.downcast_ref::<serde_json::Value>() {
      serde::Deserialize::deserialize(value).map_err(Into::into)
    } else {
      Err(Box::new(StringError("unsupported payload type".to_string())))
    };
    decoded.map_err(|source| FlowError::Conversion {
      target: std::any::type_name::<T>(),
      found: payload.type_name(),
      source,
    })
  }
}

impl<T> MessageHandler for JsonConverter<T>
where
  T: DeserializeOwned + Any + Send + Sync,
{
  fn handle(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
    if message.payload().is::<T>() {
      return Ok(HandlerOutcome::Reply(message));
    }
    let value = self.convert(message.payload())?;
    trace!(stage = %stage, target = std::any::type_name::<T>(), "converted payload");
    let mut converted = message.reply_with(Payload::new(value));
    converted.headers_mut().content_type = None;
    Ok(HandlerOutcome::Reply(converted))
  }
}

/// Converters available to descriptor-based `convert_to` stages.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
  converters: HashMap<TypeId, (TypeDescriptor, Arc<dyn MessageHandler>)>,
}

impl ConverterRegistry {
  /// Creates an empty registry.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a JSON converter into `T`, replacing any previous one.
  pub fn register<T>(&mut self) -> &mut Self
  where
    T: DeserializeOwned + Any + Send + Sync,
  {
    let target = TypeDescriptor::of::<T>();
    self
      .converters
      .insert(target.type_id(), (target, Arc::new(JsonConverter::<T>::new())));
    self
  }

  /// The converter for `target`, if one is registered.
  #[must_use]
  pub fn get(&self, target: &TypeDescriptor) -> Option<Arc<dyn MessageHandler>> {
    self
      .converters
      .get(&target.type_id())
      .map(|(_, converter)| converter.clone())
  }

  /// Returns true if a converter into `target` is registered.
  #[must_use]
  pub fn contains(&self, target: &TypeDescriptor) -> bool {
    self.converters.contains_key(&target.type_id())
  }
}

impl fmt::Debug for ConverterRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut targets: Vec<&str> = self.converters.values().map(|(t, _)| t.name()).collect();
    targets.sort_unstable();
    f.debug_struct("ConverterRegistry")
      .field("targets", &targets)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::endpoint::StageKind;
  use serde::Deserialize;

  #[derive(Debug, Clone, PartialEq, Deserialize)]
  struct Order {
    id: u32,
    sku: String,
  }

  fn stage() -> StageInfo {
    StageInfo::new("to-order", StageKind::Convert)
  }

  fn converted(outcome: HandlerOutcome) -> Message {
    match outcome {
      HandlerOutcome::Reply(message) => message,
      _ => panic!("expected a reply"),
    }
  }

  #[test]
  fn test_convert_from_string() {
    let converter = JsonConverter::<Order>::new();
    let message = Message::new(r#"{"id": 7, "sku": "A-1"}"#.to_string())
      .with_content_type("application/json");
    let out = converted(converter.handle(&stage(), message).unwrap());

    assert_eq!(
      out.payload().downcast_ref::<Order>(),
      Some(&Order {
        id: 7,
        sku: "A-1".into()
      })
    );
    assert!(out.headers().content_type.is_none());
  }

  #[test]
  fn test_convert_from_bytes_and_value() {
    let converter = JsonConverter::<Vec<i32>>::new();
    let bytes = converted(converter.handle(&stage(), Message::new(b"[1,2]".to_vec())).unwrap());
    assert_eq!(bytes.payload().downcast_ref::<Vec<i32>>(), Some(&vec![1, 2]));

    let value = converted(
      converter
        .handle(&stage(), Message::new(serde_json::json!([3])))
        .unwrap(),
    );
    assert_eq!(value.payload().downcast_ref::<Vec<i32>>(), Some(&vec![3]));
  }

  #[test]
  fn test_convert_passes_target_type_through() {
    let converter = JsonConverter::<u64>::new();
    let message = Message::new(5u64);
    let id = message.id().clone();
    let out = converted(converter.handle(&stage(), message).unwrap());
    assert_eq!(out.id(), &id);
  }

  #[test]
  fn test_malformed_json_is_a_conversion_error() {
    let converter = JsonConverter::<Order>::new();
    let err = converter
      .handle(&stage(), Message::new("{not json"))
      .err()
      .unwrap();
    assert!(matches!(err, FlowError::Conversion { found: "&str", .. }));
  }

  #[test]
  fn test_unsupported_payload_is_a_conversion_error() {
    let converter = JsonConverter::<Order>::new();
    let err = converter.handle(&stage(), Message::new(3.5f64)).err().unwrap();
    assert!(matches!(err, FlowError::Conversion { .. }));
  }

  #[test]
  fn test_registry_lookup_by_descriptor() {
    let mut registry = ConverterRegistry::new();
    registry.register::<Order>();
    assert!(registry.contains(&TypeDescriptor::of::<Order>()));
    assert!(registry.get(&TypeDescriptor::of::<String>()).is_none());
  }
}
