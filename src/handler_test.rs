use crate::channel::ChannelRef;
use crate::endpoint::StageKind;
use crate::error::{FlowError, FlowResult, StageInfo, StringError};
use crate::handler::{
  BridgeHandler, FilterHandler, HandlerOutcome, LoggingHandler, MessageHandler,
  PayloadFilterHandler, PayloadTransformHandler, RouterHandler, ServiceHandler, SplitHandler,
  TransformHandler,
};
use crate::message::{Message, MessageId, Payload};
use crate::types::TypeDescriptor;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tracing::Level;

fn stage(kind: StageKind) -> StageInfo {
  StageInfo::new("under-test", kind)
}

fn reply(outcome: HandlerOutcome) -> Message {
  match outcome {
    HandlerOutcome::Reply(message) => message,
    _ => panic!("expected a reply"),
  }
}

#[test]
fn test_transform_handler_maps_payload() {
  let handler = TransformHandler::new(|x: i32| Ok::<_, Infallible>(x.to_string()));
  let out = reply(
    handler
      .handle(&stage(StageKind::Transform), Message::new(12))
      .unwrap(),
  );
  assert_eq!(out.payload().downcast_ref::<String>(), Some(&"12".to_string()));
}

#[test]
fn test_transform_handler_rejects_wrong_payload_type() {
  let handler = TransformHandler::new(|x: i32| Ok::<_, Infallible>(x + 1));
  let err = handler
    .handle(&stage(StageKind::Transform), Message::new("twelve"))
    .err()
    .unwrap();
  match err {
    FlowError::PayloadType {
      stage,
      expected,
      found,
    } => {
      assert_eq!(stage.id, "under-test");
      assert_eq!(expected, "i32");
      assert_eq!(found, "&str");
    }
    other => panic!("unexpected error {}", other),
  }
}

#[test]
fn test_transform_handler_wraps_function_errors() {
  let handler = TransformHandler::new(|x: i32| {
    if x < 0 {
      Err(StringError("negative".to_string()))
    } else {
      Ok(x)
    }
  });
  let err = handler
    .handle(&stage(StageKind::Transform), Message::new(-1))
    .err()
    .unwrap();
  assert!(matches!(err, FlowError::Handler { .. }));
  assert_eq!(err.to_string(), "error in transform stage 'under-test': negative");
}

#[test]
fn test_payload_transform_handler_checks_descriptor() {
  let double = |payload: &Payload| -> FlowResult<Payload> {
    let value = payload.downcast_ref::<u8>().copied().unwrap_or_default();
    Ok(Payload::new(u16::from(value) * 2))
  };
  let handler = PayloadTransformHandler::new(TypeDescriptor::of::<u8>(), double);
  let out = reply(
    handler
      .handle(&stage(StageKind::Transform), Message::new(21u8))
      .unwrap(),
  );
  assert_eq!(out.payload().downcast_ref::<u16>(), Some(&42));

  let err = handler
    .handle(&stage(StageKind::Transform), Message::new(21u16))
    .err()
    .unwrap();
  assert!(matches!(err, FlowError::PayloadType { expected: "u8", .. }));
}

#[test]
fn test_filter_handler_accepts_and_drops() {
  let handler = FilterHandler::new(|x: &i32| *x > 0, None, false);
  let accepted = handler
    .handle(&stage(StageKind::Filter), Message::new(3))
    .unwrap();
  assert!(matches!(accepted, HandlerOutcome::Reply(_)));

  let rejected = handler
    .handle(&stage(StageKind::Filter), Message::new(-3))
    .unwrap();
  assert!(matches!(
    rejected,
    HandlerOutcome::Discard { channel: None, .. }
  ));
}

#[test]
fn test_filter_handler_discard_channel() {
  let handler = FilterHandler::new(|x: &i32| *x > 0, Some(ChannelRef::named("negatives")), false);
  match handler
    .handle(&stage(StageKind::Filter), Message::new(-3))
    .unwrap()
  {
    HandlerOutcome::Discard {
      message,
      channel: Some(channel),
    } => {
      assert_eq!(channel.name(), "negatives");
      assert_eq!(message.payload().downcast_ref::<i32>(), Some(&-3));
    }
    _ => panic!("expected a discard to the discard channel"),
  }
}

#[test]
fn test_filter_handler_throws_on_rejection() {
  let handler = FilterHandler::new(|x: &i32| *x > 0, None, true);
  let message = Message::new(-3).with_id(MessageId::new_sequence(5));
  let err = handler
    .handle(&stage(StageKind::Filter), message)
    .err()
    .unwrap();
  assert!(matches!(
    err,
    FlowError::MessageRejected {
      message_id: MessageId::Sequence(5),
      ..
    }
  ));
}

#[test]
fn test_payload_filter_handler() {
  let handler = PayloadFilterHandler::new(
    TypeDescriptor::of::<String>(),
    |payload: &Payload| payload.downcast_ref::<String>().is_some_and(|s| !s.is_empty()),
    None,
    false,
  );
  let kept = handler
    .handle(&stage(StageKind::Filter), Message::new("x".to_string()))
    .unwrap();
  assert!(matches!(kept, HandlerOutcome::Reply(_)));
  let dropped = handler
    .handle(&stage(StageKind::Filter), Message::new(String::new()))
    .unwrap();
  assert!(matches!(dropped, HandlerOutcome::Discard { .. }));
}

#[test]
fn test_split_handler_applies_sequence_headers() {
  let handler = SplitHandler::new(
    |s: String| s.split(',').map(str::to_string).collect::<Vec<_>>(),
    true,
  );
  let input = Message::new("a,b,c".to_string()).with_header("batch", "7");
  let parent = input.id().clone();
  let parts = match handler.handle(&stage(StageKind::Split), input).unwrap() {
    HandlerOutcome::Many(parts) => parts,
    _ => panic!("expected parts"),
  };

  assert_eq!(parts.len(), 3);
  for (index, part) in parts.iter().enumerate() {
    assert_eq!(part.headers().correlation_id.as_ref(), Some(&parent));
    assert_eq!(part.headers().sequence_number, Some(index + 1));
    assert_eq!(part.headers().sequence_size, Some(3));
    assert_eq!(part.headers().get("batch"), Some("7"));
  }
  assert_eq!(parts[1].payload().downcast_ref::<String>(), Some(&"b".to_string()));
}

#[test]
fn test_split_handler_without_sequence() {
  let handler = SplitHandler::new(|n: u32| 0..n, false);
  let parts = match handler
    .handle(&stage(StageKind::Split), Message::new(2u32))
    .unwrap()
  {
    HandlerOutcome::Many(parts) => parts,
    _ => panic!("expected parts"),
  };
  assert_eq!(parts.len(), 2);
  assert!(parts[0].headers().sequence_number.is_none());
}

#[test]
fn test_split_handler_empty_result() {
  let handler = SplitHandler::new(|_: u32| Vec::<u32>::new(), true);
  let outcome = handler
    .handle(&stage(StageKind::Split), Message::new(2u32))
    .unwrap();
  assert!(matches!(outcome, HandlerOutcome::Many(parts) if parts.is_empty()));
}

#[test]
fn test_router_handler_prefers_mapping_then_prefix_suffix() {
  let mut mappings = HashMap::new();
  mappings.insert("even".to_string(), ChannelRef::named("evens"));
  let handler = RouterHandler::new(
    |x: &i32| (if x % 2 == 0 { "even" } else { "odd" }).to_string(),
    mappings,
    None,
    true,
    "numbers.".to_string(),
    ".channel".to_string(),
  );

  assert_eq!(handler.channel_for(&"even".to_string()).name(), "evens");
  assert_eq!(
    handler.channel_for(&"odd".to_string()).name(),
    "numbers.odd.channel"
  );

  match handler
    .handle(&stage(StageKind::Route), Message::new(3))
    .unwrap()
  {
    HandlerOutcome::Route(decision) => {
      assert_eq!(decision.channel.name(), "numbers.odd.channel");
      assert!(decision.resolution_required);
      assert!(decision.default_output.is_none());
    }
    _ => panic!("expected a routing decision"),
  }
}

#[test]
fn test_service_handler_consumes() {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink = seen.clone();
  let handler = ServiceHandler::new(move |s: String| sink.lock().unwrap().push(s));
  let outcome = handler
    .handle(&stage(StageKind::Handle), Message::new("done".to_string()))
    .unwrap();
  assert!(matches!(outcome, HandlerOutcome::Done));
  assert_eq!(*seen.lock().unwrap(), vec!["done".to_string()]);
}

#[test]
fn test_bridge_and_logging_pass_messages_through() {
  let message = Message::new(1u8).with_id(MessageId::new_sequence(3));
  let bridged = reply(
    BridgeHandler
      .handle(&stage(StageKind::Bridge), message)
      .unwrap(),
  );
  assert_eq!(bridged.id(), &MessageId::Sequence(3));

  let logger = LoggingHandler::new(Level::WARN, "audit");
  let logged = reply(logger.handle(&stage(StageKind::Log), bridged).unwrap());
  assert_eq!(logged.id(), &MessageId::Sequence(3));
}
