use crate::channel::{ChannelRef, QueueChannel};
use crate::message::{Message, MessageHeaders, MessageId, Payload};
use std::collections::HashSet;
use std::sync::Arc;

#[test]
fn test_message_id_new_uuid() {
  let id1 = MessageId::new_uuid();
  let id2 = MessageId::new_uuid();

  assert!(id1.is_uuid());
  assert!(id2.is_uuid());
  assert_ne!(id1, id2, "UUIDs should be unique");
}

#[test]
fn test_message_id_uuid_is_version_4() {
  let id = MessageId::new_uuid().to_string();
  let groups: Vec<&str> = id.split('-').collect();

  assert_eq!(groups.len(), 5);
  assert!(groups[2].starts_with('4'), "version nibble in {}", id);
  assert!(
    matches!(groups[3].chars().next(), Some('8' | '9' | 'a' | 'b')),
    "variant bits in {}",
    id
  );
}

#[test]
fn test_message_id_display() {
  assert_eq!(MessageId::new_sequence(42).to_string(), "seq:42");
  assert_eq!(MessageId::new_custom("order-7").to_string(), "custom:order-7");
}

#[test]
fn test_message_id_hash_distinguishes_variants() {
  let mut ids = HashSet::new();
  ids.insert(MessageId::new_sequence(1));
  ids.insert(MessageId::new_custom("1"));
  ids.insert(MessageId::new_sequence(1));
  assert_eq!(ids.len(), 2);
}

#[test]
fn test_payload_records_type_name() {
  let payload = Payload::new(vec![1u8, 2, 3]);
  assert_eq!(payload.type_name(), "alloc::vec::Vec<u8>");
  assert!(payload.is::<Vec<u8>>());
  assert!(!payload.is::<Vec<i8>>());
  assert_eq!(format!("{:?}", payload), "Payload<alloc::vec::Vec<u8>>");
}

#[test]
fn test_payload_clone_shares_value() {
  let payload = Payload::new(String::from("shared"));
  let copy = payload.clone();
  let a = payload.downcast::<String>().unwrap();
  let b = copy.downcast::<String>().unwrap();
  assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_payload_extract_unique_and_shared() {
  let unique = Payload::new(String::from("only"));
  assert_eq!(unique.extract::<String>(), Some("only".to_string()));

  let shared = Payload::new(5u32);
  let _keep = shared.clone();
  assert_eq!(shared.extract::<u32>(), Some(5));
}

#[test]
fn test_payload_extract_wrong_type() {
  let payload = Payload::new(5u32);
  assert_eq!(payload.extract::<i64>(), None);
}

#[test]
fn test_headers_set_replaces() {
  let mut headers = MessageHeaders::default();
  headers.set("region", "eu");
  headers.set("region", "us");
  assert_eq!(headers.get("region"), Some("us"));
  assert_eq!(headers.custom.len(), 1);
  assert_eq!(headers.get("missing"), None);
}

#[test]
fn test_message_builders() {
  let reply = Arc::new(QueueChannel::new("replies"));
  let msg = Message::new(1i32)
    .with_id(MessageId::new_sequence(9))
    .with_content_type("application/json")
    .with_reply_channel(reply)
    .with_header("origin", "test");

  assert_eq!(msg.id(), &MessageId::Sequence(9));
  assert_eq!(msg.headers().content_type.as_deref(), Some("application/json"));
  assert_eq!(
    msg.headers().reply_channel,
    Some(ChannelRef::named("replies"))
  );
  assert_eq!(msg.headers().get("origin"), Some("test"));
}

#[test]
fn test_reply_with_keeps_headers_and_renews_id() {
  let msg = Message::new("in")
    .with_id(MessageId::new_sequence(1))
    .with_header("trace", "abc");
  let reply = msg.reply_with(Payload::new(2u8));

  assert_ne!(reply.id(), msg.id());
  assert_eq!(reply.headers().get("trace"), Some("abc"));
  assert!(reply.headers().timestamp >= msg.headers().timestamp);
  assert_eq!(reply.payload().downcast_ref::<u8>(), Some(&2));
}

#[test]
fn test_into_payload() {
  let payload = Message::new(3.5f64).into_payload();
  assert_eq!(payload.downcast_ref::<f64>(), Some(&3.5));
}
