use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use weaveflow::advice::{Advice, Proceed};
use weaveflow::error::StageInfo;
use weaveflow::handler::HandlerOutcome;
use weaveflow::logging::init_logging;
use weaveflow::prelude::*;

// An order as it arrives on the wire
#[derive(Debug, Clone, Deserialize)]
struct Order {
  id: u32,
  region: String,
  amount: i64,
}

// Service interface fronted by the pricing gateway
struct PricingService;

// Counts every message entering the stage it wraps
struct Counting(Arc<AtomicUsize>);

impl Advice for Counting {
  fn around(
    &self,
    _stage: &StageInfo,
    message: Message,
    proceed: Proceed<'_>,
  ) -> FlowResult<HandlerOutcome> {
    self.0.fetch_add(1, Ordering::SeqCst);
    proceed(message)
  }
}

const CONFIG: &str = r#"{
  "id_prefix": "orders",
  "log_stages": true,
  "default_poller": { "fixed_delay_ms": 5, "max_messages_per_poll": 4 },
  "logging": { "level": "debug", "json": false }
}"#;

fn order_flow(config: FlowConfig) -> FlowResult<Flow> {
  IntegrationFlows::from_channel("orders.raw")
    .with_config(config)
    .compose(|f| {
      f.convert::<Order>()?
        .filter_with::<Order>(|o| o.amount > 0, |filter| {
          filter.discard_channel("orders.invalid").id("positive-amounts");
        })?
        .route::<Order, String>(
          |o| o.region.clone(),
          |router| {
            router
              .prefix("orders.")
              .channel_mapping("apac".to_string(), "orders.asia")
              .default_output_channel("orders.unrouted");
          },
        )?;
      Ok(())
    })
}

#[test]
fn test_order_routing_scenario() {
  let config = FlowConfig::from_json_str(CONFIG).unwrap();
  init_logging(&config.logging);
  let flow = order_flow(config).unwrap();
  assert!(flow.id().starts_with("orders#"));
  assert_eq!(flow.len(), 3);
  assert!(flow.stages().iter().all(|s| s.endpoint().advice_count() == 1));

  let mut channels = ChannelRegistry::new();
  let eu = channels.queue("orders.eu").unwrap();
  let asia = channels.queue("orders.asia").unwrap();
  let unrouted = channels.queue("orders.unrouted").unwrap();
  let invalid = channels.queue("orders.invalid").unwrap();
  let runner = FlowRunner::new(Arc::new(flow), channels).unwrap();

  let wire = [
    r#"{"id": 1, "region": "eu", "amount": 10}"#,
    r#"{"id": 2, "region": "apac", "amount": 20}"#,
    r#"{"id": 3, "region": "mars", "amount": 30}"#,
    r#"{"id": 4, "region": "eu", "amount": -5}"#,
  ];
  for document in wire {
    runner.send(Message::new(document.to_string())).unwrap();
  }

  let ids = |queue: &QueueChannel| -> Vec<u32> {
    queue
      .drain()
      .iter()
      .filter_map(|m| m.payload().downcast_ref::<Order>().map(|o| o.id))
      .collect()
  };
  assert_eq!(ids(&eu), vec![1]);
  assert_eq!(ids(&asia), vec![2]);
  assert_eq!(ids(&unrouted), vec![3]);
  assert_eq!(ids(&invalid), vec![4]);
}

#[test]
fn test_malformed_order_fails_without_partial_delivery() {
  let flow = order_flow(FlowConfig::default()).unwrap();
  let mut channels = ChannelRegistry::new();
  let eu = channels.queue("orders.eu").unwrap();
  let runner = FlowRunner::new(Arc::new(flow), channels).unwrap();

  let err = runner
    .send(Message::new(r#"{"id": "one"}"#.to_string()))
    .unwrap_err();
  assert!(matches!(err, FlowError::Conversion { .. }));
  assert!(eu.try_receive().is_none());
}

#[test]
fn test_duplicate_stage_ids_abort_composition() {
  let err = IntegrationFlows::from_channel("in")
    .compose(|f| {
      f.bridge_with(|spec| {
        spec.id("relay");
      })?
      .bridge_with(|spec| {
        spec.id("relay");
      })?;
      Ok(())
    })
    .unwrap_err();
  assert!(matches!(err, FlowError::DuplicateComponentName(ref name) if name == "relay"));
}

#[tokio::test]
async fn test_pricing_gateway_with_custom_advice() {
  let seen = Arc::new(AtomicUsize::new(0));
  let advice = Counting(seen.clone());
  let flow = IntegrationFlows::from_gateway::<PricingService>(|gateway| {
    gateway
      .bean_name("pricing")
      .default_reply_timeout(Duration::from_millis(500));
  })
  .compose(move |f| {
    f.transform_with::<u32, u64>(
      |cents| u64::from(cents) * 110 / 100,
      |spec| {
        spec.id("add-vat").advice(advice);
      },
    )?;
    Ok(())
  })
  .unwrap();
  let runner = FlowRunner::new(Arc::new(flow), ChannelRegistry::new()).unwrap();

  let reply = runner.request(1000u32).await.unwrap().unwrap();
  assert_eq!(reply.payload().downcast_ref::<u64>(), Some(&1100));
  assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_supplier_flow_runs_until_stopped() {
  let ticks = Arc::new(AtomicUsize::new(0));
  let counter = ticks.clone();
  let config = FlowConfig::default()
    .with_default_poller(PollerSpec::fixed_delay(Duration::from_millis(5)));
  let flow = IntegrationFlows::from_supplier(
    move || counter.fetch_add(1, Ordering::SeqCst),
    |adapter| {
      adapter.id("ticker");
    },
  )
  .with_config(config)
  .compose(|f| {
    f.filter::<usize>(|n| n % 2 == 0)?.channel("even-ticks")?;
    Ok(())
  })
  .unwrap();
  assert!(flow.integration_components().find("ticker").is_some());

  let mut channels = ChannelRegistry::new();
  let evens = channels.queue("even-ticks").unwrap();
  let runner = Arc::new(FlowRunner::new(Arc::new(flow), channels).unwrap());
  runner.start().await.unwrap();

  let first = evens.receive_timeout(Duration::from_secs(1)).await.unwrap();
  let second = evens.receive_timeout(Duration::from_secs(1)).await.unwrap();
  runner.stop().await;

  assert_eq!(first.payload().downcast_ref::<usize>(), Some(&0));
  assert_eq!(second.payload().downcast_ref::<usize>(), Some(&2));
}

#[test]
fn test_runtime_described_stages() {
  let flow = IntegrationFlows::from_channel("dynamic")
    .compose(|f| {
      f.register_converter::<Vec<u32>>()
        .convert_to(Some(TypeDescriptor::of::<Vec<u32>>()))?
        .filter_payload(Some(TypeDescriptor::of::<Vec<u32>>()), |p| {
          p.downcast_ref::<Vec<u32>>().is_some_and(|v| !v.is_empty())
        })?
        .transform_payload(Some(TypeDescriptor::of::<Vec<u32>>()), |p| {
          let sum: u32 = p.downcast_ref::<Vec<u32>>().map(|v| v.iter().sum()).unwrap_or(0);
          Ok(Payload::new(sum))
        })?;
      Ok(())
    })
    .unwrap();
  let runner = FlowRunner::new(Arc::new(flow), ChannelRegistry::new()).unwrap();

  runner.send(Message::new("[1, 2, 3]".to_string())).unwrap();
  runner.send(Message::new(b"[]".to_vec())).unwrap();
  let sums: Vec<u32> = runner
    .output()
    .unwrap()
    .drain()
    .iter()
    .filter_map(|m| m.payload().downcast_ref::<u32>().copied())
    .collect();
  assert_eq!(sums, vec![6]);
}
