//! # In-process Runner
//!
//! Drives a [`Flow`] inside the current process. Messages are dispatched
//! synchronously from the flow's input channel through every stage, each
//! stage running its advice chain around its handler:
//!
//! - a reply continues to the stage's output channel
//! - a discard goes to the discard channel, or nowhere
//! - split parts each continue to the output channel
//! - a routed message goes to the channel the router chose
//!
//! Delivery to a channel consumed by a stage of the same flow invokes that
//! stage; any other channel is looked up in the [`ChannelRegistry`]. A message
//! reaching the flow's anonymous output channel with a reply channel header is
//! delivered to the reply channel instead.
//!
//! Polling, publisher and producer sources are pumped by background tokio
//! tasks between [`FlowRunner::start`] and [`FlowRunner::stop`].
//!
//! ```rust
//! use std::sync::Arc;
//! use weaveflow::channel::ChannelRegistry;
//! use weaveflow::flows::IntegrationFlows;
//! use weaveflow::message::Message;
//! use weaveflow::runner::FlowRunner;
//!
//! let flow = IntegrationFlows::from_channel("numbers")
//!     .compose(|f| {
//!         f.transform::<i32, i32>(|x| x + 1)?;
//!         Ok(())
//!     })
//!     .unwrap();
//! let runner = FlowRunner::new(Arc::new(flow), ChannelRegistry::new()).unwrap();
//! runner.send(Message::new(41)).unwrap();
//!
//! let out = runner.output().unwrap().try_receive().unwrap();
//! assert_eq!(out.payload().downcast_ref::<i32>(), Some(&42));
//! ```

use crate::channel::{ChannelRef, ChannelRegistry, MessageChannel, QueueChannel};
use crate::error::{FlowError, FlowResult};
use crate::flow::{Flow, FlowStage};
use crate::handler::{HandlerOutcome, RouteDecision};
use crate::message::{Message, Payload};
use crate::source::FlowSource;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Reply timeout for requests to flows without a gateway source.
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs a flow against a channel registry.
pub struct FlowRunner {
  flow: Arc<Flow>,
  channels: ChannelRegistry,
  consumers: HashMap<String, Vec<usize>>,
  output: Option<Arc<QueueChannel>>,
  requests: AtomicUsize,
  running: AtomicBool,
  cancel: CancellationToken,
  tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FlowRunner {
  /// Prepares `flow` for dispatch.
  ///
  /// When the flow's output channel is neither consumed by one of its own
  /// stages nor registered in `channels`, a [`QueueChannel`] is registered
  /// for it and exposed through [`output`](Self::output).
  pub fn new(flow: Arc<Flow>, mut channels: ChannelRegistry) -> FlowResult<Self> {
    let mut consumers: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, stage) in flow.stages().iter().enumerate() {
      consumers
        .entry(stage.input().name().to_string())
        .or_default()
        .push(index);
    }

    let output = match flow.output_channel() {
      Some(ChannelRef::Instance(_)) | None => None,
      Some(channel)
        if consumers.contains_key(channel.name()) || channels.contains(channel.name()) =>
      {
        None
      }
      Some(channel) => Some(channels.queue(channel.name())?),
    };

    Ok(Self {
      flow,
      channels,
      consumers,
      output,
      requests: AtomicUsize::new(0),
      running: AtomicBool::new(false),
      cancel: CancellationToken::new(),
      tasks: Mutex::new(Vec::new()),
    })
  }

  /// The flow being run.
  #[must_use]
  pub fn flow(&self) -> &Arc<Flow> {
    &self.flow
  }

  /// The queue created for the flow's output channel, if any.
  #[must_use]
  pub fn output(&self) -> Option<&Arc<QueueChannel>> {
    self.output.as_ref()
  }

  /// The channels the runner resolves against.
  #[must_use]
  pub fn channels(&self) -> &ChannelRegistry {
    &self.channels
  }

  /// Dispatches a message from the flow's input channel.
  pub fn send(&self, message: Message) -> FlowResult<()> {
    self.dispatch(self.flow.input_channel().clone(), message)
  }

  /// Dispatches a message from any channel of the flow.
  pub fn dispatch(&self, channel: ChannelRef, message: Message) -> FlowResult<()> {
    let mut pending = VecDeque::from([(channel, message)]);
    while let Some((channel, message)) = pending.pop_front() {
      match self.consumers.get(channel.name()) {
        Some(indices) => {
          for &index in indices {
            let stage = &self.flow.stages()[index];
            let outcome = stage.endpoint().invoke(message.clone())?;
            self.forward(stage, outcome, &mut pending)?;
          }
        }
        None => self.deliver(&channel, message)?,
      }
    }
    Ok(())
  }

  fn forward(
    &self,
    stage: &FlowStage,
    outcome: HandlerOutcome,
    pending: &mut VecDeque<(ChannelRef, Message)>,
  ) -> FlowResult<()> {
    let output = stage.endpoint().output_channel();
    match outcome {
      HandlerOutcome::Reply(message) => emit(stage, output, message, pending),
      HandlerOutcome::Many(messages) => {
        for message in messages {
          emit(stage, output, message, pending);
        }
      }
      HandlerOutcome::Discard { message, channel } => {
        if let Some(channel) = channel {
          pending.push_back((channel, message));
        }
      }
      HandlerOutcome::Route(decision) => {
        let RouteDecision {
          message,
          channel,
          default_output,
          resolution_required,
        } = decision;
        if self.is_resolvable(&channel) {
          pending.push_back((channel, message));
        } else if let Some(default) = default_output {
          pending.push_back((default, message));
        } else if !resolution_required {
          emit(stage, output, message, pending);
        } else {
          return Err(FlowError::DestinationResolution(channel.name().to_string()));
        }
      }
      HandlerOutcome::Done => {}
    }
    Ok(())
  }

  fn is_resolvable(&self, channel: &ChannelRef) -> bool {
    self.consumers.contains_key(channel.name()) || self.channels.resolve(channel).is_some()
  }

  /// Hands a message to a channel outside the flow.
  fn deliver(&self, channel: &ChannelRef, message: Message) -> FlowResult<()> {
    let is_output = self.flow.output_channel() == Some(channel);
    if is_output && channel.is_anonymous() {
      if let Some(reply) = message.headers().reply_channel.clone() {
        return self.resolve(&reply)?.send(message);
      }
    }
    self.resolve(channel)?.send(message)
  }

  fn resolve(&self, channel: &ChannelRef) -> FlowResult<Arc<dyn MessageChannel>> {
    self
      .channels
      .resolve(channel)
      .ok_or_else(|| FlowError::DestinationResolution(channel.name().to_string()))
  }

  /// Sends `payload` and waits for the reply, gateway style.
  ///
  /// The reply arrives only when the flow ends on its anonymous output
  /// channel. Returns `Ok(None)` when no reply arrives within the gateway's
  /// reply timeout. For gateway flows with an error channel, a failed
  /// dispatch sends the [`FlowError`] there and also yields `Ok(None)`.
  pub async fn request<T: Any + Send + Sync>(&self, payload: T) -> FlowResult<Option<Message>> {
    let (timeout, error_channel) = match self.flow.source() {
      FlowSource::Gateway { spec, .. } => {
        (spec.reply_timeout(), spec.configured_error_channel().cloned())
      }
      _ => (DEFAULT_REPLY_TIMEOUT, None),
    };
    let sequence = self.requests.fetch_add(1, Ordering::Relaxed);
    let reply = Arc::new(QueueChannel::new(format!(
      "{}.reply#{}",
      self.flow.id(),
      sequence
    )));
    let message = Message::new(payload).with_reply_channel(reply.clone());

    if let Err(error) = self.send(message) {
      let Some(channel) = error_channel else {
        return Err(error);
      };
      warn!(flow = %self.flow.id(), error = %error, "request failed; sending error to error channel");
      self
        .resolve(&channel)?
        .send(Message::from_payload(Payload::new(error)))?;
      return Ok(None);
    }
    Ok(reply.receive_timeout(timeout).await)
  }

  /// Starts pumping the flow's source in the background.
  ///
  /// Channel and gateway sources have nothing to pump; they are driven by
  /// [`send`](Self::send) and [`request`](Self::request). A runner can be
  /// started once.
  pub async fn start(self: &Arc<Self>) -> FlowResult<()> {
    if self.cancel.is_cancelled() {
      return Err(FlowError::Lifecycle(format!(
        "flow '{}' was stopped and cannot be restarted",
        self.flow.id()
      )));
    }
    if self.running.swap(true, Ordering::SeqCst) {
      return Err(FlowError::Lifecycle(format!(
        "flow '{}' is already running",
        self.flow.id()
      )));
    }
    let handle = match self.flow.source() {
      FlowSource::Polling { source, .. } => {
        let source = source.clone();
        let runner = self.clone();
        let poller = self.flow.poller().clone();
        Some(tokio::spawn(async move {
          loop {
            for _ in 0..poller.max_messages_per_poll {
              let Some(message) = source.receive() else {
                break;
              };
              runner.dispatch_logged(message);
            }
            tokio::select! {
              _ = runner.cancel.cancelled() => break,
              _ = tokio::time::sleep(poller.fixed_delay) => {}
            }
          }
        }))
      }
      FlowSource::Publisher(_) => match self.flow.source().take_publisher() {
        Some(stream) => Some(self.spawn_drain(stream)),
        None => {
          self.running.store(false, Ordering::SeqCst);
          return Err(FlowError::Lifecycle(format!(
            "the publisher of flow '{}' was already consumed",
            self.flow.id()
          )));
        }
      },
      FlowSource::Producer(producer) => Some(self.spawn_drain(producer.subscribe())),
      _ => None,
    };
    if let Some(handle) = handle {
      self.tasks.lock().await.push(handle);
    }
    info!(flow = %self.flow.id(), source = %self.flow.source().describe(), "flow started");
    Ok(())
  }

  fn spawn_drain(self: &Arc<Self>, mut stream: BoxStream<'static, Message>) -> JoinHandle<()> {
    let runner = self.clone();
    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = runner.cancel.cancelled() => break,
          next = stream.next() => match next {
            Some(message) => runner.dispatch_logged(message),
            None => {
              debug!(flow = %runner.flow.id(), "source stream completed");
              break;
            }
          },
        }
      }
    })
  }

  fn dispatch_logged(&self, message: Message) {
    let id = message.id().clone();
    if let Err(e) = self.send(message) {
      error!(flow = %self.flow.id(), message_id = %id, error = %e, "dispatch failed");
    }
  }

  /// Stops the background pumps and waits for them to finish.
  pub async fn stop(&self) {
    self.cancel.cancel();
    let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
    for handle in handles {
      if let Err(e) = handle.await {
        warn!(flow = %self.flow.id(), error = %e, "source task ended abnormally");
      }
    }
    self.running.store(false, Ordering::SeqCst);
    info!(flow = %self.flow.id(), "flow stopped");
  }

  /// Returns true between `start` and `stop`.
  #[must_use]
  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }
}

fn emit(
  stage: &FlowStage,
  output: Option<&ChannelRef>,
  message: Message,
  pending: &mut VecDeque<(ChannelRef, Message)>,
) {
  match output {
    Some(channel) => pending.push_back((channel.clone(), message)),
    None => trace!(stage = %stage.endpoint().info(), "stage has no output; message dropped"),
  }
}
