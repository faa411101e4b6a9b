//! # Flow
//!
//! The finalized, immutable result of composition: the source, the ordered
//! (input channel, endpoint) pairs, the registered components, and the flow's
//! input and output channels. A `Flow` is `Send + Sync` and is shared across
//! runtime tasks through an `Arc`.

use crate::channel::ChannelRef;
use crate::definition::{ComponentId, ComponentRegistry};
use crate::endpoint::{Endpoint, PollerSpec};
use crate::source::FlowSource;
use std::fmt;
use std::sync::Arc;

/// One stage of a flow: the channel it consumes and its endpoint.
#[derive(Debug, Clone)]
pub struct FlowStage {
  input: ChannelRef,
  endpoint: Arc<Endpoint>,
}

impl FlowStage {
  pub(crate) fn new(input: ChannelRef, endpoint: Endpoint) -> Self {
    Self {
      input,
      endpoint: Arc::new(endpoint),
    }
  }

  /// The channel the stage consumes.
  #[must_use]
  pub fn input(&self) -> &ChannelRef {
    &self.input
  }

  /// The stage's endpoint.
  #[must_use]
  pub fn endpoint(&self) -> &Arc<Endpoint> {
    &self.endpoint
  }
}

/// A finalized flow.
pub struct Flow {
  id: String,
  source: FlowSource,
  input_channel: ChannelRef,
  output_channel: Option<ChannelRef>,
  stages: Vec<FlowStage>,
  components: ComponentRegistry,
  poller: PollerSpec,
}

impl Flow {
  pub(crate) fn new(
    id: String,
    source: FlowSource,
    input_channel: ChannelRef,
    output_channel: Option<ChannelRef>,
    stages: Vec<FlowStage>,
    components: ComponentRegistry,
    poller: PollerSpec,
  ) -> Self {
    Self {
      id,
      source,
      input_channel,
      output_channel,
      stages,
      components,
      poller,
    }
  }

  /// The flow id.
  #[must_use]
  pub fn id(&self) -> &str {
    &self.id
  }

  /// Where the flow's messages come from.
  #[must_use]
  pub fn source(&self) -> &FlowSource {
    &self.source
  }

  /// The channel the first stage consumes: the source channel, or the
  /// channel a non-channel source emits into.
  #[must_use]
  pub fn input_channel(&self) -> &ChannelRef {
    &self.input_channel
  }

  /// The channel the last stage emits into, if the flow has one.
  #[must_use]
  pub fn output_channel(&self) -> Option<&ChannelRef> {
    self.output_channel.as_ref()
  }

  /// Stages in composition order.
  #[must_use]
  pub fn stages(&self) -> &[FlowStage] {
    &self.stages
  }

  /// Looks a stage up by endpoint id.
  #[must_use]
  pub fn stage(&self, id: &str) -> Option<&FlowStage> {
    self.stages.iter().find(|stage| stage.endpoint.id() == id)
  }

  /// Every component registered during composition.
  #[must_use]
  pub fn integration_components(&self) -> &ComponentRegistry {
    &self.components
  }

  /// The name a component was registered under.
  #[must_use]
  pub fn component_name(&self, id: ComponentId) -> Option<&str> {
    self.components.name(id)
  }

  /// The poller driving a polling source.
  #[must_use]
  pub fn poller(&self) -> &PollerSpec {
    &self.poller
  }

  /// Number of stages.
  #[must_use]
  pub fn len(&self) -> usize {
    self.stages.len()
  }

  /// Returns true if the flow has no stages.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.stages.is_empty()
  }
}

impl fmt::Debug for Flow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Flow")
      .field("id", &self.id)
      .field("source", &self.source)
      .field("input_channel", &self.input_channel)
      .field("output_channel", &self.output_channel)
      .field("stages", &self.stages)
      .field("components", &self.components.len())
      .finish()
  }
}
