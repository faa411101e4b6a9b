//! # Flow Definition
//!
//! [`FlowDefinition`] is the mutable builder a composition callback works
//! on. It accumulates stages in order, keeps the component registry, and
//! tracks the cursor: the channel or component the next stage attaches to.
//!
//! ## Cursor
//!
//! After every stage factory call exactly one of the current channel and the
//! current component is set:
//!
//! - a stage configured with an explicit output channel leaves the cursor on
//!   that channel
//! - any other stage leaves the cursor on itself and raises the
//!   implicit-channel flag: its output is wired lazily, to an anonymous
//!   channel named `<flow-id>.channel#<n>`, when the next stage is appended or
//!   when the flow is finalized
//!
//! ## Mutation
//!
//! Factories mutate the definition in place and return `&mut Self` for
//! chaining. A definition is composed by one caller at a time; it has no
//! internal locking. Every factory validates names and the cursor before it
//! mutates anything, so a failed call leaves the definition unchanged.
//!
//! ## Example
//!
//! ```rust
//! use weaveflow::flows::IntegrationFlows;
//!
//! let flow = IntegrationFlows::from_channel("numbers")
//!     .compose(|f| {
//!         f.filter::<i32>(|x| *x > 0)?
//!             .transform::<i32, i32>(|x| x * 2)?;
//!         Ok(())
//!     })
//!     .unwrap();
//! assert_eq!(flow.len(), 2);
//! ```

use crate::advice::TracingAdvice;
use crate::channel::ChannelRef;
use crate::config::FlowConfig;
use crate::convert::{ConverterRegistry, JsonConverter};
use crate::endpoint::{
  Endpoint, EndpointSpec, FilterEndpointSpec, GenericEndpointSpec, RouterSpec, SplitterEndpointSpec,
  StageKind,
};
use crate::error::{BoxError, FlowError, FlowResult, StageInfo};
use crate::flow::{Flow, FlowStage};
use crate::handler::{
  BridgeHandler, FilterHandler, LoggingHandler, MessageHandler, PayloadFilterHandler,
  PayloadTransformHandler, RouterHandler, ServiceHandler, SplitHandler, TransformHandler,
};
use crate::message::Payload;
use crate::source::FlowSource;
use crate::types::TypeDescriptor;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::{self, Display};
use std::hash::Hash;
use std::sync::Arc;
use tracing::{Level, debug, trace};

/// Handle to a component registered in a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(usize);

impl ComponentId {
  /// Registration order of the component, starting at zero.
  #[must_use]
  pub fn index(&self) -> usize {
    self.0
  }
}

impl Display for ComponentId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "component#{}", self.0)
  }
}

/// Something registered in a flow.
#[derive(Clone)]
pub enum FlowComponent {
  /// A channel.
  Channel(ChannelRef),
  /// The stage at this index.
  Endpoint(usize),
  /// The flow's source adapter.
  Source(String),
  /// An arbitrary object contributed by the caller.
  Bean(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for FlowComponent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FlowComponent::Channel(channel) => write!(f, "Channel({})", channel),
      FlowComponent::Endpoint(index) => write!(f, "Endpoint({})", index),
      FlowComponent::Source(description) => write!(f, "Source({})", description),
      FlowComponent::Bean(_) => write!(f, "Bean"),
    }
  }
}

/// Components of a flow with their optional names.
///
/// Names are unique: registering a taken name fails with
/// [`FlowError::DuplicateComponentName`] and never replaces the holder.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
  components: Vec<(FlowComponent, Option<String>)>,
  names: HashMap<String, ComponentId>,
}

impl ComponentRegistry {
  /// Registers a component under an optional name.
  pub fn add(&mut self, component: FlowComponent, name: Option<&str>) -> FlowResult<ComponentId> {
    if let Some(name) = name {
      if self.names.contains_key(name) {
        return Err(FlowError::DuplicateComponentName(name.to_string()));
      }
    }
    let id = ComponentId(self.components.len());
    if let Some(name) = name {
      self.names.insert(name.to_string(), id);
    }
    self.components.push((component, name.map(str::to_string)));
    Ok(id)
  }

  /// Registers a batch of components, all or none.
  pub fn add_all(
    &mut self,
    batch: Vec<(FlowComponent, Option<String>)>,
  ) -> FlowResult<Vec<ComponentId>> {
    let mut seen = std::collections::HashSet::new();
    for name in batch.iter().filter_map(|(_, name)| name.as_deref()) {
      if self.names.contains_key(name) || !seen.insert(name) {
        return Err(FlowError::DuplicateComponentName(name.to_string()));
      }
    }
    batch
      .into_iter()
      .map(|(component, name)| self.add(component, name.as_deref()))
      .collect()
  }

  /// The component registered under `id`.
  #[must_use]
  pub fn get(&self, id: ComponentId) -> Option<&FlowComponent> {
    self.components.get(id.0).map(|(component, _)| component)
  }

  /// The name of the component registered under `id`.
  #[must_use]
  pub fn name(&self, id: ComponentId) -> Option<&str> {
    self.components.get(id.0).and_then(|(_, name)| name.as_deref())
  }

  /// Looks a component up by name.
  #[must_use]
  pub fn find(&self, name: &str) -> Option<ComponentId> {
    self.names.get(name).copied()
  }

  /// Returns true if `name` is taken.
  #[must_use]
  pub fn contains_name(&self, name: &str) -> bool {
    self.names.contains_key(name)
  }

  /// Number of registered components.
  #[must_use]
  pub fn len(&self) -> usize {
    self.components.len()
  }

  /// Returns true if nothing is registered.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.components.is_empty()
  }

  /// Components in registration order.
  pub fn iter(&self) -> impl Iterator<Item = (ComponentId, &FlowComponent, Option<&str>)> {
    self
      .components
      .iter()
      .enumerate()
      .map(|(index, (component, name))| (ComponentId(index), component, name.as_deref()))
  }

  fn channel_named(&self, name: &str) -> Option<&ChannelRef> {
    match self.find(name).and_then(|id| self.get(id)) {
      Some(FlowComponent::Channel(channel)) => Some(channel),
      _ => None,
    }
  }
}

/// The attachment point for the next stage.
#[derive(Debug, Clone)]
pub enum Cursor {
  /// The next stage consumes from this channel.
  Channel(ChannelRef),
  /// The next stage consumes the output of this component.
  Component(ComponentId),
  /// Nothing to attach to; only reachable through the raw setters.
  Empty,
}

pub(crate) struct PendingStage {
  input: ChannelRef,
  endpoint: Endpoint,
}

/// The mutable definition of a flow under composition.
pub struct FlowDefinition {
  id: String,
  config: FlowConfig,
  source: FlowSource,
  source_component: ComponentId,
  source_output: Option<ChannelRef>,
  stages: Vec<PendingStage>,
  components: ComponentRegistry,
  cursor: Cursor,
  implicit_channel: bool,
  anonymous_channels: usize,
  converters: ConverterRegistry,
}

impl FlowDefinition {
  /// Starts a definition bound to `source`.
  ///
  /// The source is registered as the first component. Channel sources put
  /// the cursor on their channel; every other source puts it on itself.
  pub fn new(id: impl Into<String>, source: FlowSource, config: FlowConfig) -> FlowResult<Self> {
    let id = id.into();
    let mut components = ComponentRegistry::default();
    let (source_component, cursor) = match source.channel_ref() {
      Some(channel) => {
        let name = channel.name().to_string();
        let component = components.add(FlowComponent::Channel(channel.clone()), Some(&name))?;
        (component, Cursor::Channel(channel))
      }
      None => {
        let component =
          components.add(FlowComponent::Source(source.describe()), source.component_name())?;
        (component, Cursor::Component(component))
      }
    };
    debug!(flow = %id, source = %source.describe(), "composing flow");
    Ok(Self {
      id,
      config,
      source,
      source_component,
      source_output: None,
      stages: Vec::new(),
      components,
      cursor,
      implicit_channel: false,
      anonymous_channels: 0,
      converters: ConverterRegistry::default(),
    })
  }

  /// The flow id.
  #[must_use]
  pub fn id(&self) -> &str {
    &self.id
  }

  /// Number of stages appended so far.
  #[must_use]
  pub fn len(&self) -> usize {
    self.stages.len()
  }

  /// Returns true if no stage has been appended.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.stages.is_empty()
  }

  /// The stage registered under `id`.
  #[must_use]
  pub fn endpoint(&self, id: ComponentId) -> Option<&Endpoint> {
    match self.components.get(id)? {
      FlowComponent::Endpoint(index) => self.stages.get(*index).map(|stage| &stage.endpoint),
      _ => None,
    }
  }

  // Cursor primitives

  /// Registers a component under an optional name.
  pub fn add_component(
    &mut self,
    component: FlowComponent,
    name: Option<&str>,
  ) -> FlowResult<ComponentId> {
    self.check_component(&component)?;
    self.components.add(component, name)
  }

  /// Registers a batch of components; on failure nothing is registered.
  pub fn add_components<I, S>(&mut self, batch: I) -> FlowResult<Vec<ComponentId>>
  where
    I: IntoIterator<Item = (FlowComponent, Option<S>)>,
    S: Into<String>,
  {
    let batch: Vec<(FlowComponent, Option<String>)> = batch
      .into_iter()
      .map(|(component, name)| (component, name.map(Into::into)))
      .collect();
    for (component, _) in &batch {
      self.check_component(component)?;
    }
    self.components.add_all(batch)
  }

  /// Every component registered so far.
  #[must_use]
  pub fn integration_components(&self) -> &ComponentRegistry {
    &self.components
  }

  /// The current channel, if the cursor is on a channel.
  #[must_use]
  pub fn current_message_channel(&self) -> Option<&ChannelRef> {
    match &self.cursor {
      Cursor::Channel(channel) => Some(channel),
      _ => None,
    }
  }

  /// Moves the cursor to `channel`; `None` clears a channel cursor.
  pub fn set_current_message_channel(&mut self, channel: Option<ChannelRef>) {
    match channel {
      Some(channel) => self.cursor = Cursor::Channel(channel),
      None if matches!(self.cursor, Cursor::Channel(_)) => self.cursor = Cursor::Empty,
      None => {}
    }
  }

  /// The current component, if the cursor is on a component.
  #[must_use]
  pub fn current_component(&self) -> Option<ComponentId> {
    match self.cursor {
      Cursor::Component(id) => Some(id),
      _ => None,
    }
  }

  /// Moves the cursor to a registered component; `None` clears a component
  /// cursor.
  pub fn set_current_component(&mut self, component: Option<ComponentId>) -> FlowResult<()> {
    match component {
      Some(id) if self.components.get(id).is_none() => {
        return Err(FlowError::InvalidCursor(format!("{} is not registered", id)));
      }
      Some(id) => self.cursor = Cursor::Component(id),
      None if matches!(self.cursor, Cursor::Component(_)) => self.cursor = Cursor::Empty,
      None => {}
    }
    Ok(())
  }

  /// The cursor itself.
  #[must_use]
  pub fn cursor(&self) -> &Cursor {
    &self.cursor
  }

  /// Returns true while the current component's output awaits an anonymous
  /// channel.
  #[must_use]
  pub fn is_implicit_channel(&self) -> bool {
    self.implicit_channel
  }

  /// Sets the implicit-channel flag.
  pub fn set_implicit_channel(&mut self, implicit: bool) {
    self.implicit_channel = implicit;
  }

  /// Registers a JSON converter into `T` for [`convert_to`](Self::convert_to).
  pub fn register_converter<T>(&mut self) -> &mut Self
  where
    T: DeserializeOwned + Any + Send + Sync,
  {
    self.converters.register::<T>();
    self
  }

  // Stage factories

  /// Appends a 1-in/1-out transformation of `P` payloads into `T`.
  pub fn transform<P, T>(
    &mut self,
    function: impl Fn(P) -> T + Send + Sync + 'static,
  ) -> FlowResult<&mut Self>
  where
    P: Any + Send + Sync + Clone,
    T: Any + Send + Sync,
  {
    self.transform_with::<P, T>(function, |_| {})
  }

  /// [`transform`](Self::transform) with endpoint options.
  pub fn transform_with<P, T>(
    &mut self,
    function: impl Fn(P) -> T + Send + Sync + 'static,
    configure: impl FnOnce(&mut GenericEndpointSpec),
  ) -> FlowResult<&mut Self>
  where
    P: Any + Send + Sync + Clone,
    T: Any + Send + Sync,
  {
    let handler = TransformHandler::new(move |input: P| Ok::<T, Infallible>(function(input)));
    self.append(
      StageKind::Transform,
      TypeDescriptor::of::<P>(),
      Arc::new(handler),
      configured(configure),
    )
  }

  /// Appends a transformation that may fail; its error fails dispatch as
  /// [`FlowError::Handler`].
  pub fn try_transform<P, T, E>(
    &mut self,
    function: impl Fn(P) -> Result<T, E> + Send + Sync + 'static,
  ) -> FlowResult<&mut Self>
  where
    P: Any + Send + Sync + Clone,
    T: Any + Send + Sync,
    E: Into<BoxError> + 'static,
  {
    self.try_transform_with::<P, T, E>(function, |_| {})
  }

  /// [`try_transform`](Self::try_transform) with endpoint options.
  pub fn try_transform_with<P, T, E>(
    &mut self,
    function: impl Fn(P) -> Result<T, E> + Send + Sync + 'static,
    configure: impl FnOnce(&mut GenericEndpointSpec),
  ) -> FlowResult<&mut Self>
  where
    P: Any + Send + Sync + Clone,
    T: Any + Send + Sync,
    E: Into<BoxError> + 'static,
  {
    self.append(
      StageKind::Transform,
      TypeDescriptor::of::<P>(),
      Arc::new(TransformHandler::new(function)),
      configured(configure),
    )
  }

  /// Appends a transformation over raw payloads of a runtime-described type.
  pub fn transform_payload(
    &mut self,
    input: Option<TypeDescriptor>,
    function: impl Fn(&Payload) -> FlowResult<Payload> + Send + Sync + 'static,
  ) -> FlowResult<&mut Self> {
    let input = require_type(StageKind::Transform, input)?;
    self.append(
      StageKind::Transform,
      input,
      Arc::new(PayloadTransformHandler::new(input, function)),
      EndpointSpec::default(),
    )
  }

  /// Appends a predicate over `P` payloads; rejected messages are dropped.
  pub fn filter<P>(
    &mut self,
    predicate: impl Fn(&P) -> bool + Send + Sync + 'static,
  ) -> FlowResult<&mut Self>
  where
    P: Any + Send + Sync,
  {
    self.filter_with::<P>(predicate, |_| {})
  }

  /// [`filter`](Self::filter) with filter options.
  pub fn filter_with<P>(
    &mut self,
    predicate: impl Fn(&P) -> bool + Send + Sync + 'static,
    configure: impl FnOnce(&mut FilterEndpointSpec),
  ) -> FlowResult<&mut Self>
  where
    P: Any + Send + Sync,
  {
    let spec = configured(configure);
    let handler = FilterHandler::<P, _>::new(
      predicate,
      spec.discard_channel.clone(),
      spec.throw_exception_on_rejection,
    );
    self.append(
      StageKind::Filter,
      TypeDescriptor::of::<P>(),
      Arc::new(handler),
      spec.endpoint,
    )
  }

  /// Appends a predicate over raw payloads of a runtime-described type.
  pub fn filter_payload(
    &mut self,
    input: Option<TypeDescriptor>,
    predicate: impl Fn(&Payload) -> bool + Send + Sync + 'static,
  ) -> FlowResult<&mut Self> {
    let input = require_type(StageKind::Filter, input)?;
    self.append(
      StageKind::Filter,
      input,
      Arc::new(PayloadFilterHandler::new(input, predicate, None, false)),
      EndpointSpec::default(),
    )
  }

  /// Appends a splitter turning one `P` payload into many `T` payloads.
  pub fn split<P, T, I>(
    &mut self,
    function: impl Fn(P) -> I + Send + Sync + 'static,
  ) -> FlowResult<&mut Self>
  where
    P: Any + Send + Sync + Clone,
    T: Any + Send + Sync,
    I: IntoIterator<Item = T> + 'static,
  {
    self.split_with::<P, T, I>(function, |_| {})
  }

  /// [`split`](Self::split) with splitter options.
  pub fn split_with<P, T, I>(
    &mut self,
    function: impl Fn(P) -> I + Send + Sync + 'static,
    configure: impl FnOnce(&mut SplitterEndpointSpec),
  ) -> FlowResult<&mut Self>
  where
    P: Any + Send + Sync + Clone,
    T: Any + Send + Sync,
    I: IntoIterator<Item = T> + 'static,
  {
    let spec = configured(configure);
    let handler = SplitHandler::<P, T, _>::new(function, spec.apply_sequence);
    self.append(
      StageKind::Split,
      TypeDescriptor::of::<P>(),
      Arc::new(handler),
      spec.endpoint,
    )
  }

  /// Appends a router choosing a channel by the key computed from `P`.
  pub fn route<P, K>(
    &mut self,
    function: impl Fn(&P) -> K + Send + Sync + 'static,
    configure: impl FnOnce(&mut RouterSpec<K>),
  ) -> FlowResult<&mut Self>
  where
    P: Any + Send + Sync,
    K: Eq + Hash + Display + Send + Sync + 'static,
  {
    let spec: RouterSpec<K> = configured(configure);
    let handler = RouterHandler::<P, K, _>::new(
      function,
      spec.mappings,
      spec.default_output_channel,
      spec.resolution_required,
      spec.prefix,
      spec.suffix,
    );
    self.append(
      StageKind::Route,
      TypeDescriptor::of::<P>(),
      Arc::new(handler),
      spec.endpoint,
    )
  }

  /// Appends a JSON conversion into `T`.
  pub fn convert<T>(&mut self) -> FlowResult<&mut Self>
  where
    T: DeserializeOwned + Any + Send + Sync,
  {
    self.convert_with::<T>(|_| {})
  }

  /// [`convert`](Self::convert) with endpoint options.
  pub fn convert_with<T>(
    &mut self,
    configure: impl FnOnce(&mut GenericEndpointSpec),
  ) -> FlowResult<&mut Self>
  where
    T: DeserializeOwned + Any + Send + Sync,
  {
    self.converters.register::<T>();
    self.append(
      StageKind::Convert,
      TypeDescriptor::of::<T>(),
      Arc::new(JsonConverter::<T>::new()),
      configured(configure),
    )
  }

  /// Appends a conversion into a runtime-described type, using a converter
  /// registered with [`register_converter`](Self::register_converter) or an
  /// earlier [`convert`](Self::convert).
  pub fn convert_to(&mut self, target: Option<TypeDescriptor>) -> FlowResult<&mut Self> {
    let target = require_type(StageKind::Convert, target)?;
    let converter = self
      .converters
      .get(&target)
      .ok_or_else(|| FlowError::TypeResolution {
        stage: StageKind::Convert,
        reason: format!("no converter registered for {}", target),
      })?;
    self.append(StageKind::Convert, target, converter, EndpointSpec::default())
  }

  /// Appends a one-way consumer of `P` payloads.
  pub fn handle<P>(&mut self, function: impl Fn(P) + Send + Sync + 'static) -> FlowResult<&mut Self>
  where
    P: Any + Send + Sync + Clone,
  {
    self.handle_with::<P>(function, |_| {})
  }

  /// [`handle`](Self::handle) with endpoint options.
  pub fn handle_with<P>(
    &mut self,
    function: impl Fn(P) + Send + Sync + 'static,
    configure: impl FnOnce(&mut GenericEndpointSpec),
  ) -> FlowResult<&mut Self>
  where
    P: Any + Send + Sync + Clone,
  {
    self.append(
      StageKind::Handle,
      TypeDescriptor::of::<P>(),
      Arc::new(ServiceHandler::<P, _>::new(function)),
      configured(configure),
    )
  }

  /// Appends a pass-through stage.
  pub fn bridge(&mut self) -> FlowResult<&mut Self> {
    self.bridge_with(|_| {})
  }

  /// [`bridge`](Self::bridge) with endpoint options.
  pub fn bridge_with(
    &mut self,
    configure: impl FnOnce(&mut GenericEndpointSpec),
  ) -> FlowResult<&mut Self> {
    self.append(
      StageKind::Bridge,
      TypeDescriptor::of::<Payload>(),
      Arc::new(BridgeHandler),
      configured(configure),
    )
  }

  /// Appends a pass-through stage logging each message at `level`.
  pub fn log(&mut self, level: Level, category: impl Into<String>) -> FlowResult<&mut Self> {
    self.append(
      StageKind::Log,
      TypeDescriptor::of::<Payload>(),
      Arc::new(LoggingHandler::new(level, category)),
      EndpointSpec::default(),
    )
  }

  /// Continues the flow on `channel`.
  ///
  /// A current component gets `channel` as its output; a different current
  /// channel is connected to `channel` through a bridge stage.
  pub fn channel(&mut self, channel: impl Into<ChannelRef>) -> FlowResult<&mut Self> {
    let channel = channel.into();
    self.check_channel_name(&channel)?;
    match self.cursor.clone() {
      Cursor::Empty => {}
      Cursor::Channel(current) if current == channel => {}
      Cursor::Channel(current) => self.bridge_into(current, channel.clone())?,
      Cursor::Component(id) => match self.output_of(id)? {
        None => self.connect(id, channel.clone())?,
        Some(existing) if existing == channel => {}
        Some(existing) => self.bridge_into(existing, channel.clone())?,
      },
    }
    self.register_channel(&channel)?;
    self.cursor = Cursor::Channel(channel);
    self.implicit_channel = false;
    Ok(self)
  }

  // Internals

  fn append(
    &mut self,
    kind: StageKind,
    declared_type: TypeDescriptor,
    handler: Arc<dyn MessageHandler>,
    mut spec: EndpointSpec,
  ) -> FlowResult<&mut Self> {
    let index = self.stages.len();
    let id = spec
      .id
      .clone()
      .unwrap_or_else(|| format!("{}.{}#{}", self.id, kind, index));
    if self.components.contains_name(&id) {
      return Err(FlowError::DuplicateComponentName(id));
    }
    if let Some(output) = &spec.output_channel {
      if output.name() == id {
        return Err(FlowError::DuplicateComponentName(id));
      }
      self.check_channel_name(output)?;
    }
    match self.existing_input()? {
      Some(channel) => self.check_fixed_subscriber(&channel)?,
      None => {
        let anonymous = self.anonymous_name();
        let taken = anonymous == id
          || self.components.contains_name(&anonymous)
          || spec
            .output_channel
            .as_ref()
            .is_some_and(|output| output.name() == anonymous);
        if taken {
          return Err(FlowError::DuplicateComponentName(anonymous));
        }
      }
    }
    let input = self.resolve_input()?;

    if self.config.log_stages {
      spec.advice_chain.insert(0, Arc::new(TracingAdvice));
    }
    let output = spec.output_channel.clone();
    let component = self
      .components
      .add(FlowComponent::Endpoint(index), Some(&id))?;
    trace!(flow = %self.id, stage = %id, input = %input, "appended {} stage", kind);
    let endpoint = Endpoint::new(StageInfo::new(id, kind), declared_type, handler, spec);
    self.stages.push(PendingStage { input, endpoint });

    match output {
      Some(output) => {
        self.register_channel(&output)?;
        self.cursor = Cursor::Channel(output);
        self.implicit_channel = false;
      }
      None => {
        self.cursor = Cursor::Component(component);
        self.implicit_channel = true;
      }
    }
    Ok(self)
  }

  /// The channel the next stage consumes from, wiring a fresh anonymous
  /// channel to the current component when needed.
  fn resolve_input(&mut self) -> FlowResult<ChannelRef> {
    if let Some(channel) = self.existing_input()? {
      return Ok(channel);
    }
    let channel = self.anonymous_channel()?;
    if let Cursor::Component(id) = self.cursor {
      self.connect(id, channel.clone())?;
    }
    Ok(channel)
  }

  /// The channel the next stage would consume from without wiring anything;
  /// `None` when an anonymous channel is still needed.
  fn existing_input(&self) -> FlowResult<Option<ChannelRef>> {
    match &self.cursor {
      Cursor::Channel(channel) => Ok(Some(channel.clone())),
      Cursor::Component(id) => self.output_of(*id),
      Cursor::Empty => Err(FlowError::InvalidCursor(format!(
        "flow '{}' has no current channel or component to attach to",
        self.id
      ))),
    }
  }

  /// A fixed-subscriber source channel admits a single consuming stage.
  fn check_fixed_subscriber(&self, input: &ChannelRef) -> FlowResult<()> {
    if !self.source.is_fixed_subscriber() || self.source.channel_ref().as_ref() != Some(input) {
      return Ok(());
    }
    if self.stages.iter().any(|stage| stage.input == *input) {
      return Err(FlowError::InvalidCursor(format!(
        "fixed-subscriber channel '{}' already has a subscriber",
        input
      )));
    }
    Ok(())
  }

  fn output_of(&self, id: ComponentId) -> FlowResult<Option<ChannelRef>> {
    match self.components.get(id) {
      Some(FlowComponent::Channel(channel)) => Ok(Some(channel.clone())),
      Some(FlowComponent::Endpoint(index)) => Ok(
        self
          .stages
          .get(*index)
          .and_then(|stage| stage.endpoint.output_channel.clone()),
      ),
      Some(FlowComponent::Source(_)) if id == self.source_component => {
        Ok(self.source_output.clone())
      }
      Some(_) => Err(FlowError::InvalidCursor(format!(
        "{} produces no messages",
        self.describe_component(id)
      ))),
      None => Err(FlowError::InvalidCursor(format!("{} is not registered", id))),
    }
  }

  fn connect(&mut self, id: ComponentId, channel: ChannelRef) -> FlowResult<()> {
    match self.components.get(id) {
      Some(FlowComponent::Endpoint(index)) => {
        let index = *index;
        if let Some(stage) = self.stages.get_mut(index) {
          stage.endpoint.output_channel = Some(channel);
        }
        Ok(())
      }
      Some(FlowComponent::Source(_)) if id == self.source_component => {
        self.source_output = Some(channel);
        Ok(())
      }
      _ => Err(FlowError::InvalidCursor(format!(
        "cannot connect {} to channel '{}'",
        self.describe_component(id),
        channel
      ))),
    }
  }

  fn bridge_into(&mut self, from: ChannelRef, to: ChannelRef) -> FlowResult<()> {
    let previous = std::mem::replace(&mut self.cursor, Cursor::Channel(from));
    let mut spec = EndpointSpec::default();
    spec.output_channel(to);
    let appended = self.append(
      StageKind::Bridge,
      TypeDescriptor::of::<Payload>(),
      Arc::new(BridgeHandler),
      spec,
    );
    if let Err(error) = appended {
      self.cursor = previous;
      return Err(error);
    }
    Ok(())
  }

  fn anonymous_name(&self) -> String {
    format!("{}.channel#{}", self.id, self.anonymous_channels)
  }

  fn anonymous_channel(&mut self) -> FlowResult<ChannelRef> {
    let name = self.anonymous_name();
    let channel = ChannelRef::Anonymous(name.clone());
    self
      .components
      .add(FlowComponent::Channel(channel.clone()), Some(&name))?;
    self.anonymous_channels += 1;
    trace!(flow = %self.id, channel = %name, "created anonymous channel");
    Ok(channel)
  }

  /// Registers a channel once; later references to the same name reuse it.
  fn register_channel(&mut self, channel: &ChannelRef) -> FlowResult<()> {
    self.check_channel_name(channel)?;
    if self.components.channel_named(channel.name()).is_none() {
      self
        .components
        .add(FlowComponent::Channel(channel.clone()), Some(channel.name()))?;
    }
    Ok(())
  }

  fn check_channel_name(&self, channel: &ChannelRef) -> FlowResult<()> {
    let name = channel.name();
    if self.components.contains_name(name) && self.components.channel_named(name).is_none() {
      return Err(FlowError::DuplicateComponentName(name.to_string()));
    }
    Ok(())
  }

  fn check_component(&self, component: &FlowComponent) -> FlowResult<()> {
    match component {
      FlowComponent::Endpoint(index) if *index >= self.stages.len() => Err(
        FlowError::InvalidCursor(format!("no stage at index {}", index)),
      ),
      FlowComponent::Source(_) => Err(FlowError::InvalidCursor(
        "a flow has exactly one source".to_string(),
      )),
      _ => Ok(()),
    }
  }

  fn describe_component(&self, id: ComponentId) -> String {
    match self.components.name(id) {
      Some(name) => format!("component '{}'", name),
      None => id.to_string(),
    }
  }

  /// Finalizes the definition into an immutable [`Flow`].
  pub(crate) fn into_flow(mut self) -> FlowResult<Flow> {
    if self.source.is_fixed_subscriber() && self.stages.is_empty() {
      return Err(FlowError::InvalidCursor(format!(
        "flow '{}' starts from a fixed-subscriber channel but has no subscriber stage",
        self.id
      )));
    }
    let input_channel = match self.source.channel_ref() {
      Some(channel) => channel,
      None => self.source_output.clone().ok_or_else(|| {
        FlowError::InvalidCursor(format!(
          "the source of flow '{}' is not connected to any stage or channel",
          self.id
        ))
      })?,
    };
    if self.stages.is_empty() && self.source.channel_ref().is_some() {
      return Err(FlowError::InvalidCursor(format!(
        "flow '{}' has no stages",
        self.id
      )));
    }

    let output_channel = match self.cursor.clone() {
      Cursor::Channel(channel) => Some(channel),
      Cursor::Component(id) => match self.output_of(id)? {
        Some(channel) => Some(channel),
        None if self.implicit_channel => {
          let channel = self.anonymous_channel()?;
          self.connect(id, channel.clone())?;
          Some(channel)
        }
        None => None,
      },
      Cursor::Empty => None,
    };

    for stage in &self.stages {
      let resolvable = match &stage.input {
        ChannelRef::Anonymous(name) => self.components.channel_named(name).is_some(),
        ChannelRef::Named(name) => !name.is_empty(),
        ChannelRef::Instance(_) => true,
      };
      if !resolvable {
        return Err(FlowError::InvalidCursor(format!(
          "stage '{}' has no resolvable input channel",
          stage.endpoint.id()
        )));
      }
    }

    let poller = match &self.source {
      FlowSource::Polling { adapter, .. } => adapter
        .configured_poller()
        .cloned()
        .unwrap_or_else(|| self.config.default_poller.clone()),
      _ => self.config.default_poller.clone(),
    };
    let stages = self
      .stages
      .into_iter()
      .map(|stage| FlowStage::new(stage.input, stage.endpoint))
      .collect::<Vec<_>>();
    debug!(flow = %self.id, stages = stages.len(), "flow assembled");
    Ok(Flow::new(
      self.id,
      self.source,
      input_channel,
      output_channel,
      stages,
      self.components,
      poller,
    ))
  }
}

impl fmt::Debug for FlowDefinition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FlowDefinition")
      .field("id", &self.id)
      .field("source", &self.source)
      .field("stages", &self.stages.len())
      .field("cursor", &self.cursor)
      .field("implicit_channel", &self.implicit_channel)
      .finish()
  }
}

fn configured<S: Default>(configure: impl FnOnce(&mut S)) -> S {
  let mut spec = S::default();
  configure(&mut spec);
  spec
}

fn require_type(stage: StageKind, declared: Option<TypeDescriptor>) -> FlowResult<TypeDescriptor> {
  declared.ok_or_else(|| FlowError::TypeResolution {
    stage,
    reason: "no input type was declared".to_string(),
  })
}
