//! # weaveflow
//!
//! Typed message-flow composition in pure Rust.
//!
//! weaveflow builds message-processing pipelines from a starting source and a
//! sequence of typed stages: transform, filter, split, route and convert, plus
//! bridge, handle and log. Composition produces an immutable [`Flow`]: the
//! ordered (channel, endpoint) pairs and every registered component, ready
//! for a runtime to execute.
//!
//! ## Key Features
//!
//! - **Typed Stages**: Declared input types are explicit type parameters, or
//!   runtime [`TypeDescriptor`]s for dynamic callers
//! - **Implicit Wiring**: Consecutive stages are joined by anonymous channels
//! - **Advice Chains**: Error strategies and tracing wrapped around handlers
//! - **Fail-Fast Composition**: A failed composition never yields a partial flow
//! - **In-process Runner**: Send, request/reply and background source pumps on Tokio
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use weaveflow::prelude::*;
//!
//! let flow = IntegrationFlows::from_channel("numbers")
//!     .compose(|f| {
//!         f.filter::<i32>(|x| *x > 0)?
//!             .transform::<i32, i32>(|x| x * 2)?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let runner = FlowRunner::new(Arc::new(flow), ChannelRegistry::new()).unwrap();
//! for x in [1, -1, 2] {
//!     runner.send(Message::new(x)).unwrap();
//! }
//! let doubled: Vec<i32> = runner
//!     .output()
//!     .unwrap()
//!     .drain()
//!     .iter()
//!     .map(|m| *m.payload().downcast_ref::<i32>().unwrap())
//!     .collect();
//! assert_eq!(doubled, vec![2, 4]);
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Around-advice applied to stage handlers.
pub mod advice;
/// Channel references, the channel seam and in-process queues.
pub mod channel;
/// Builder configuration.
pub mod config;
/// JSON payload conversion.
pub mod convert;
/// The mutable flow definition and its stage factories.
pub mod definition;
/// Stage configuration and appended endpoints.
pub mod endpoint;
/// Error types and per-stage error strategies.
pub mod error;
/// The finalized flow.
pub mod flow;
/// Flow assembly entry points.
pub mod flows;
/// Handler shapes behind each stage kind.
pub mod handler;
/// Subscriber setup for `tracing` output.
pub mod logging;
/// Message envelope types.
pub mod message;
/// In-process flow execution.
pub mod runner;
/// Flow sources.
pub mod source;
/// Runtime type descriptors.
pub mod types;

#[cfg(test)]
mod handler_test;
#[cfg(test)]
mod message_test;

pub use definition::{FlowComponent, FlowDefinition};
pub use error::{FlowError, FlowResult};
pub use flow::Flow;
pub use flows::{IntegrationFlows, integration_flow};
pub use types::TypeDescriptor;

/// Commonly used types.
pub mod prelude {
  pub use crate::channel::{ChannelRef, ChannelRegistry, MessageChannel, QueueChannel};
  pub use crate::config::FlowConfig;
  pub use crate::definition::{ComponentId, FlowComponent, FlowDefinition};
  pub use crate::endpoint::{PollerSpec, StageKind};
  pub use crate::error::{ErrorAction, ErrorStrategy, FlowError, FlowResult};
  pub use crate::flow::Flow;
  pub use crate::flows::{IntegrationFlows, integration_flow};
  pub use crate::message::{Message, MessageId, Payload};
  pub use crate::runner::FlowRunner;
  pub use crate::source::{FlowSource, MessageProducer, MessageSource};
  pub use crate::types::TypeDescriptor;
}
