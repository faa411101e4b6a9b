//! # Advice
//!
//! Around-advice wrapped around a stage's handler. The chain is applied
//! outermost first: the first advice added to a stage sees the message
//! before any other and sees the final outcome last.
//!
//! [`ErrorStrategy`] is itself an advice, so a stage's error policy is just
//! another entry in its chain.

use crate::error::{ErrorAction, ErrorStrategy, FlowResult, StageInfo};
use crate::handler::{HandlerOutcome, MessageHandler};
use crate::message::Message;
use tracing::{debug, warn};

/// Continuation handed to an advice: runs the rest of the chain.
pub type Proceed<'a> = &'a dyn Fn(Message) -> FlowResult<HandlerOutcome>;

/// Behaviour wrapped around a stage's handler.
///
/// # Example
///
/// ```rust
/// use weaveflow::advice::{Advice, Proceed};
/// use weaveflow::error::{FlowResult, StageInfo};
/// use weaveflow::handler::HandlerOutcome;
/// use weaveflow::message::Message;
///
/// struct Tagging;
///
/// impl Advice for Tagging {
///     fn around(&self, _stage: &StageInfo, message: Message, proceed: Proceed<'_>) -> FlowResult<HandlerOutcome> {
///         proceed(message.with_header("tagged", "true"))
///     }
/// }
/// ```
pub trait Advice: Send + Sync {
  /// Handles one message, calling `proceed` zero or more times.
  fn around(
    &self,
    stage: &StageInfo,
    message: Message,
    proceed: Proceed<'_>,
  ) -> FlowResult<HandlerOutcome>;
}

impl Advice for ErrorStrategy {
  fn around(
    &self,
    stage: &StageInfo,
    message: Message,
    proceed: Proceed<'_>,
  ) -> FlowResult<HandlerOutcome> {
    let mut retries = 0;
    loop {
      let error = match proceed(message.clone()) {
        Ok(outcome) => return Ok(outcome),
        Err(error) => error,
      };
      match self.decide(&error, retries) {
        ErrorAction::Stop => return Err(error),
        ErrorAction::Skip => {
          warn!(stage = %stage, message_id = %message.id(), error = %error, "skipping failed message");
          return Ok(HandlerOutcome::Discard {
            message,
            channel: None,
          });
        }
        ErrorAction::Retry => {
          retries += 1;
          debug!(stage = %stage, retries, error = %error, "retrying stage");
        }
      }
    }
  }
}

/// Advice that logs every message entering and leaving a stage at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAdvice;

impl Advice for TracingAdvice {
  fn around(
    &self,
    stage: &StageInfo,
    message: Message,
    proceed: Proceed<'_>,
  ) -> FlowResult<HandlerOutcome> {
    debug!(stage = %stage, message_id = %message.id(), "stage received message");
    let outcome = proceed(message);
    match &outcome {
      Ok(_) => debug!(stage = %stage, "stage completed"),
      Err(error) => debug!(stage = %stage, error = %error, "stage failed"),
    }
    outcome
  }
}

/// Runs `message` through `chain` and finally `handler`.
pub(crate) fn invoke_chain(
  chain: &[std::sync::Arc<dyn Advice>],
  handler: &dyn MessageHandler,
  stage: &StageInfo,
  message: Message,
) -> FlowResult<HandlerOutcome> {
  match chain.split_first() {
    None => handler.handle(stage, message),
    Some((advice, rest)) => advice.around(stage, message, &|next| {
      invoke_chain(rest, handler, stage, next)
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::endpoint::StageKind;
  use crate::error::{FlowError, StringError};
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct Flaky {
    calls: AtomicUsize,
    failures: usize,
  }

  impl MessageHandler for Flaky {
    fn handle(&self, stage: &StageInfo, message: Message) -> FlowResult<HandlerOutcome> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst);
      if call < self.failures {
        Err(FlowError::handler(stage, StringError(format!("failure {}", call))))
      } else {
        Ok(HandlerOutcome::Reply(message))
      }
    }
  }

  fn stage() -> StageInfo {
    StageInfo::new("flaky", StageKind::Transform)
  }

  fn chain(strategy: ErrorStrategy) -> Vec<Arc<dyn Advice>> {
    vec![Arc::new(strategy)]
  }

  #[test]
  fn test_retry_strategy_recovers_within_limit() {
    let handler = Flaky {
      calls: AtomicUsize::new(0),
      failures: 2,
    };
    let outcome = invoke_chain(&chain(ErrorStrategy::Retry(2)), &handler, &stage(), Message::new(1));
    assert!(matches!(outcome, Ok(HandlerOutcome::Reply(_))));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn test_retry_strategy_gives_up_after_limit() {
    let handler = Flaky {
      calls: AtomicUsize::new(0),
      failures: 5,
    };
    let outcome = invoke_chain(&chain(ErrorStrategy::Retry(1)), &handler, &stage(), Message::new(1));
    assert!(matches!(outcome, Err(FlowError::Handler { .. })));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_skip_strategy_discards() {
    let handler = Flaky {
      calls: AtomicUsize::new(0),
      failures: 1,
    };
    let outcome = invoke_chain(&chain(ErrorStrategy::Skip), &handler, &stage(), Message::new(1));
    assert!(matches!(
      outcome,
      Ok(HandlerOutcome::Discard { channel: None, .. })
    ));
  }

  #[test]
  fn test_custom_strategy_sees_retry_count() {
    let handler = Flaky {
      calls: AtomicUsize::new(0),
      failures: 10,
    };
    let strategy = ErrorStrategy::new_custom(|_, retries| {
      if retries < 3 {
        ErrorAction::Retry
      } else {
        ErrorAction::Skip
      }
    });
    let outcome = invoke_chain(&chain(strategy), &handler, &stage(), Message::new(1));
    assert!(matches!(outcome, Ok(HandlerOutcome::Discard { .. })));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
  }

  #[test]
  fn test_tracing_advice_is_transparent() {
    let handler = Flaky {
      calls: AtomicUsize::new(0),
      failures: 0,
    };
    let chain: Vec<Arc<dyn Advice>> = vec![Arc::new(TracingAdvice), Arc::new(ErrorStrategy::Stop)];
    let outcome = invoke_chain(&chain, &handler, &stage(), Message::new(1));
    assert!(matches!(outcome, Ok(HandlerOutcome::Reply(_))));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_empty_chain_calls_handler_directly() {
    let handler = Flaky {
      calls: AtomicUsize::new(0),
      failures: 1,
    };
    let outcome = invoke_chain(&[], &handler, &stage(), Message::new(1));
    assert!(outcome.is_err());
  }
}
