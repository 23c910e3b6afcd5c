//! The tool-calling loop.
//!
//! Each iteration follows the same path:
//!
//! 1. **Call the model** with the full history and the offered tools
//! 2. **Append** the assistant turn
//! 3. **No tool calls**: stop (on the first turn, try to recover a call
//!    written as plain text first)
//! 4. **Completion signals**: stop, possibly after running one final call
//! 5. **Execute** the requested calls and append their results
//! 6. Loop back to step 1 until a signal, a failure or the iteration budget
//!    ends it
//!
//! Failures on the first iteration are fatal; later ones end the loop with
//! the history built so far.

pub mod completion;
pub mod empty_result;
pub mod fallback;
pub mod loop_runner;
pub mod retry;

#[cfg(test)]
mod test_helpers;

pub use completion::{CompletionDetector, CompletionSignals};
pub use empty_result::{EmptyResultPredicate, MarkerPredicate};
pub use fallback::{FALLBACK_CALL_PREFIX, FirstTurnFallback, Recovered};
pub use loop_runner::{LoopOutcome, LoopRequest, StopReason, ToolLoop, TurnOutcome};
pub use retry::{BackoffPlan, ErrorClass, RetryDecision, RetryPolicy};
