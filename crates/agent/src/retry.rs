//! Retry policy for failed model calls.
//!
//! | Error class            | Iteration 0                  | Later iterations |
//! |------------------------|------------------------------|------------------|
//! | transport interrupted  | stop silently (after pause)  | same             |
//! | null response          | retry, then fail             | retry, then stop |
//! | anything else          | `InitialRequestFailed`       | stop silently    |
//!
//! A reset connection is never resubmitted: the request may already have
//! had side effects on the provider's end.

use std::time::Duration;
use turnloop_config::RetrySettings;
use turnloop_core::error::{LoopError, ProviderError};

/// How the policy sees a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    TransportInterrupted,
    NullResponse,
    Other,
}

/// Delays to wait before each retry attempt, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPlan {
    delays: Vec<Duration>,
}

impl BackoffPlan {
    /// `retries` attempts, the n-th one after `base * n` (2s, 4s, 6s for a 2s base).
    pub fn linear(base: Duration, retries: u32) -> Self {
        Self {
            delays: (1..=retries).map(|n| base * n).collect(),
        }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

/// What the loop should do about a failed model call.
#[derive(Debug)]
pub enum RetryDecision {
    /// Fail the whole loop with this error.
    Abort(LoopError),
    /// Resubmit the current history following this plan.
    Retry(BackoffPlan),
    /// End the loop normally with the history built so far.
    StopSilently { pause: Option<Duration> },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    transport_pause: Duration,
    null_response_signatures: Vec<String>,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::from_settings(&RetrySettings::default())
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            transport_pause: Duration::from_millis(settings.transport_pause_ms),
            null_response_signatures: settings
                .null_response_signatures
                .iter()
                .map(|s| compact(s))
                .collect(),
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_transport_pause(mut self, pause: Duration) -> Self {
        self.transport_pause = pause;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Sort a provider error into one of the three classes.
    ///
    /// Besides the dedicated variants, an error whose message mentions a
    /// reset connection counts as a transport interruption, and one whose
    /// message contains a null-response signature counts as a null response.
    pub fn error_class(&self, error: &ProviderError) -> ErrorClass {
        match error {
            ProviderError::ConnectionReset(_) | ProviderError::StreamInterrupted(_) => {
                ErrorClass::TransportInterrupted
            }
            ProviderError::NullResponse(_) => ErrorClass::NullResponse,
            other => {
                let message = other.to_string();
                if message.to_lowercase().contains("connection reset") {
                    return ErrorClass::TransportInterrupted;
                }
                let message = compact(&message);
                if self
                    .null_response_signatures
                    .iter()
                    .any(|sig| !sig.is_empty() && message.contains(sig.as_str()))
                {
                    ErrorClass::NullResponse
                } else {
                    ErrorClass::Other
                }
            }
        }
    }

    /// Decide what to do about `error` raised by the model call of `iteration`.
    pub fn classify(&self, error: &ProviderError, iteration: u32) -> RetryDecision {
        match self.error_class(error) {
            ErrorClass::TransportInterrupted => RetryDecision::StopSilently {
                pause: Some(self.transport_pause),
            },
            ErrorClass::NullResponse => {
                RetryDecision::Retry(BackoffPlan::linear(self.base_delay, self.max_retries))
            }
            ErrorClass::Other if iteration == 0 => {
                RetryDecision::Abort(LoopError::InitialRequestFailed(error.clone()))
            }
            ErrorClass::Other => RetryDecision::StopSilently { pause: None },
        }
    }

    /// Decide what to do once every retry in the plan failed.
    pub fn exhausted(&self, iteration: u32, last: ProviderError) -> RetryDecision {
        if iteration == 0 {
            RetryDecision::Abort(LoopError::ProviderRetriesExhausted {
                attempts: self.max_retries,
                last,
            })
        } else {
            RetryDecision::StopSilently { pause: None }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase with all whitespace removed.
fn compact(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_matches_defaults() {
        let plan = BackoffPlan::linear(Duration::from_secs(2), 3);
        assert_eq!(
            plan.delays(),
            [2, 4, 6].map(Duration::from_secs).as_slice()
        );
        assert!(BackoffPlan::linear(Duration::from_secs(2), 0).is_empty());
    }

    #[test]
    fn connection_reset_stops_with_pause() {
        let policy = RetryPolicy::new();
        for iteration in [0, 3] {
            let decision = policy.classify(&ProviderError::ConnectionReset("peer".into()), iteration);
            assert!(matches!(
                decision,
                RetryDecision::StopSilently { pause: Some(p) } if p == Duration::from_millis(300)
            ));
        }
    }

    #[test]
    fn reset_mentioned_in_network_error_is_transport() {
        let policy = RetryPolicy::new();
        let err = ProviderError::Network("Connection reset by peer (os error 104)".into());
        assert_eq!(policy.error_class(&err), ErrorClass::TransportInterrupted);
    }

    #[test]
    fn null_response_retries_three_times() {
        let policy = RetryPolicy::new();
        let decision = policy.classify(&ProviderError::NullResponse("choices".into()), 0);
        match decision {
            RetryDecision::Retry(plan) => assert_eq!(plan.len(), 3),
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn null_signature_recognized_in_api_error() {
        let policy = RetryPolicy::new();
        let err = ProviderError::ApiError {
            status_code: 200,
            message: r#"malformed body {"id":"x", "choices" : null}"#.into(),
        };
        assert_eq!(policy.error_class(&err), ErrorClass::NullResponse);
    }

    #[test]
    fn other_errors_depend_on_iteration() {
        let policy = RetryPolicy::new();
        let err = ProviderError::AuthenticationFailed("bad key".into());

        assert!(matches!(
            policy.classify(&err, 0),
            RetryDecision::Abort(LoopError::InitialRequestFailed(_))
        ));
        assert!(matches!(
            policy.classify(&err, 1),
            RetryDecision::StopSilently { pause: None }
        ));
    }

    #[test]
    fn exhaustion_fails_only_first_iteration() {
        let policy = RetryPolicy::new().with_max_retries(2);
        let last = ProviderError::NullResponse("again".into());

        match policy.exhausted(0, last.clone()) {
            RetryDecision::Abort(LoopError::ProviderRetriesExhausted { attempts, .. }) => {
                assert_eq!(attempts, 2)
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(matches!(
            policy.exhausted(2, last),
            RetryDecision::StopSilently { pause: None }
        ));
    }

    #[test]
    fn settings_feed_policy() {
        let settings = RetrySettings {
            max_retries: 1,
            base_delay_ms: 50,
            transport_pause_ms: 10,
            null_response_signatures: vec!["EMPTY CANDIDATES".into()],
        };
        let policy = RetryPolicy::from_settings(&settings);
        let err = ProviderError::ApiError {
            status_code: 502,
            message: "upstream sent empty candidates".into(),
        };
        match policy.classify(&err, 0) {
            RetryDecision::Retry(plan) => {
                assert_eq!(plan.delays(), [Duration::from_millis(50)].as_slice())
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }
}
