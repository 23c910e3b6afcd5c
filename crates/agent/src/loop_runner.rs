//! The tool-calling iteration controller.
//!
//! One [`ToolLoop`] can drive any number of concurrent loop invocations:
//! everything that changes during a run (the history, the iteration index)
//! lives on the stack of [`ToolLoop::run`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use turnloop_config::LoopSettings;
use turnloop_core::error::{LoopError, ProviderError, ToolError};
use turnloop_core::event::{DomainEvent, EventBus};
use turnloop_core::fallback::FallbackParserRegistry;
use turnloop_core::message::{Conversation, Message, ToolCallRequest};
use turnloop_core::provider::{GenerationConfig, Provider, ProviderRequest, ProviderResponse, ToolDefinition};
use turnloop_core::tool::ToolExecutor;

use crate::completion::CompletionDetector;
use crate::empty_result::{EmptyResultPredicate, MarkerPredicate};
use crate::fallback::FirstTurnFallback;
use crate::retry::{RetryDecision, RetryPolicy};

/// Why a loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The task finished, a stop signal was seen, or a later turn failed
    /// and the loop kept what it had.
    Completed,
    /// `max_iterations` model calls were made.
    IterationBudgetExhausted,
    /// The caller's cancellation token fired.
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::IterationBudgetExhausted => "iteration_budget_exhausted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What happened in one iteration.
#[derive(Debug)]
pub enum TurnOutcome {
    Continue,
    Stop(StopReason),
    Fail(LoopError),
}

/// Everything one loop invocation needs.
#[derive(Debug, Clone)]
pub struct LoopRequest {
    /// Seed history; must not be empty
    pub messages: Vec<Message>,
    /// Tools offered to the model on every turn
    pub tools: Vec<ToolDefinition>,
    pub config: GenerationConfig,
    /// Model calls allowed, provider retries excluded; at least 1
    pub max_iterations: u32,
    /// Ignore `"complete": true` in tool arguments
    pub defer_inline_completion: bool,
    pub cancel: CancellationToken,
}

impl LoopRequest {
    pub fn new(
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        config: GenerationConfig,
        max_iterations: u32,
    ) -> Self {
        Self {
            messages,
            tools,
            config,
            max_iterations,
            defer_inline_completion: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn defer_inline_completion(mut self) -> Self {
        self.defer_inline_completion = true;
        self
    }
}

/// The result of a loop that ended without error.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// The seed messages followed by everything the loop appended.
    pub messages: Vec<Message>,
    pub stop_reason: StopReason,
    /// Model calls made, retries excluded.
    pub iterations: u32,
}

impl LoopOutcome {
    /// The last assistant message, if the loop produced one.
    pub fn final_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m, Message::Assistant { .. }))
    }
}

/// Drives a conversation through model calls and tool executions until a
/// terminal state.
pub struct ToolLoop {
    /// The model invocation client
    provider: Arc<dyn Provider>,

    /// The tool execution service
    executor: Arc<dyn ToolExecutor>,

    /// First-turn plain-text recovery; disabled when absent
    fallback_parsers: Option<Arc<dyn FallbackParserRegistry>>,

    completion: CompletionDetector,

    retry: RetryPolicy,

    empty_result: Arc<dyn EmptyResultPredicate>,

    /// Event bus for domain events
    event_bus: Option<Arc<EventBus>>,
}

impl ToolLoop {
    /// Create a loop with default completion, retry and empty-result rules.
    pub fn new(provider: Arc<dyn Provider>, executor: Arc<dyn ToolExecutor>) -> Self {
        Self::from_settings(&LoopSettings::default(), provider, executor)
    }

    /// Create a loop whose rules come from configuration.
    pub fn from_settings(
        settings: &LoopSettings,
        provider: Arc<dyn Provider>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            provider,
            executor,
            fallback_parsers: None,
            completion: CompletionDetector::from_settings(&settings.completion),
            retry: RetryPolicy::from_settings(&settings.retry),
            empty_result: Arc::new(MarkerPredicate::from_settings(&settings.empty_result)),
            event_bus: None,
        }
    }

    /// Enable first-turn fallback parsing.
    pub fn with_fallback_parsers(mut self, parsers: Arc<dyn FallbackParserRegistry>) -> Self {
        self.fallback_parsers = Some(parsers);
        self
    }

    pub fn with_completion_detector(mut self, detector: CompletionDetector) -> Self {
        self.completion = detector;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_empty_result_predicate(mut self, predicate: Arc<dyn EmptyResultPredicate>) -> Self {
        self.empty_result = predicate;
        self
    }

    /// Publish domain events to this bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Run a loop with no cancellation and inline completion enabled.
    pub async fn run_tool_loop(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        config: GenerationConfig,
        max_iterations: u32,
    ) -> Result<LoopOutcome, LoopError> {
        self.run(LoopRequest::new(messages, tools, config, max_iterations))
            .await
    }

    /// Run a loop on the tokio runtime, off the caller's task.
    pub fn spawn(self: Arc<Self>, request: LoopRequest) -> JoinHandle<Result<LoopOutcome, LoopError>> {
        tokio::spawn(async move { self.run(request).await })
    }

    /// Drive `request` to a terminal state.
    ///
    /// Returns the extended history on any stop, or the error that ended a
    /// first iteration.
    pub async fn run(&self, request: LoopRequest) -> Result<LoopOutcome, LoopError> {
        if request.messages.is_empty() {
            return Err(LoopError::InvalidRequest("initial messages must not be empty".into()));
        }
        if request.max_iterations == 0 {
            return Err(LoopError::InvalidRequest("max_iterations must be at least 1".into()));
        }

        let mut conversation = Conversation::seeded(request.messages.clone());
        let conversation_id = conversation.id.to_string();

        info!(
            conversation_id = %conversation_id,
            model = %request.config.model_name,
            messages = conversation.len(),
            tools = request.tools.len(),
            max_iterations = request.max_iterations,
            "Starting tool loop"
        );
        self.publish(DomainEvent::LoopStarted {
            conversation_id: conversation_id.clone(),
            model: request.config.model_name.clone(),
            max_iterations: request.max_iterations,
            timestamp: Utc::now(),
        });

        let mut iteration = 0u32;
        let mut model_calls = 0u32;
        let result = loop {
            if request.cancel.is_cancelled() {
                info!(conversation_id = %conversation_id, iteration, "Tool loop cancelled");
                break Ok(StopReason::Cancelled);
            }

            debug!(conversation_id = %conversation_id, iteration, "Tool loop iteration");
            model_calls += 1;

            match self.turn(&mut conversation, &request, iteration).await {
                TurnOutcome::Continue => {}
                TurnOutcome::Stop(reason) => break Ok(reason),
                TurnOutcome::Fail(err) => break Err(err),
            }

            iteration += 1;
            if iteration >= request.max_iterations {
                warn!(
                    conversation_id = %conversation_id,
                    iterations = iteration,
                    "Iteration budget exhausted, returning accumulated history"
                );
                break Ok(StopReason::IterationBudgetExhausted);
            }
        };

        match result {
            Ok(stop_reason) => {
                info!(
                    conversation_id = %conversation_id,
                    reason = %stop_reason,
                    iterations = model_calls,
                    messages = conversation.len(),
                    "Tool loop finished"
                );
                self.publish(DomainEvent::LoopFinished {
                    conversation_id,
                    outcome: stop_reason.to_string(),
                    iterations: model_calls,
                    timestamp: Utc::now(),
                });
                Ok(LoopOutcome {
                    messages: conversation.into_messages(),
                    stop_reason,
                    iterations: model_calls,
                })
            }
            Err(err) => {
                warn!(conversation_id = %conversation_id, error = %err, "Tool loop failed");
                self.publish(DomainEvent::ErrorOccurred {
                    context: format!("tool_loop:{conversation_id}"),
                    error_message: err.to_string(),
                    timestamp: Utc::now(),
                });
                self.publish(DomainEvent::LoopFinished {
                    conversation_id,
                    outcome: "failed".into(),
                    iterations: model_calls,
                    timestamp: Utc::now(),
                });
                Err(err)
            }
        }
    }

    /// One iteration: model call, stop checks, tool execution.
    async fn turn(
        &self,
        conversation: &mut Conversation,
        request: &LoopRequest,
        iteration: u32,
    ) -> TurnOutcome {
        let conversation_id = conversation.id.to_string();

        let response = match self.invoke(conversation, request, iteration).await {
            Ok(response) => response,
            Err(outcome) => return outcome,
        };

        self.publish(DomainEvent::ResponseGenerated {
            conversation_id: conversation_id.clone(),
            iteration,
            model: response.model.clone(),
            tool_calls: response.tool_calls.as_ref().map_or(0, Vec::len),
            tokens_used: response.usage.map_or(0, |u| u.total_tokens),
            timestamp: Utc::now(),
        });

        let calls = response.tool_calls.clone();
        let text = response.text.clone();
        conversation.push(response.into_message());

        // No tool-call structure at all
        let Some(calls) = calls else {
            if iteration == 0 {
                if let Some(results) = self.first_turn_fallback(&conversation_id, &text, request).await {
                    conversation.extend(results);
                    return TurnOutcome::Continue;
                }
            }
            debug!(conversation_id = %conversation_id, iteration, "Model answered without tool calls");
            return TurnOutcome::Stop(StopReason::Completed);
        };

        if calls.is_empty() {
            // Without offered tools an empty list is just a plain answer
            if iteration == 0 && !request.tools.is_empty() {
                return TurnOutcome::Fail(LoopError::NoToolCallOnFirstIteration);
            }
            return TurnOutcome::Stop(StopReason::Completed);
        }

        let signals = self.completion.inspect(&calls);

        if signals.generation_complete {
            info!(conversation_id = %conversation_id, iteration, "Terminating tool requested, stopping without execution");
            return TurnOutcome::Stop(StopReason::Completed);
        }

        if let Some(index) = signals.modification_complete {
            let call = &calls[index];
            info!(conversation_id = %conversation_id, tool = %call.name, "Modification complete, executing final call");
            match self
                .execute(&conversation_id, std::slice::from_ref(call), &request.config)
                .await
            {
                Ok(results) => conversation.extend(results),
                Err((completed, error)) => {
                    warn!(tool = %call.name, error = %error, "Completion tool failed");
                    conversation.extend(completed);
                }
            }
            return TurnOutcome::Stop(StopReason::Completed);
        }

        let results = match self.execute(&conversation_id, &calls, &request.config).await {
            Ok(results) => results,
            Err((completed, error)) => {
                conversation.extend(completed);
                if iteration == 0 {
                    return TurnOutcome::Fail(LoopError::ToolExecutionFailedOnFirstIteration(error));
                }
                warn!(
                    conversation_id = %conversation_id,
                    iteration,
                    error = %error,
                    "Tool execution failed, stopping with accumulated history"
                );
                return TurnOutcome::Stop(StopReason::Completed);
            }
        };

        let all_empty = results.iter().all(|m| match m {
            Message::ToolResult { tool_name, text, .. } => {
                self.empty_result.is_empty_result(tool_name, text)
            }
            _ => true,
        });
        conversation.extend(results);

        if iteration == 0 && all_empty {
            return TurnOutcome::Fail(LoopError::EmptyToolResultOnFirstIteration);
        }

        if signals.inline_complete && !request.defer_inline_completion {
            info!(conversation_id = %conversation_id, iteration, "Tool call declared the task complete");
            return TurnOutcome::Stop(StopReason::Completed);
        }

        TurnOutcome::Continue
    }

    /// Call the model, applying the retry policy on failure.
    async fn invoke(
        &self,
        conversation: &Conversation,
        request: &LoopRequest,
        iteration: u32,
    ) -> Result<ProviderResponse, TurnOutcome> {
        let error = match self.call_model(conversation, request).await {
            Some(Ok(response)) => return Ok(response),
            Some(Err(error)) => error,
            None => return Err(TurnOutcome::Stop(StopReason::Cancelled)),
        };

        let plan = match self.retry.classify(&error, iteration) {
            RetryDecision::Retry(plan) => plan,
            decision => return Err(self.settle(decision, &error, request, iteration).await),
        };

        let conversation_id = conversation.id.to_string();
        let mut last = error;
        for (index, delay) in plan.delays().iter().enumerate() {
            let attempt = index as u32 + 1;
            warn!(
                conversation_id = %conversation_id,
                iteration,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last,
                "Null provider response, retrying"
            );
            self.publish(DomainEvent::RetryScheduled {
                conversation_id: conversation_id.clone(),
                iteration,
                attempt,
                delay_ms: delay.as_millis() as u64,
                timestamp: Utc::now(),
            });

            if !pause(*delay, &request.cancel).await {
                return Err(TurnOutcome::Stop(StopReason::Cancelled));
            }

            match self.call_model(conversation, request).await {
                Some(Ok(response)) => {
                    info!(conversation_id = %conversation_id, attempt, "Provider recovered after retry");
                    return Ok(response);
                }
                Some(Err(error)) => match self.retry.classify(&error, iteration) {
                    RetryDecision::Retry(_) => last = error,
                    decision => return Err(self.settle(decision, &error, request, iteration).await),
                },
                None => return Err(TurnOutcome::Stop(StopReason::Cancelled)),
            }
        }

        let decision = self.retry.exhausted(iteration, last.clone());
        Err(self.settle(decision, &last, request, iteration).await)
    }

    /// Turn a non-retry decision into the turn's outcome.
    async fn settle(
        &self,
        decision: RetryDecision,
        error: &ProviderError,
        request: &LoopRequest,
        iteration: u32,
    ) -> TurnOutcome {
        match decision {
            RetryDecision::Abort(err) => TurnOutcome::Fail(err),
            RetryDecision::StopSilently { pause: delay } => {
                warn!(iteration, error = %error, "Model call failed, stopping with accumulated history");
                self.publish(DomainEvent::ErrorOccurred {
                    context: format!("model_call:iteration_{iteration}"),
                    error_message: error.to_string(),
                    timestamp: Utc::now(),
                });
                if let Some(delay) = delay {
                    pause(delay, &request.cancel).await;
                }
                TurnOutcome::Stop(StopReason::Completed)
            }
            // Retry plans are consumed by `invoke`
            RetryDecision::Retry(_) => TurnOutcome::Stop(StopReason::Completed),
        }
    }

    /// One model call over the current history. `None` means cancelled.
    async fn call_model(
        &self,
        conversation: &Conversation,
        request: &LoopRequest,
    ) -> Option<Result<ProviderResponse, ProviderError>> {
        let provider_request = ProviderRequest {
            messages: conversation.messages().to_vec(),
            tools: request.tools.clone(),
            config: request.config.clone(),
        };

        tokio::select! {
            biased;
            _ = request.cancel.cancelled() => None,
            result = self.provider.complete(provider_request) => Some(result),
        }
    }

    /// Execute calls through the tool executor, keeping only tool results.
    async fn execute(
        &self,
        conversation_id: &str,
        calls: &[ToolCallRequest],
        config: &GenerationConfig,
    ) -> Result<Vec<Message>, (Vec<Message>, ToolError)> {
        debug!(conversation_id = %conversation_id, tool_count = calls.len(), "Executing tool calls");
        let start = Instant::now();
        let result = self.executor.execute(calls, &config.tool_context_id).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        self.publish(DomainEvent::ToolExecuted {
            conversation_id: conversation_id.to_string(),
            tool_names: calls.iter().map(|c| c.name.clone()).collect(),
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        match result {
            Ok(results) => Ok(only_tool_results(results)),
            Err(batch) => Err((only_tool_results(batch.completed), batch.error)),
        }
    }

    async fn first_turn_fallback(
        &self,
        conversation_id: &str,
        text: &str,
        request: &LoopRequest,
    ) -> Option<Vec<Message>> {
        let parsers = self.fallback_parsers.as_deref()?;
        let fallback = FirstTurnFallback::new(parsers, self.executor.as_ref());
        let recovered = fallback
            .recover(text, &request.tools, &request.config.tool_context_id)
            .await?;

        self.publish(DomainEvent::FallbackApplied {
            conversation_id: conversation_id.to_string(),
            tool_name: recovered.tool_name.clone(),
            parser: recovered.parser.clone(),
            timestamp: Utc::now(),
        });
        Some(only_tool_results(recovered.results))
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Drop anything an executor returned that is not a tool result.
fn only_tool_results(messages: Vec<Message>) -> Vec<Message> {
    let total = messages.len();
    let results: Vec<Message> = messages
        .into_iter()
        .filter(|m| matches!(m, Message::ToolResult { .. }))
        .collect();
    if results.len() != total {
        warn!(dropped = total - results.len(), "Tool executor returned non-result messages");
    }
    results
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
