//! Chain execution.
//!
//! For each step: interpolate → (decide) → validate, with one repair attempt
//! → publish → fold the result into the run context → append to the thread.
//! Parallel groups run every member against the context as it stood when the
//! group started and fold their results in declaration order afterwards.

use std::sync::Arc;
use std::time::Instant;

use agentos_common::EngineConfig;
use agentos_events::{Event, EventStatus};
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, HandlerOutcome, PublishOutcome};
use crate::chain::{Chain, ChainElement, ChainStep, ExecutionResult};
use crate::decision::{merge_params, Decision, DecisionAction, DecisionRequest, REPAIR_PROMPT};
use crate::error::{DecisionError, StoreError};
use crate::interpolate::Interpolator;
use crate::thread::Thread;
use crate::thread_store::{store_from_config, MemoryThreadStore, ThreadStore};

pub const DEFAULT_DECISION_EVENT: &str = "agent.decide";

enum StepResult {
    Completed(Value),
    Skipped(Option<String>),
}

/// A step's terminal event. Skipped steps complete but are not folded into
/// the run context.
struct StepRun {
    event: Event,
    skipped: bool,
}

pub struct ChainExecutor {
    bus: Arc<EventBus>,
    threads: Arc<dyn ThreadStore>,
    decision_event: String,
    source: String,
    recent_context_events: usize,
}

impl ChainExecutor {
    /// In-memory threads, `agent.decide` as the decision event.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            threads: Arc::new(MemoryThreadStore::new()),
            decision_event: DEFAULT_DECISION_EVENT.to_string(),
            source: "chain".to_string(),
            recent_context_events: 10,
        }
    }

    pub fn from_config(config: &EngineConfig, bus: Arc<EventBus>) -> Self {
        Self::new(bus)
            .with_thread_store(store_from_config(&config.threads))
            .with_decision_event(config.chain.decision_event.clone())
            .with_source(config.chain.source.clone())
            .with_recent_context_events(config.threads.recent_context_events)
    }

    pub fn with_thread_store(mut self, threads: Arc<dyn ThreadStore>) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_decision_event(mut self, name: impl Into<String>) -> Self {
        self.decision_event = name.into();
        self
    }

    /// Prefix for the `source` of published events (`<source>:<thread_id>`).
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_recent_context_events(mut self, recent: usize) -> Self {
        self.recent_context_events = recent;
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn threads(&self) -> &Arc<dyn ThreadStore> {
        &self.threads
    }

    /// Run `chain` in the context of `thread_id`, creating the thread if needed.
    ///
    /// Never fails: every error ends the run and is reported in the result.
    pub async fn execute_chain(&self, chain: &Chain, thread_id: &str) -> ExecutionResult {
        let started = Instant::now();
        info!(thread_id = %thread_id, steps = chain.step_count(), "Executing chain");

        let mut executed = Vec::new();
        let outcome = self.run(chain, thread_id, &mut executed).await;
        let total_duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(()) => {
                info!(
                    thread_id = %thread_id,
                    events = executed.len(),
                    duration_ms = total_duration_ms,
                    "Chain completed"
                );
                ExecutionResult {
                    thread_id: thread_id.to_string(),
                    events: executed,
                    success: true,
                    error: None,
                    total_duration_ms,
                }
            }
            Err(message) => {
                error!(thread_id = %thread_id, error = %message, "Chain failed");
                ExecutionResult {
                    thread_id: thread_id.to_string(),
                    events: executed,
                    success: false,
                    error: Some(message),
                    total_duration_ms,
                }
            }
        }
    }

    async fn run(
        &self,
        chain: &Chain,
        thread_id: &str,
        executed: &mut Vec<Event>,
    ) -> Result<(), String> {
        let thread = self
            .load_thread(thread_id)
            .await
            .map_err(|e| format!("Failed to load thread {thread_id}: {e}"))?;
        let mut context = Interpolator::new(thread.context_view(self.recent_context_events));

        for element in &chain.elements {
            match element {
                ChainElement::Step(step) => {
                    let run = self.execute_step(step, &context, thread_id).await;
                    let recorded = self.record(thread_id, &run.event).await;
                    let folded = fold(&mut context, &run);
                    executed.push(run.event);
                    recorded?;
                    folded?;
                }
                ChainElement::Parallel(steps) => {
                    let snapshot = &context;
                    let runs = join_all(steps.iter().map(|step| async move {
                        let run = self.execute_step(step, snapshot, thread_id).await;
                        let recorded = self.record(thread_id, &run.event).await;
                        (run, recorded)
                    }))
                    .await;

                    let mut first_failure = None;
                    for (run, recorded) in runs {
                        let outcome = recorded.and_then(|()| fold(&mut context, &run));
                        if let Err(message) = outcome {
                            if first_failure.is_none() {
                                first_failure = Some(message);
                            }
                        }
                        executed.push(run.event);
                    }
                    if let Some(message) = first_failure {
                        return Err(message);
                    }
                }
            }
        }
        Ok(())
    }

    async fn load_thread(&self, thread_id: &str) -> Result<Thread, StoreError> {
        if let Some(thread) = self.threads.get(thread_id).await? {
            return Ok(thread);
        }
        match self.threads.create(Some(thread_id), None).await {
            Ok(thread) => Ok(thread),
            // Created concurrently by another run.
            Err(StoreError::AlreadyExists(_)) => self
                .threads
                .get(thread_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(thread_id.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Append a completed event to the thread. Failed events are not recorded.
    async fn record(&self, thread_id: &str, event: &Event) -> Result<(), String> {
        if event.status != EventStatus::Completed {
            return Ok(());
        }
        self.threads
            .append_event(thread_id, event.clone())
            .await
            .map_err(|e| {
                error!(thread_id = %thread_id, event = %event.name, error = %e, "Failed to append event to thread");
                format!("Failed to record {} in thread {thread_id}: {e}", event.name)
            })
    }

    /// Run one step to a terminal event. Never fails; failures are recorded
    /// on the returned event.
    async fn execute_step(
        &self,
        step: &ChainStep,
        context: &Interpolator,
        thread_id: &str,
    ) -> StepRun {
        let source = format!("{}:{thread_id}", self.source);
        let mut event = Event::new(step.event.clone(), step.data.clone()).with_source(source);
        let mut skipped = false;

        match self.run_step(step, context, thread_id, &mut event).await {
            Ok(StepResult::Completed(result)) => {
                debug!(thread_id = %thread_id, event = %step.event, "Step completed");
                event.complete(result);
            }
            Ok(StepResult::Skipped(reason)) => {
                info!(thread_id = %thread_id, event = %step.event, reason = ?reason, "Step skipped");
                event.complete(json!({ "skipped": true, "reason": reason }));
                skipped = true;
            }
            Err(message) => {
                warn!(thread_id = %thread_id, event = %step.event, error = %message, "Step failed");
                event.fail(message);
            }
        }
        StepRun { event, skipped }
    }

    async fn run_step(
        &self,
        step: &ChainStep,
        context: &Interpolator,
        thread_id: &str,
        event: &mut Event,
    ) -> Result<StepResult, String> {
        let interpolated = context.interpolate(&step.data);
        if !interpolated.unresolved.is_empty() {
            debug!(
                event = %step.event,
                unresolved = interpolated.unresolved.len(),
                "Publishing with unresolved references"
            );
        }
        let mut params = interpolated.value;
        event.data = params.clone();

        let schema = self.bus.registry().schema(&step.event);
        let described = schema.as_ref().map_or(Value::Null, |s| s.describe());

        if let Some(prompt) = &step.decide {
            let decision = self
                .decide(thread_id, prompt.clone(), &params, &described)
                .await
                .map_err(|e| e.to_string())?;
            match decision.action {
                DecisionAction::Skip => return Ok(StepResult::Skipped(decision.reason)),
                DecisionAction::Continue => {
                    if let Some(updates) = decision.params {
                        merge_params(&mut params, updates);
                        event.data = params.clone();
                    }
                }
            }
        }

        if let Some(schema) = &schema {
            if let Err(invalid) = schema.validate(&params) {
                debug!(event = %step.event, error = %invalid, "Parameters invalid, asking for repair");
                let prompt = format!("{REPAIR_PROMPT}{invalid}");
                let repair = self
                    .decide(thread_id, prompt, &params, &described)
                    .await
                    .map_err(|e| e.to_string())?;
                if let Some(repaired) = repair.params {
                    params = repaired;
                    event.data = params.clone();
                }
            }
        }

        let source = event.source.clone();
        let (published, outcome) = self
            .bus
            .publish_event(&step.event, params, &source)
            .await
            .map_err(|e| e.to_string())?;
        *event = published;

        match outcome {
            PublishOutcome::Single(HandlerOutcome::Err(message)) => Err(message),
            other => Ok(StepResult::Completed(other.into_value())),
        }
    }

    async fn decide(
        &self,
        thread_id: &str,
        prompt: String,
        params: &Value,
        event_schema: &Value,
    ) -> Result<Decision, DecisionError> {
        if !self.bus.has_handler(&self.decision_event) {
            return Err(DecisionError::NoHandler(self.decision_event.clone()));
        }
        let request = DecisionRequest {
            thread_id: thread_id.to_string(),
            prompt,
            params: params.clone(),
            event_schema: event_schema.clone(),
        };
        let payload =
            serde_json::to_value(&request).map_err(|e| DecisionError::Malformed(e.to_string()))?;
        let source = format!("{}:{thread_id}", self.source);

        let reply = match self.bus.publish(&self.decision_event, payload, &source).await? {
            PublishOutcome::Single(HandlerOutcome::Ok(reply)) => reply,
            PublishOutcome::Single(HandlerOutcome::Err(message)) => {
                return Err(DecisionError::Handler(message))
            }
            PublishOutcome::Empty => {
                return Err(DecisionError::NoHandler(self.decision_event.clone()))
            }
            PublishOutcome::Keyed(replies) => {
                return Err(DecisionError::Malformed(format!(
                    "expected one decision handler, got {}",
                    replies.len()
                )))
            }
        };
        serde_json::from_value(reply).map_err(|e| DecisionError::Malformed(e.to_string()))
    }
}

/// Fold a terminal step into the run context. Failed steps end the run.
fn fold(context: &mut Interpolator, run: &StepRun) -> Result<(), String> {
    let event = &run.event;
    match event.status {
        EventStatus::Completed => {
            if !run.skipped {
                let result = event.result.clone().unwrap_or(Value::Null);
                context.add_result(&event.name, result);
            }
            Ok(())
        }
        _ => Err(format!(
            "Event {} failed: {}",
            event.name,
            event.error.as_deref().unwrap_or("unknown error")
        )),
    }
}
