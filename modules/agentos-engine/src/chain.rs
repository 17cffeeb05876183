//! Chain definitions and run results.
//!
//! Wire format: a JSON array whose elements are either a step object
//! `{event, data, decide?}` or an array of step objects run in parallel.
//!
//! ```json
//! [
//!   {"event": "tools.now"},
//!   [{"event": "weather.get", "data": {"at": "{tools.now.result}"}},
//!    {"event": "calendar.list"}],
//!   {"event": "notify.send", "data": {"text": "{weather.get.result.summary}"},
//!    "decide": "Only notify if it will rain"}
//! ]
//! ```

use agentos_events::{Event, EventStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    pub event: String,
    /// Parameters; may contain `{path}` references.
    #[serde(default = "empty_object", alias = "params")]
    pub data: Value,
    /// Prompt for the decision handler, consulted before publishing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decide: Option<String>,
}

impl ChainStep {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: empty_object(),
            decide: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_decide(mut self, prompt: impl Into<String>) -> Self {
        self.decide = Some(prompt.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainElement {
    Step(ChainStep),
    Parallel(Vec<ChainStep>),
}

impl From<ChainStep> for ChainElement {
    fn from(step: ChainStep) -> Self {
        ChainElement::Step(step)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain {
    pub elements: Vec<ChainElement>,
}

impl Chain {
    pub fn new(elements: Vec<ChainElement>) -> Self {
        Self { elements }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Number of steps, counting each parallel member.
    pub fn step_count(&self) -> usize {
        self.elements
            .iter()
            .map(|e| match e {
                ChainElement::Step(_) => 1,
                ChainElement::Parallel(steps) => steps.len(),
            })
            .sum()
    }
}

impl From<Vec<ChainElement>> for Chain {
    fn from(elements: Vec<ChainElement>) -> Self {
        Self::new(elements)
    }
}

/// Compose chains in code.
///
/// ```ignore
/// let chain = ChainBuilder::new()
///     .step("tools.now")
///     .step_with("tools.date_calc", json!({"base": "{tools.now.result}", "days": 7}))
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct ChainBuilder {
    elements: Vec<ChainElement>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(self, event: impl Into<String>) -> Self {
        self.push(ChainStep::new(event))
    }

    pub fn step_with(self, event: impl Into<String>, data: Value) -> Self {
        self.push(ChainStep::new(event).with_data(data))
    }

    pub fn decide(self, event: impl Into<String>, data: Value, prompt: impl Into<String>) -> Self {
        self.push(ChainStep::new(event).with_data(data).with_decide(prompt))
    }

    pub fn parallel(mut self, steps: impl IntoIterator<Item = ChainStep>) -> Self {
        self.elements
            .push(ChainElement::Parallel(steps.into_iter().collect()));
        self
    }

    pub fn build(self) -> Chain {
        Chain::new(self.elements)
    }

    fn push(mut self, step: ChainStep) -> Self {
        self.elements.push(ChainElement::Step(step));
        self
    }
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub thread_id: String,
    /// Executed events in chain order; parallel members in declaration order.
    pub events: Vec<Event>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub total_duration_ms: f64,
}

impl ExecutionResult {
    /// Last executed event called `name`.
    pub fn event(&self, name: &str) -> Option<&Event> {
        self.events.iter().rev().find(|e| e.name == name)
    }

    /// Result of the last completed event called `name`.
    pub fn result_of(&self, name: &str) -> Option<&Value> {
        self.events
            .iter()
            .rev()
            .find(|e| e.name == name && e.status == EventStatus::Completed)
            .and_then(|e| e.result.as_ref())
    }
}
