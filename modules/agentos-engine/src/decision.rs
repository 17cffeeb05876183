//! The decision handshake between a chain step and the decision handler.
//!
//! The handler is an ordinary registered event (by default `agent.decide`).
//! It receives a `DecisionRequest` and replies with a `Decision`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prompt used when a step's parameters fail validation.
pub const REPAIR_PROMPT: &str = "Correct the following parameters to match the schema. Current error: ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub thread_id: String,
    pub prompt: String,
    pub params: Value,
    /// JSON Schema of the step's target event, or `null`.
    #[serde(default)]
    pub event_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Continue,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn proceed() -> Self {
        Self {
            action: DecisionAction::Continue,
            params: None,
            reason: None,
        }
    }

    pub fn proceed_with(params: Value) -> Self {
        Self {
            params: Some(params),
            ..Self::proceed()
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Skip,
            params: None,
            reason: Some(reason.into()),
        }
    }
}

/// Overlay `replacement` onto `params`. Objects merge key by key; anything
/// else replaces the parameters outright.
pub fn merge_params(params: &mut Value, replacement: Value) {
    match (params, replacement) {
        (Value::Object(current), Value::Object(updates)) => current.extend(updates),
        (params, replacement) => *params = replacement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_handler_replies() {
        let skip: Decision =
            serde_json::from_value(json!({"action": "skip", "reason": "dry"})).unwrap();
        assert_eq!(skip, Decision::skip("dry"));

        let go: Decision =
            serde_json::from_value(json!({"action": "continue", "params": {"x": 2}})).unwrap();
        assert_eq!(go, Decision::proceed_with(json!({"x": 2})));

        assert!(serde_json::from_value::<Decision>(json!({"action": "maybe"})).is_err());
        assert!(serde_json::from_value::<Decision>(json!("continue")).is_err());
    }

    #[test]
    fn request_uses_camel_case() {
        let request = DecisionRequest {
            thread_id: "t1".into(),
            prompt: "go?".into(),
            params: json!({}),
            event_schema: Value::Null,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["threadId"], "t1");
        assert!(value.get("eventSchema").is_some());
    }

    #[test]
    fn merge_overlays_objects() {
        let mut params = json!({"a": 1, "b": 2});
        merge_params(&mut params, json!({"b": 3, "c": 4}));
        assert_eq!(params, json!({"a": 1, "b": 3, "c": 4}));

        merge_params(&mut params, json!("replaced"));
        assert_eq!(params, json!("replaced"));
    }
}
