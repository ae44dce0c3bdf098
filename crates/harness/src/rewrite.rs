//! Definition rewriting.
//!
//! A workflow definition is rewritten so that every `Task` state invokes the
//! single mock worker, tagged with the resource it originally pointed at, and so
//! that waits, retry intervals and timeouts collapse to test-friendly values.
//! Routing and branching structure is never touched.
//!
//! The whole transformation is one generic walk ([`map_values_deep`]) driven by
//! the policy in [`DefinitionRewriter::route`].

use serde_json::{Map, Value, json};
use thiserror::Error;

/// Parameters key carrying the original task resource to the mock worker.
pub const DEFAULT_IDENTITY_KEY: &str = "FunctionName";
/// Resource every rewritten task invokes.
pub const DEFAULT_WORKER_RESOURCE: &str = "arn:aws:lambda:us-east-1:123456789012:function:MockFunction";
/// Value forced onto every `TimeoutSeconds` field.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Definition text that cannot be used as a workflow document.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("definition is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("definition must be a JSON object with a 'States' map")]
    NotAWorkflow,
}

/// Parse workflow definition text.
///
/// Only the outer shape is checked; everything inside `States` is left to the
/// engine.
pub fn parse_definition(text: &str) -> Result<Value, DefinitionError> {
    let definition: Value = serde_json::from_str(text)?;
    match definition.get("States") {
        Some(Value::Object(_)) => Ok(definition),
        _ => Err(DefinitionError::NotAWorkflow),
    }
}

/// Rewrites workflow definitions so they run against the mock worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionRewriter {
    identity_key: String,
    worker_resource: String,
    timeout_seconds: u64,
}

impl Default for DefinitionRewriter {
    fn default() -> Self {
        Self {
            identity_key: DEFAULT_IDENTITY_KEY.to_string(),
            worker_resource: DEFAULT_WORKER_RESOURCE.to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl DefinitionRewriter {
    pub fn new(identity_key: impl Into<String>, worker_resource: impl Into<String>, timeout_seconds: u64) -> Self {
        Self {
            identity_key: identity_key.into(),
            worker_resource: worker_resource.into(),
            timeout_seconds,
        }
    }

    /// Parameters key under which the original resource is passed along.
    pub fn identity_key(&self) -> &str {
        &self.identity_key
    }

    /// Resource that rewritten tasks invoke.
    pub fn worker_resource(&self) -> &str {
        &self.worker_resource
    }

    /// Rewrite `definition`. Total: any JSON value is accepted and unknown
    /// fields pass through unchanged.
    ///
    /// ```rust
    /// use serde_json::json;
    /// use sfn_tester_harness::DefinitionRewriter;
    ///
    /// let routed = DefinitionRewriter::default().rewrite(&json!({
    ///     "StartAt": "First",
    ///     "States": {"First": {"Type": "Task", "Resource": "MyLambda", "End": true}}
    /// }));
    /// assert_eq!(routed["States"]["First"]["Parameters"]["FunctionName"], "MyLambda");
    /// assert_eq!(routed["States"]["First"]["Parameters"]["input.$"], "$");
    /// ```
    pub fn rewrite(&self, definition: &Value) -> Value {
        map_values_deep(definition.clone(), &|key, value| self.route(key, value))
    }

    /// Policy applied to every value reached by the walk, `key` being the field
    /// name it sits under (`None` for array items).
    fn route(&self, key: Option<&str>, value: Value) -> Value {
        if let Value::Object(node) = &value {
            match node.get("Type").and_then(Value::as_str) {
                Some("Task") if node.contains_key("Resource") => return Value::Object(self.route_task(node)),
                Some("Wait") if node.contains_key("Seconds") => {
                    let mut node = node.clone();
                    node.insert("Seconds".to_string(), json!(0));
                    return Value::Object(node);
                }
                _ => {}
            }
        }

        match key {
            Some("IntervalSeconds") => json!(0),
            Some("TimeoutSeconds") => json!(self.timeout_seconds),
            _ => value,
        }
    }

    fn route_task(&self, node: &Map<String, Value>) -> Map<String, Value> {
        let original_resource = node.get("Resource").cloned().unwrap_or(Value::Null);
        let parameters = match node.get("Parameters") {
            Some(original_parameters) => json!({
                self.identity_key.as_str(): original_resource,
                "input": original_parameters,
            }),
            None => json!({
                self.identity_key.as_str(): original_resource,
                "input.$": "$",
            }),
        };

        let mut routed = Map::with_capacity(node.len() + 1);
        for (field, value) in node {
            match field.as_str() {
                "Resource" => {
                    routed.insert(field.clone(), Value::String(self.worker_resource.clone()));
                    if !node.contains_key("Parameters") {
                        routed.insert("Parameters".to_string(), parameters.clone());
                    }
                }
                "Parameters" => {
                    routed.insert(field.clone(), parameters.clone());
                }
                _ => {
                    routed.insert(field.clone(), value.clone());
                }
            }
        }
        routed
    }
}

/// Walk `value`, replacing every nested value with `policy(key, value)` and then
/// descending into the replacement's own children.
///
/// The root itself is never passed to `policy`; array items are passed with a
/// `None` key.
pub fn map_values_deep<F>(value: Value, policy: &F) -> Value
where
    F: Fn(Option<&str>, Value) -> Value,
{
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| map_values_deep(policy(None, item), policy))
                .collect(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(key, child)| {
                    let transformed = policy(Some(key.as_str()), child);
                    (key, map_values_deep(transformed, policy))
                })
                .collect(),
        ),
        scalar => scalar,
    }
}
