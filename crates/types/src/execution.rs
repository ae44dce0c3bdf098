//! Execution-side records: what the workflow engine reports and what the mock
//! worker observed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status reported by the workflow engine for one execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
    /// Any status this crate does not know about yet.
    #[serde(other)]
    Unknown,
}

impl ExecutionStatus {
    /// True once the engine will not change this execution's status again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// One call the mock worker received, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRecord {
    /// Logical function the task step was routed from.
    pub function_name: String,
    /// Effective payload delivered to the function.
    pub payload: Value,
}

impl InvocationRecord {
    pub fn new(function_name: impl Into<String>, payload: Value) -> Self {
        Self {
            function_name: function_name.into(),
            payload,
        }
    }
}

/// `DescribeExecution` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDescription {
    pub execution_arn: String,
    #[serde(default)]
    pub state_machine_arn: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub status: ExecutionStatus,
    /// JSON text of the execution input.
    #[serde(default)]
    pub input: Option<String>,
    /// JSON text of the execution output, present once the execution succeeded.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub start_date: Option<Value>,
    #[serde(default)]
    pub stop_date: Option<Value>,
}

impl ExecutionDescription {
    /// Parse the execution output, if any, into JSON.
    pub fn output_json(&self) -> Option<Value> {
        self.output.as_deref().and_then(|text| serde_json::from_str(text).ok())
    }
}

/// Entry returned by `ListExecutions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub execution_arn: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub name: Option<String>,
}

/// One event of an execution's history.
///
/// Only the id and type are modelled; the type-specific `*EventDetails` object and
/// any other fields are kept verbatim in `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub timestamp: Value,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl HistoryEvent {
    /// Iterate the `error`/`cause` strings found in this event's detail objects.
    pub fn failure_texts(&self) -> impl Iterator<Item = &str> {
        self.details
            .values()
            .filter_map(Value::as_object)
            .flat_map(|detail| ["error", "cause"].into_iter().filter_map(move |field| detail.get(field)))
            .filter_map(Value::as_str)
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    /// Ledger trace: every mock worker invocation in global order.
    pub executions: Vec<InvocationRecord>,
    /// Terminal status reported by the engine.
    pub final_status: ExecutionStatus,
    /// Last description returned by the engine.
    pub execution: ExecutionDescription,
    /// The engine's own execution history.
    pub history: Vec<HistoryEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_uses_engine_spelling() {
        let status: ExecutionStatus = serde_json::from_value(json!("TIMED_OUT")).expect("status");
        assert_eq!(status, ExecutionStatus::TimedOut);
        let unknown: ExecutionStatus = serde_json::from_value(json!("PENDING_REDRIVE")).expect("status");
        assert_eq!(unknown, ExecutionStatus::Unknown);
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Aborted.is_terminal());
    }

    #[test]
    fn history_event_keeps_details() {
        let event: HistoryEvent = serde_json::from_value(json!({
            "id": 4,
            "previousEventId": 3,
            "timestamp": 1_700_000_000.5,
            "type": "LambdaFunctionFailed",
            "lambdaFunctionFailedEventDetails": {"error": "Lambda.SdkClientException", "cause": "Unable to execute HTTP request"}
        }))
        .expect("event");

        assert_eq!(event.event_type, "LambdaFunctionFailed");
        assert_eq!(event.details["previousEventId"], json!(3));
        let texts: Vec<&str> = event.failure_texts().collect();
        assert_eq!(texts, vec!["Lambda.SdkClientException", "Unable to execute HTTP request"]);
    }

    #[test]
    fn invocation_record_uses_camel_case() {
        let record = InvocationRecord::new("FinalLambda", json!({"SomeEndParameters": 3}));
        assert_eq!(
            serde_json::to_value(&record).expect("serialize"),
            json!({"functionName": "FinalLambda", "payload": {"SomeEndParameters": 3}})
        );
    }

    #[test]
    fn description_output_parses() {
        let description: ExecutionDescription = serde_json::from_value(json!({
            "executionArn": "arn:exec",
            "status": "SUCCEEDED",
            "output": "{\"done\":true}"
        }))
        .expect("description");
        assert_eq!(description.output_json(), Some(json!({"done": true})));
    }
}
