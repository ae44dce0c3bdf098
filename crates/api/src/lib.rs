//! Workflow engine client.
//!
//! The harness talks to the workflow engine exclusively through the
//! [`WorkflowEngine`] trait. [`StepFunctionsClient`] implements it against the
//! AWS Step Functions JSON 1.0 protocol as served by Step Functions Local, so
//! no AWS SDK or real credentials are involved.
//!
//! # Example
//!
//! ```ignore
//! use sfn_tester_api::{StepFunctionsClient, WorkflowEngine};
//!
//! let client = StepFunctionsClient::new("http://localhost:8083", "us-east-1")?;
//! let arn = client
//!     .create_definition("demo", &serde_json::json!({"StartAt": "Done", "States": {"Done": {"Type": "Succeed"}}}), "arn:aws:iam::012345678901:role/DummyRole")
//!     .await?;
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sfn_tester_types::{ExecutionDescription, ExecutionSummary, HistoryEvent};

mod client;
mod error;

pub use client::StepFunctionsClient;
pub use error::EngineError;

/// Operations the harness needs from a workflow engine.
///
/// Every method is one network round trip (or a sequence of them for paginated
/// reads); none of them is assumed atomic with any other.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Register `document` under `name` and return the definition reference.
    async fn create_definition(&self, name: &str, document: &Value, role_ref: &str) -> Result<String, EngineError>;

    /// Start an execution of `definition_ref` and return the execution reference.
    async fn start_execution(&self, definition_ref: &str, run_name: &str, input: &Value) -> Result<String, EngineError>;

    /// Fetch the current status of an execution.
    async fn describe_execution(&self, execution_ref: &str) -> Result<ExecutionDescription, EngineError>;

    /// Fetch the complete event history of an execution.
    async fn get_execution_history(&self, execution_ref: &str) -> Result<Vec<HistoryEvent>, EngineError>;

    /// List every execution started from `definition_ref`.
    async fn list_executions(&self, definition_ref: &str) -> Result<Vec<ExecutionSummary>, EngineError>;

    /// Forcibly stop a running execution.
    async fn stop_execution(&self, execution_ref: &str) -> Result<(), EngineError>;

    /// Delete a definition.
    async fn delete_definition(&self, definition_ref: &str) -> Result<(), EngineError>;
}
