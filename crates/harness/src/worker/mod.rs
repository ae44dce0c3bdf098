//! Mock worker: the single invocation target every rewritten task calls.
//!
//! The worker owns no data. Each invocation is appended to the ledger first and
//! the stub is then selected by that invocation's own ledger position, so the
//! worker can serve any number of concurrent invocations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sfn_tester_types::Stub;
use tracing::{debug, warn};

use crate::ledger::{LedgerError, StubLedger};
use crate::rewrite::DEFAULT_IDENTITY_KEY;

mod server;

pub use server::{INVOKE_ROUTE, MockWorkerServer, RunningMockWorkerServer};

/// Error type reported when no stub exists for an invocation.
pub const STUB_NOT_FOUND_ERROR: &str = "StubNotFoundError";
/// Error type reported when the envelope carries no identity tag.
pub const INVALID_ENVELOPE_ERROR: &str = "InvalidEnvelope";

/// Task-level failure handed back to the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    pub error_type: String,
    pub error_message: String,
}

impl TaskFailure {
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
        }
    }
}

/// What the worker answers for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    /// Task output.
    Output(Value),
    /// The task fails; the engine applies the state's `Retry`/`Catch` rules.
    Failure(TaskFailure),
}

/// Stub-serving invocation target.
#[derive(Clone)]
pub struct MockWorker {
    ledger: StubLedger,
    identity_key: String,
}

impl MockWorker {
    pub fn new(ledger: StubLedger) -> Self {
        Self::with_identity_key(ledger, DEFAULT_IDENTITY_KEY)
    }

    pub fn with_identity_key(ledger: StubLedger, identity_key: impl Into<String>) -> Self {
        Self {
            ledger,
            identity_key: identity_key.into(),
        }
    }

    pub fn ledger(&self) -> &StubLedger {
        &self.ledger
    }

    /// Serve one invocation envelope.
    ///
    /// Missing stubs are task outcomes. Only store and ledger faults surface as
    /// `Err`; those are transport faults.
    pub async fn invoke(&self, envelope: Value) -> Result<WorkerReply, LedgerError> {
        let Some(function_name) = envelope.get(&self.identity_key).and_then(Value::as_str).map(str::to_string) else {
            warn!(identity_key = %self.identity_key, "invocation envelope carries no identity tag");
            return Ok(WorkerReply::Failure(TaskFailure::new(
                INVALID_ENVELOPE_ERROR,
                format!("invocation envelope has no string '{}' field", self.identity_key),
            )));
        };
        let payload = self.effective_payload(envelope);

        let position = self.ledger.record_invocation(&function_name, payload).await?;

        match self.ledger.consume_stub_at(&function_name, position).await {
            Ok(Stub::Result { result }) => {
                debug!(function = %function_name, "serving stub result");
                Ok(WorkerReply::Output(result))
            }
            Ok(Stub::Exception { exception }) => {
                debug!(function = %function_name, error_type = %exception.r#type, "serving stub exception");
                Ok(WorkerReply::Failure(TaskFailure::new(exception.r#type, exception.message)))
            }
            Err(error) if error.is_stub_not_found() => {
                warn!(function = %function_name, %error, "no stub for invocation");
                Ok(WorkerReply::Failure(TaskFailure::new(STUB_NOT_FOUND_ERROR, error.to_string())))
            }
            Err(error) => Err(error),
        }
    }

    /// `input` when the envelope carries it, otherwise the envelope minus the identity tag.
    fn effective_payload(&self, envelope: Value) -> Value {
        match envelope {
            Value::Object(mut fields) => match fields.shift_remove("input") {
                Some(input) => input,
                None => {
                    fields.shift_remove(&self.identity_key);
                    Value::Object(fields)
                }
            },
            other => other,
        }
    }
}
