//! Harness-level error type.

use sfn_tester_api::EngineError;
use sfn_tester_types::RunOutcome;
use thiserror::Error;

use crate::config::ConfigError;
use crate::environment::EnvironmentError;
use crate::ledger::LedgerError;
use crate::rewrite::DefinitionError;
use crate::store::StoreError;

/// Errors surfaced by the driver and the test runner.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("execution {execution_ref} did not finish within {timeout_ms} ms")]
    Timeout { execution_ref: String, timeout_ms: u128 },

    /// The retry hit the same fault. `outcome` is the first attempt's result.
    #[error("transient infrastructure fault persisted after one retry: {reason}")]
    TransientInfrastructure { reason: String, outcome: Box<RunOutcome> },

    #[error("mock worker server failed: {0}")]
    WorkerServer(String),

    #[error("no run has been started")]
    NoActiveRun,
}

impl HarnessError {
    pub fn timeout(execution_ref: impl Into<String>, timeout_ms: u128) -> Self {
        Self::Timeout {
            execution_ref: execution_ref.into(),
            timeout_ms,
        }
    }

    pub fn transient(reason: impl Into<String>, outcome: RunOutcome) -> Self {
        Self::TransientInfrastructure {
            reason: reason.into(),
            outcome: Box::new(outcome),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }

    /// Outcome of the original failed attempt, when the error carries one.
    pub fn failed_outcome(&self) -> Option<&RunOutcome> {
        match self {
            HarnessError::TransientInfrastructure { outcome, .. } => Some(&**outcome),
            _ => None,
        }
    }
}
