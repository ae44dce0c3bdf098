//! Execution driver.
//!
//! One [`ExecutionDriver`] runs one workflow at a time: rewrite the definition,
//! seed stubs, create and start it on the engine, poll it to a terminal status
//! and collect the engine history plus the ledger trace.
//!
//! Two kinds of transient infrastructure faults are retried, exactly once per
//! `run` and never both: a retryable engine error while launching, and a
//! completed run whose history carries the cold-start signature
//! ([`cold_start`]). Everything else propagates unchanged.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sfn_tester_api::{EngineError, WorkflowEngine};
use sfn_tester_types::{CallStubs, ExecutionDescription, ExecutionStatus, RunOutcome};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_ROLE_ARN, HarnessConfig};
use crate::error::HarnessError;
use crate::ledger::StubLedger;
use crate::rewrite::DefinitionRewriter;

pub mod cold_start;

pub use cold_start::is_cold_start_failure;

/// Lifecycle of the driver's current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl RunState {
    fn from_status(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Running => RunState::Running,
            ExecutionStatus::Succeeded => RunState::Succeeded,
            ExecutionStatus::TimedOut => RunState::TimedOut,
            ExecutionStatus::Aborted => RunState::Aborted,
            ExecutionStatus::Failed | ExecutionStatus::Unknown => RunState::Failed,
        }
    }
}

/// Wall-clock budget given to the run started by a cold-start retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryTimeout {
    /// The retried run gets the full timeout again.
    #[default]
    Fresh,
    /// The retried run gets whatever the first attempt left over.
    Remaining,
}

/// Per-run options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub retry_timeout: RetryTimeout,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(100_000),
            poll_interval: Duration::from_millis(100),
            retry_timeout: RetryTimeout::Fresh,
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            timeout: config.execution_timeout(),
            poll_interval: config.poll_interval(),
            retry_timeout: RetryTimeout::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry_timeout(mut self, retry_timeout: RetryTimeout) -> Self {
        self.retry_timeout = retry_timeout;
        self
    }
}

/// Engine-side naming used for every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    pub definition_prefix: String,
    pub role_arn: String,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            definition_prefix: "testStepFunction".to_string(),
            role_arn: DEFAULT_ROLE_ARN.to_string(),
        }
    }
}

impl DriverSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            definition_prefix: config.definition_prefix.clone(),
            role_arn: config.role_arn.clone(),
        }
    }
}

/// Identity of the run currently owned by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRun {
    pub run_id: String,
    pub definition_name: String,
    pub definition_ref: String,
    pub execution_ref: String,
}

/// What a best-effort cleanup managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub drained_keys: usize,
    pub stopped_executions: usize,
    pub deleted_definitions: usize,
    /// One line per step that failed; cleanup carried on regardless.
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

enum PollEvent {
    Deadline,
    Described(Result<ExecutionDescription, EngineError>),
}

/// Drives workflow runs against a [`WorkflowEngine`].
pub struct ExecutionDriver {
    engine: Arc<dyn WorkflowEngine>,
    ledger: StubLedger,
    rewriter: DefinitionRewriter,
    settings: DriverSettings,
    state: RunState,
    active: Option<ActiveRun>,
    created_definitions: Vec<String>,
}

impl ExecutionDriver {
    pub fn new(engine: Arc<dyn WorkflowEngine>, ledger: StubLedger, rewriter: DefinitionRewriter, settings: DriverSettings) -> Self {
        Self {
            engine,
            ledger,
            rewriter,
            settings,
            state: RunState::Created,
            active: None,
            created_definitions: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn active_run(&self) -> Option<&ActiveRun> {
        self.active.as_ref()
    }

    pub fn ledger(&self) -> &StubLedger {
        &self.ledger
    }

    /// Rewrite `definition`, seed `stubs`, and create and start a fresh run.
    pub async fn start(&mut self, stubs: &CallStubs, definition: &Value, input: &Value) -> Result<ActiveRun, HarnessError> {
        let routed = self.rewriter.rewrite(definition);
        for (function_name, queue) in stubs {
            self.ledger.register_stubs(function_name, queue).await?;
        }

        let run_id = Uuid::new_v4().simple().to_string();
        let definition_name = format!("{}-{}", self.settings.definition_prefix, run_id);
        let definition_ref = self
            .engine
            .create_definition(&definition_name, &routed, &self.settings.role_arn)
            .await?;
        self.created_definitions.push(definition_ref.clone());

        let run_name = chrono::Utc::now().timestamp_millis().to_string();
        let execution_ref = self.engine.start_execution(&definition_ref, &run_name, input).await?;

        info!(run_id = %run_id, definition = %definition_ref, execution = %execution_ref, "run started");
        let run = ActiveRun {
            run_id,
            definition_name,
            definition_ref,
            execution_ref,
        };
        self.state = RunState::Running;
        self.active = Some(run.clone());
        Ok(run)
    }

    /// `start`, retried once when the engine reports a retryable fault.
    ///
    /// Returns whether the retry was used. When the retry fails too, the first
    /// error is returned.
    async fn launch(&mut self, stubs: &CallStubs, definition: &Value, input: &Value) -> Result<bool, HarnessError> {
        match self.start(stubs, definition, input).await {
            Ok(_) => Ok(false),
            Err(HarnessError::Engine(error)) if error.is_retryable() => {
                warn!(%error, "launch hit a transient engine fault, retrying once");
                self.ledger.drain().await?;
                match self.start(stubs, definition, input).await {
                    Ok(_) => Ok(true),
                    Err(retry_error) => {
                        warn!(error = %retry_error, "launch retry failed");
                        Err(HarnessError::Engine(error))
                    }
                }
            }
            Err(error) => Err(error),
        }
    }

    /// Poll the active execution until it leaves RUNNING or `timeout` elapses.
    ///
    /// At most one status request is in flight. When the deadline and a status
    /// response are ready together, the deadline wins.
    pub async fn poll(&mut self, timeout: Duration, poll_interval: Duration) -> Result<ExecutionDescription, HarnessError> {
        let execution_ref = self.active.as_ref().ok_or(HarnessError::NoActiveRun)?.execution_ref.clone();
        let engine = Arc::clone(&self.engine);
        let deadline = sleep_until(Instant::now() + timeout);
        tokio::pin!(deadline);

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut deadline => PollEvent::Deadline,
                described = engine.describe_execution(&execution_ref) => PollEvent::Described(described),
            };
            let description = match event {
                PollEvent::Deadline => return Err(self.timed_out(&execution_ref, timeout)),
                PollEvent::Described(described) => described?,
            };

            if description.status.is_terminal() {
                self.state = RunState::from_status(description.status);
                debug!(execution = %execution_ref, status = ?description.status, "execution finished");
                return Ok(description);
            }

            let expired = tokio::select! {
                biased;
                _ = &mut deadline => true,
                _ = sleep(poll_interval) => false,
            };
            if expired {
                return Err(self.timed_out(&execution_ref, timeout));
            }
        }
    }

    fn timed_out(&mut self, execution_ref: &str, timeout: Duration) -> HarnessError {
        self.state = RunState::TimedOut;
        warn!(execution = %execution_ref, timeout_ms = timeout.as_millis(), "execution timed out");
        HarnessError::timeout(execution_ref, timeout.as_millis())
    }

    /// Gather the engine history and the ledger trace for a finished execution.
    pub async fn collect(&self, description: ExecutionDescription) -> Result<RunOutcome, HarnessError> {
        let history = self.engine.get_execution_history(&description.execution_arn).await?;
        let executions = self.ledger.invocations().await?;
        Ok(RunOutcome {
            executions,
            final_status: description.status,
            execution: description,
            history,
        })
    }

    async fn poll_and_collect(&mut self, options: &RunOptions, timeout: Duration) -> Result<RunOutcome, HarnessError> {
        let description = self.poll(timeout, options.poll_interval).await?;
        self.collect(description).await
    }

    /// Run `definition` with `stubs` and `input` to completion.
    pub async fn run(
        &mut self,
        stubs: &CallStubs,
        definition: &Value,
        input: &Value,
        options: &RunOptions,
    ) -> Result<RunOutcome, HarnessError> {
        let started = Instant::now();
        let launch_retried = self.launch(stubs, definition, input).await?;
        let outcome = self.poll_and_collect(options, options.timeout).await?;

        if launch_retried || !is_cold_start_failure(&outcome.history) {
            return Ok(outcome);
        }

        warn!(execution = %outcome.execution.execution_arn, "run failed with the cold-start signature, retrying once");
        self.ledger.drain().await?;
        self.start(stubs, definition, input).await?;
        let timeout = match options.retry_timeout {
            RetryTimeout::Fresh => options.timeout,
            RetryTimeout::Remaining => options.timeout.saturating_sub(started.elapsed()),
        };
        let retried = self.poll_and_collect(options, timeout).await?;

        if is_cold_start_failure(&retried.history) {
            return Err(HarnessError::transient(
                format!(
                    "executions {} and {} both failed with the cold-start signature",
                    outcome.execution.execution_arn, retried.execution.execution_arn
                ),
                outcome,
            ));
        }
        Ok(retried)
    }

    /// Drain the ledger, stop running executions and delete every definition
    /// created since the last cleanup.
    ///
    /// Never fails; each step that goes wrong is logged and recorded in the
    /// report. Definitions that could not be deleted are retried next time.
    pub async fn clean_up(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.ledger.drain().await {
            Ok(removed) => report.drained_keys = removed,
            Err(error) => {
                warn!(%error, "cleanup could not drain the ledger");
                report.failures.push(format!("drain: {error}"));
            }
        }

        let mut remaining = Vec::new();
        for definition_ref in std::mem::take(&mut self.created_definitions) {
            match self.engine.list_executions(&definition_ref).await {
                Ok(executions) => {
                    for execution in executions.iter().filter(|execution| execution.status == ExecutionStatus::Running) {
                        match self.engine.stop_execution(&execution.execution_arn).await {
                            Ok(()) => report.stopped_executions += 1,
                            Err(error) => {
                                warn!(execution = %execution.execution_arn, %error, "cleanup could not stop execution");
                                report.failures.push(format!("stop {}: {error}", execution.execution_arn));
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(definition = %definition_ref, %error, "cleanup could not list executions");
                    report.failures.push(format!("list {definition_ref}: {error}"));
                }
            }

            match self.engine.delete_definition(&definition_ref).await {
                Ok(()) => report.deleted_definitions += 1,
                Err(error) => {
                    warn!(definition = %definition_ref, %error, "cleanup could not delete definition");
                    report.failures.push(format!("delete {definition_ref}: {error}"));
                    remaining.push(definition_ref);
                }
            }
        }
        self.created_definitions = remaining;
        self.active = None;
        self.state = RunState::Created;

        info!(
            drained = report.drained_keys,
            stopped = report.stopped_executions,
            deleted = report.deleted_definitions,
            failures = report.failures.len(),
            "cleanup finished"
        );
        report
    }
}
