//! Scripted in-process workflow engine for driver scenarios.
//!
//! `ScriptedEngine` interprets the small subset of the states language the
//! scenarios use (Task, Pass, Choice, Succeed, Fail; `Parameters` with `.$`
//! paths, `ResultPath`, `Catch`) and calls the real [`MockWorker`] for every
//! task, so stubs and the ledger behave exactly as they do against the real
//! engine. Faults and execution behaviour can be queued per call.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use sfn_tester_api::{EngineError, WorkflowEngine};
use sfn_tester_harness::config::HarnessConfig;
use sfn_tester_harness::ledger::StubLedger;
use sfn_tester_harness::store::{MemoryStore, SharedStore};
use sfn_tester_harness::worker::{MockWorker, WorkerReply};
use sfn_tester_harness::TestRunner;
use sfn_tester_types::{ExecutionDescription, ExecutionStatus, ExecutionSummary, HistoryEvent};

const ACCOUNT_PREFIX: &str = "arn:aws:states:us-east-1:123456789012";
const MAX_TRANSITIONS: usize = 200;

/// Fault injected into the next matching engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `ThrottlingException`, which the client marks retryable.
    Throttled,
    /// `ValidationException`, which is not retryable.
    Rejected,
}

/// How the next started execution behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Interpret the definition against the mock worker.
    Interpret,
    /// Never leave RUNNING.
    Hang,
    /// Fail the first task as if the worker endpoint refused connections.
    ColdStart,
    /// Interpret the definition, but answer every status request only after
    /// the given delay.
    SlowTerminal(Duration),
}

#[derive(Debug, Clone)]
struct ExecutionEntry {
    definition_ref: String,
    description: ExecutionDescription,
    history: Vec<HistoryEvent>,
    describe_delay: Option<Duration>,
}

#[derive(Default)]
struct EngineState {
    definitions: IndexMap<String, Value>,
    executions: IndexMap<String, ExecutionEntry>,
    create_faults: VecDeque<Fault>,
    start_faults: VecDeque<Fault>,
    modes: VecDeque<ExecutionMode>,
    describe_calls: usize,
    stopped: Vec<String>,
    deleted: Vec<String>,
}

pub struct ScriptedEngine {
    worker: MockWorker,
    state: Mutex<EngineState>,
}

impl ScriptedEngine {
    pub fn new(worker: MockWorker) -> Self {
        Self {
            worker,
            state: Mutex::new(EngineState::default()),
        }
    }

    fn with_state<T>(&self, apply: impl FnOnce(&mut EngineState) -> T) -> T {
        let mut state = self.state.lock().expect("engine state lock");
        apply(&mut state)
    }

    pub fn fail_next_create(&self, fault: Fault) {
        self.with_state(|state| state.create_faults.push_back(fault));
    }

    pub fn fail_next_start(&self, fault: Fault) {
        self.with_state(|state| state.start_faults.push_back(fault));
    }

    pub fn queue_mode(&self, mode: ExecutionMode) {
        self.with_state(|state| state.modes.push_back(mode));
    }

    pub fn definitions(&self) -> Vec<String> {
        self.with_state(|state| state.definitions.keys().cloned().collect())
    }

    pub fn deployed_document(&self, definition_ref: &str) -> Option<Value> {
        self.with_state(|state| state.definitions.get(definition_ref).cloned())
    }

    pub fn execution_count(&self) -> usize {
        self.with_state(|state| state.executions.len())
    }

    pub fn describe_calls(&self) -> usize {
        self.with_state(|state| state.describe_calls)
    }

    pub fn stopped(&self) -> Vec<String> {
        self.with_state(|state| state.stopped.clone())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.with_state(|state| state.deleted.clone())
    }

    async fn interpret(&self, document: &Value, input: Value) -> (ExecutionStatus, Option<Value>, Vec<HistoryEvent>, Option<(String, String)>) {
        let mut history = vec![event(1, "ExecutionStarted", json!({"executionStartedEventDetails": {"input": input.to_string()}}))];
        let mut data = input;
        let mut current = document.get("StartAt").and_then(Value::as_str).map(str::to_string);

        for _ in 0..MAX_TRANSITIONS {
            let Some(name) = current.take() else {
                break;
            };
            let Some(state) = document.get("States").and_then(|states| states.get(&name)) else {
                return failed(history, "States.Runtime", &format!("unknown state {name}"));
            };
            history.push(event(history.len() as i64 + 1, "StateEntered", json!({"stateEnteredEventDetails": {"name": name}})));

            match state.get("Type").and_then(Value::as_str) {
                Some("Task") => {
                    let envelope = resolve(state.get("Parameters").unwrap_or(&json!({"input.$": "$"})), &data);
                    match self.worker.invoke(envelope).await {
                        Ok(WorkerReply::Output(result)) => {
                            data = apply_result_path(data, state.get("ResultPath"), result);
                        }
                        Ok(WorkerReply::Failure(failure)) => {
                            let cause = json!({"errorMessage": failure.error_message, "errorType": failure.error_type}).to_string();
                            history.push(event(
                                history.len() as i64 + 1,
                                "LambdaFunctionFailed",
                                json!({"lambdaFunctionFailedEventDetails": {"error": failure.error_type, "cause": cause}}),
                            ));
                            match find_catcher(state, &failure.error_type) {
                                Some(catcher) => {
                                    let error_output = json!({"Error": failure.error_type, "Cause": cause});
                                    data = apply_result_path(data, catcher.get("ResultPath"), error_output);
                                    current = catcher.get("Next").and_then(Value::as_str).map(str::to_string);
                                    continue;
                                }
                                None => return failed(history, &failure.error_type, &cause),
                            }
                        }
                        Err(error) => return failed(history, "States.Runtime", &error.to_string()),
                    }
                }
                Some("Pass") => {
                    if let Some(result) = state.get("Result") {
                        data = apply_result_path(data, state.get("ResultPath"), result.clone());
                    }
                }
                Some("Choice") => {
                    current = choose(state, &data);
                    if current.is_none() {
                        return failed(history, "States.NoChoiceMatched", "no choice rule matched");
                    }
                    continue;
                }
                Some("Succeed") => break,
                Some("Fail") => {
                    let error = state.get("Error").and_then(Value::as_str).unwrap_or("States.Fail");
                    let cause = state.get("Cause").and_then(Value::as_str).unwrap_or_default();
                    return failed(history, error, cause);
                }
                other => return failed(history, "States.Runtime", &format!("unsupported state type {other:?}")),
            }

            if state.get("End").and_then(Value::as_bool) == Some(true) {
                break;
            }
            current = state.get("Next").and_then(Value::as_str).map(str::to_string);
        }

        history.push(event(
            history.len() as i64 + 1,
            "ExecutionSucceeded",
            json!({"executionSucceededEventDetails": {"output": data.to_string()}}),
        ));
        (ExecutionStatus::Succeeded, Some(data), history, None)
    }
}

#[async_trait]
impl WorkflowEngine for ScriptedEngine {
    async fn create_definition(&self, name: &str, document: &Value, _role_ref: &str) -> Result<String, EngineError> {
        self.with_state(|state| {
            if let Some(fault) = state.create_faults.pop_front() {
                return Err(fault_error("CreateStateMachine", fault));
            }
            let definition_ref = format!("{ACCOUNT_PREFIX}:stateMachine:{name}");
            state.definitions.insert(definition_ref.clone(), document.clone());
            Ok(definition_ref)
        })
    }

    async fn start_execution(&self, definition_ref: &str, run_name: &str, input: &Value) -> Result<String, EngineError> {
        let (document, mode) = self.with_state(|state| {
            if let Some(fault) = state.start_faults.pop_front() {
                return Err(fault_error("StartExecution", fault));
            }
            let document = state.definitions.get(definition_ref).cloned().ok_or_else(|| {
                EngineError::service("StartExecution", 400, "StateMachineDoesNotExist", definition_ref)
            })?;
            Ok((document, state.modes.pop_front().unwrap_or(ExecutionMode::Interpret)))
        })?;

        let machine_name = definition_ref.rsplit(':').next().unwrap_or_default();
        let execution_ref = format!("{ACCOUNT_PREFIX}:execution:{machine_name}:{run_name}");

        let (status, output, history, failure) = match mode {
            ExecutionMode::Interpret | ExecutionMode::SlowTerminal(_) => self.interpret(&document, input.clone()).await,
            ExecutionMode::Hang => (ExecutionStatus::Running, None, Vec::new(), None),
            ExecutionMode::ColdStart => failed(
                Vec::new(),
                "Lambda.SdkClientException",
                "Unable to execute HTTP request: Connect to localhost:3001 failed: Connection refused",
            ),
        };

        let description = ExecutionDescription {
            execution_arn: execution_ref.clone(),
            state_machine_arn: Some(definition_ref.to_string()),
            name: Some(run_name.to_string()),
            status,
            input: Some(input.to_string()),
            output: output.map(|output| output.to_string()),
            error: failure.as_ref().map(|(error, _)| error.clone()),
            cause: failure.map(|(_, cause)| cause),
            start_date: None,
            stop_date: None,
        };
        self.with_state(|state| {
            state.executions.insert(
                execution_ref.clone(),
                ExecutionEntry {
                    definition_ref: definition_ref.to_string(),
                    description,
                    history,
                    describe_delay: match mode {
                        ExecutionMode::SlowTerminal(delay) => Some(delay),
                        _ => None,
                    },
                },
            );
        });
        Ok(execution_ref)
    }

    async fn describe_execution(&self, execution_ref: &str) -> Result<ExecutionDescription, EngineError> {
        let (description, delay) = self.with_state(|state| {
            state.describe_calls += 1;
            state
                .executions
                .get(execution_ref)
                .map(|entry| (entry.description.clone(), entry.describe_delay))
                .ok_or_else(|| EngineError::service("DescribeExecution", 400, "ExecutionDoesNotExist", execution_ref))
        })?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(description)
    }

    async fn get_execution_history(&self, execution_ref: &str) -> Result<Vec<HistoryEvent>, EngineError> {
        self.with_state(|state| {
            state
                .executions
                .get(execution_ref)
                .map(|entry| entry.history.clone())
                .ok_or_else(|| EngineError::service("GetExecutionHistory", 400, "ExecutionDoesNotExist", execution_ref))
        })
    }

    async fn list_executions(&self, definition_ref: &str) -> Result<Vec<ExecutionSummary>, EngineError> {
        self.with_state(|state| {
            if !state.definitions.contains_key(definition_ref) {
                return Err(EngineError::service("ListExecutions", 400, "StateMachineDoesNotExist", definition_ref));
            }
            Ok(state
                .executions
                .values()
                .filter(|entry| entry.definition_ref == definition_ref)
                .map(|entry| ExecutionSummary {
                    execution_arn: entry.description.execution_arn.clone(),
                    status: entry.description.status,
                    name: entry.description.name.clone(),
                })
                .collect())
        })
    }

    async fn stop_execution(&self, execution_ref: &str) -> Result<(), EngineError> {
        self.with_state(|state| {
            let entry = state
                .executions
                .get_mut(execution_ref)
                .ok_or_else(|| EngineError::service("StopExecution", 400, "ExecutionDoesNotExist", execution_ref))?;
            entry.description.status = ExecutionStatus::Aborted;
            state.stopped.push(execution_ref.to_string());
            Ok(())
        })
    }

    async fn delete_definition(&self, definition_ref: &str) -> Result<(), EngineError> {
        self.with_state(|state| {
            state.definitions.shift_remove(definition_ref);
            state.deleted.push(definition_ref.to_string());
            Ok(())
        })
    }
}

fn fault_error(operation: &str, fault: Fault) -> EngineError {
    match fault {
        Fault::Throttled => EngineError::service(operation, 400, "ThrottlingException", "Rate exceeded"),
        Fault::Rejected => EngineError::service(operation, 400, "ValidationException", "invalid request"),
    }
}

fn event(id: i64, event_type: &str, details: Value) -> HistoryEvent {
    let mut value = json!({"id": id, "type": event_type, "timestamp": 0});
    if let (Some(target), Value::Object(details)) = (value.as_object_mut(), details) {
        target.extend(details);
    }
    serde_json::from_value(value).expect("history event")
}

fn failed(
    mut history: Vec<HistoryEvent>,
    error: &str,
    cause: &str,
) -> (ExecutionStatus, Option<Value>, Vec<HistoryEvent>, Option<(String, String)>) {
    history.push(event(
        history.len() as i64 + 1,
        "ExecutionFailed",
        json!({"executionFailedEventDetails": {"error": error, "cause": cause}}),
    ));
    (ExecutionStatus::Failed, None, history, Some((error.to_string(), cause.to_string())))
}

fn select<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut selected = data;
    for segment in path.strip_prefix('$')?.split('.').filter(|segment| !segment.is_empty()) {
        selected = selected.get(segment)?;
    }
    Some(selected)
}

fn resolve(template: &Value, data: &Value) -> Value {
    match template {
        Value::Object(fields) => {
            let mut resolved = Map::new();
            for (key, value) in fields {
                match (key.strip_suffix(".$"), value.as_str()) {
                    (Some(stripped), Some(path)) => {
                        resolved.insert(stripped.to_string(), select(data, path).cloned().unwrap_or(Value::Null));
                    }
                    _ => {
                        resolved.insert(key.clone(), resolve(value, data));
                    }
                }
            }
            Value::Object(resolved)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve(item, data)).collect()),
        other => other.clone(),
    }
}

fn apply_result_path(mut data: Value, result_path: Option<&Value>, result: Value) -> Value {
    let path = match result_path {
        None => return result,
        Some(Value::Null) => return data,
        Some(path) => path.as_str().unwrap_or("$"),
    };
    let segments: Vec<&str> = path.trim_start_matches('$').split('.').filter(|segment| !segment.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return result;
    };

    let mut target = &mut data;
    for segment in parents {
        if !target.is_object() {
            *target = json!({});
        }
        target = target
            .as_object_mut()
            .expect("object")
            .entry(segment.to_string())
            .or_insert_with(|| json!({}));
    }
    if !target.is_object() {
        *target = json!({});
    }
    target.as_object_mut().expect("object").insert(last.to_string(), result);
    data
}

fn find_catcher<'a>(state: &'a Value, error_type: &str) -> Option<&'a Value> {
    state.get("Catch")?.as_array()?.iter().find(|catcher| {
        catcher
            .get("ErrorEquals")
            .and_then(Value::as_array)
            .is_some_and(|errors| errors.iter().any(|error| error == error_type || error == "States.ALL"))
    })
}

fn choose(state: &Value, data: &Value) -> Option<String> {
    let rules = state.get("Choices").and_then(Value::as_array).cloned().unwrap_or_default();
    for rule in &rules {
        let Some(variable) = rule.get("Variable").and_then(Value::as_str).and_then(|path| select(data, path)) else {
            continue;
        };
        let matched = if let Some(bound) = rule.get("NumericGreaterThan").and_then(Value::as_f64) {
            variable.as_f64().is_some_and(|value| value > bound)
        } else if let Some(bound) = rule.get("NumericLessThanEquals").and_then(Value::as_f64) {
            variable.as_f64().is_some_and(|value| value <= bound)
        } else if let Some(bound) = rule.get("NumericEquals").and_then(Value::as_f64) {
            variable.as_f64() == Some(bound)
        } else if let Some(expected) = rule.get("BooleanEquals").and_then(Value::as_bool) {
            variable.as_bool() == Some(expected)
        } else if let Some(expected) = rule.get("StringEquals").and_then(Value::as_str) {
            variable.as_str() == Some(expected)
        } else {
            false
        };
        if matched {
            return rule.get("Next").and_then(Value::as_str).map(str::to_string);
        }
    }
    state.get("Default").and_then(Value::as_str).map(str::to_string)
}

/// A runner wired to a scripted engine over one in-memory store.
pub struct Fixture {
    pub runner: TestRunner,
    pub engine: Arc<ScriptedEngine>,
    pub store: Arc<MemoryStore>,
}

pub fn fixture() -> Fixture {
    let config = HarnessConfig::default();
    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn SharedStore> = store.clone();
    let worker = MockWorker::new(StubLedger::new(Arc::clone(&shared), config.namespace.clone()));
    let engine = Arc::new(ScriptedEngine::new(worker));
    let runner = TestRunner::with_components(config, engine.clone(), shared);
    Fixture { runner, engine, store }
}

/// Linear two-task workflow: a task without parameters feeding one with parameters.
pub fn two_task_definition() -> Value {
    json!({
        "StartAt": "FirstStep",
        "States": {
            "FirstStep": {
                "Type": "Task",
                "Resource": "MyFirstLambda",
                "ResultPath": "$.firstResult",
                "Next": "Final",
                "TimeoutSeconds": 300
            },
            "Final": {
                "Type": "Task",
                "Resource": "FinalLambda",
                "Parameters": {"SomeEndParameters.$": "$.firstResult.count"},
                "End": true
            }
        }
    })
}
