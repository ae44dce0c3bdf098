//! Local integration-test harness for Step Functions workflows.
//!
//! A test registers canned responses (stubs) per function, hands a workflow
//! definition to the harness and gets back the ordered trace of every function
//! invocation the engine made, together with the engine's own verdict.
//!
//! - [`rewrite`] routes every task to the single mock worker.
//! - [`store`] and [`ledger`] hold the stubs and the invocation trace.
//! - [`worker`] serves stubs to the engine over the Lambda Invoke API.
//! - [`driver`] creates, starts, polls and cleans up runs.
//! - [`environment`] provisions Step Functions Local and Redis with docker compose.
//! - [`runner`] ties everything together behind [`TestRunner`].

pub mod config;
pub mod driver;
pub mod environment;
pub mod error;
pub mod ledger;
pub mod rewrite;
pub mod runner;
pub mod store;
pub mod worker;

pub use config::{HarnessConfig, load_config};
pub use driver::{CleanupReport, ExecutionDriver, RetryTimeout, RunOptions, RunState};
pub use error::HarnessError;
pub use ledger::StubLedger;
pub use rewrite::{DefinitionRewriter, parse_definition};
pub use runner::{SetUpOptions, TestRunner};
pub use worker::MockWorker;

pub use sfn_tester_types::{CallStubs, InvocationRecord, RunOutcome, Stub};
