//! Shared type definitions for sfn-tester.
//!
//! These types cross crate boundaries: the harness stores [`Stub`]s and
//! [`InvocationRecord`]s in the shared store, the API client decodes
//! [`ExecutionDescription`]s and [`HistoryEvent`]s from the workflow engine, and
//! callers receive a [`RunOutcome`] when a run completes.

pub mod execution;
pub mod stub;

pub use execution::{ExecutionDescription, ExecutionStatus, ExecutionSummary, HistoryEvent, InvocationRecord, RunOutcome};
pub use stub::{CallStubs, Stub, StubException};
