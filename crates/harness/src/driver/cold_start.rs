//! Cold-start fault signature.
//!
//! When the worker endpoint is not accepting connections yet, the engine's
//! Lambda client fails the task with `Lambda.SdkClientException` and a transport
//! message as the cause. Such a run says nothing about the workflow under test.
//!
//! This is a string match on engine-produced text. It is brittle by nature: an
//! engine upgrade that rewords these messages silently disables the retry.

use once_cell::sync::Lazy;
use regex::Regex;
use sfn_tester_types::HistoryEvent;

/// Error name the engine reports when its Lambda client cannot reach the worker.
pub const SDK_CLIENT_ERROR: &str = "Lambda.SdkClientException";

static TRANSPORT_CAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(unable to execute http request|connection refused|read timed out|connect timed out)")
        .expect("valid cold-start cause pattern")
});

/// True when `history` carries the cold-start fault signature.
pub fn is_cold_start_failure(history: &[HistoryEvent]) -> bool {
    history
        .iter()
        .flat_map(|event| event.failure_texts())
        .any(|text| text == SDK_CLIENT_ERROR || TRANSPORT_CAUSE.is_match(text))
}
