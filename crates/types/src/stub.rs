//! Canned responses registered for simulated functions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stub queues keyed by function name, preserving the order callers declared them in.
pub type CallStubs = IndexMap<String, Vec<Stub>>;

/// A canned response for one invocation of a simulated function.
///
/// On the wire a stub is either `{"result": <value>}` or
/// `{"exception": {"type": "...", "message": "..."}}`.
///
/// Decoding is strict: any other shape, including an exception without a
/// `type` or a misspelled key, is rejected rather than read as a null result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "WireStub")]
pub enum Stub {
    /// The invocation fails with the declared error.
    Exception { exception: StubException },
    /// The invocation succeeds and returns `result` as the task output.
    Result { result: Value },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExceptionWire {
    exception: StubException,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ResultWire {
    result: Value,
}

#[derive(Deserialize)]
#[serde(
    untagged,
    expecting = r#"a stub of the form {"result": <value>} or {"exception": {"type": "...", "message": "..."}}"#
)]
enum WireStub {
    Exception(ExceptionWire),
    Result(ResultWire),
}

impl From<WireStub> for Stub {
    fn from(wire: WireStub) -> Self {
        match wire {
            WireStub::Exception(ExceptionWire { exception }) => Stub::Exception { exception },
            WireStub::Result(ResultWire { result }) => Stub::Result { result },
        }
    }
}

impl Stub {
    /// Build a stub that returns `result`.
    pub fn result(result: Value) -> Self {
        Self::Result { result }
    }

    /// Build a stub that fails with `error_type` and `message`.
    pub fn exception(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exception {
            exception: StubException {
                r#type: error_type.into(),
                message: message.into(),
            },
        }
    }
}

/// Error descriptor carried by an exception stub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubException {
    /// Error name the workflow engine matches in `Catch`/`Retry` rules.
    pub r#type: String,
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_and_exception_shapes_deserialize() {
        let stubs: Vec<Stub> = serde_json::from_value(json!([
            {"result": {"count": 3}},
            {"exception": {"type": "States.Custom", "message": "boom"}},
            {"result": null},
        ]))
        .expect("stubs decode");

        assert_eq!(stubs[0], Stub::result(json!({"count": 3})));
        assert_eq!(stubs[1], Stub::exception("States.Custom", "boom"));
        assert_eq!(stubs[2], Stub::result(Value::Null));
    }

    #[test]
    fn malformed_stubs_are_rejected() {
        for malformed in [
            json!({}),
            json!({"exception": {"message": "m"}}),
            json!({"exceptoin": {"type": "CustomError", "message": "m"}}),
            json!({"exception": {"type": "CustomError", "mesage": "m"}}),
            json!({"count": 3}),
            json!({"result": 1, "extra": true}),
        ] {
            let decoded = serde_json::from_value::<Stub>(malformed.clone());
            assert!(decoded.is_err(), "{malformed} decoded as {decoded:?}");
        }
    }

    #[test]
    fn exception_message_may_be_omitted() {
        let stub: Stub = serde_json::from_value(json!({"exception": {"type": "CustomError"}})).expect("decode");
        assert_eq!(stub, Stub::exception("CustomError", ""));
    }

    #[test]
    fn malformed_stub_inside_call_stubs_fails_the_whole_document() {
        let decoded = serde_json::from_value::<CallStubs>(json!({
            "Risky": [{"exception": {"message": "no type"}}]
        }));
        assert!(decoded.is_err());
    }

    #[test]
    fn exception_serializes_with_type_field() {
        let value = serde_json::to_value(Stub::exception("MyError", "bad input")).expect("serialize");
        assert_eq!(value, json!({"exception": {"type": "MyError", "message": "bad input"}}));
    }

    #[test]
    fn call_stubs_keep_declaration_order() {
        let stubs: CallStubs = serde_json::from_str(r#"{"Zeta": [], "Alpha": [{"result": 1}]}"#).expect("decode");
        let names: Vec<&str> = stubs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
    }
}
