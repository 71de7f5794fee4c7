//! The JSON embedding interface: compile-and-run requests, typed responses,
//! and `forget` pruning.

use minim::{embed, shared, ErrorKind, Machine, NoPrint};
use serde_json::{json, Value as Json};

fn machine() -> Machine {
    Machine::with_print("", shared(NoPrint)).expect("empty program compiles")
}

#[test]
fn response_reports_requested_variables() {
    let mut m = machine();
    let request = r#"{"variables": ["x", "l", "p"], "code": "x = 41 + 1\nl = [1, 2.5, \"s\"]\np = {\"a\": true}"}"#;
    let response = embed::run_request(&mut m, request, false).expect("request runs");
    let parsed: Json = serde_json::from_str(&response).expect("valid json");
    assert_eq!(parsed["x"], json!(42));
    assert_eq!(parsed["l"], json!([1, 2.5, "s"]));
    assert_eq!(parsed["p"], json!({"a": true}));
}

#[test]
fn unknown_variables_come_back_null() {
    let mut m = machine();
    let request = r#"{"variables": ["ghost"], "code": "x = 1"}"#;
    let response = embed::run_request(&mut m, request, false).expect("request runs");
    let parsed: Json = serde_json::from_str(&response).expect("valid json");
    assert_eq!(parsed["ghost"], Json::Null);
}

#[test]
fn state_persists_across_requests() {
    let mut m = machine();
    embed::run_request(&mut m, r#"{"variables": [], "code": "x = 40"}"#, false).expect("first");
    let response =
        embed::run_request(&mut m, r#"{"variables": ["y"], "code": "y = x + 2"}"#, false).expect("second");
    let parsed: Json = serde_json::from_str(&response).expect("valid json");
    assert_eq!(parsed["y"], json!(42));
}

#[test]
fn forget_prunes_request_blocks_but_keeps_values() {
    let mut m = machine();
    embed::run_request(&mut m, r#"{"variables": [], "code": "x = 40"}"#, true).expect("first");
    // values survive forgetting the compiled blocks
    let response =
        embed::run_request(&mut m, r#"{"variables": ["y"], "code": "y = x + 2"}"#, true).expect("second");
    let parsed: Json = serde_json::from_str(&response).expect("valid json");
    assert_eq!(parsed["y"], json!(42));
}

#[test]
fn oversized_integers_fall_back_to_strings() {
    let mut m = machine();
    let request = r#"{"variables": ["big"], "code": "big = 2^100"}"#;
    let response = embed::run_request(&mut m, request, false).expect("request runs");
    let parsed: Json = serde_json::from_str(&response).expect("valid json");
    assert_eq!(parsed["big"], json!("1267650600228229401496703205376"));
}

#[test]
fn malformed_requests_fail_with_json_kind() {
    let mut m = machine();
    let err = embed::run_request(&mut m, "not json at all", false).expect_err("must fail");
    assert_eq!(err.kind, ErrorKind::Json);
}

#[test]
fn runtime_errors_surface_from_the_request() {
    let mut m = machine();
    let err = embed::run_request(&mut m, r#"{"variables": [], "code": "x = 1 // 0"}"#, false)
        .expect_err("division by zero");
    assert_eq!(err.kind, ErrorKind::ZeroDivision);
}
