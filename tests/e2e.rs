/// End-to-end tests: run the `nata` binary and compare output.
use std::io::Write;
use std::process::{Command, Output, Stdio};

fn run(args: &[&str], input: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nata"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .and_then(|mut child| {
            child
                .stdin
                .take()
                .expect("stdin is piped")
                .write_all(input.as_bytes())
                .expect("write stdin");
            child.wait_with_output()
        })
        .expect("failed to run nata")
}

fn nata(args: &[&str], input: &str) -> String {
    let output = run(args, input);
    assert!(
        output.status.success(),
        "nata exited with {}: stderr={}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("nata output was not valid UTF-8")
}

const DATA: &str = r#"{"a":{"b":[1,2,3]},"users":[{"n":"A","age":30},{"n":"B","age":40}]}"#;

#[test]
fn identity_compact() {
    let out = nata(&["-c", "$"], r#"{"a":1,"b":2}"#);
    assert_eq!(out.trim(), r#"{"a":1,"b":2}"#);
}

#[test]
fn path_query() {
    let out = nata(&["-c", "a.b[-1]"], DATA);
    assert_eq!(out.trim(), "3");
}

#[test]
fn predicate_and_projection() {
    let out = nata(&["-c", "users[age>=35].n"], DATA);
    assert_eq!(out.trim(), "\"B\"");
}

#[test]
fn raw_output_strips_quotes() {
    let out = nata(&["-r", "-n", "\"ab\" & \"c\""], "");
    assert_eq!(out.trim(), "abc");
}

#[test]
fn pretty_output_is_the_default() {
    let out = nata(&["users[0]"], DATA);
    assert_eq!(out, "{\n  \"n\": \"A\",\n  \"age\": 30\n}\n");
}

#[test]
fn tab_indentation() {
    let out = nata(&["--tab", "users[0]"], DATA);
    assert_eq!(out, "{\n\t\"n\": \"A\",\n\t\"age\": 30\n}\n");
}

#[test]
fn sort_keys_flag() {
    let out = nata(&["-c", "-S", "$"], r#"{"b":1,"a":2}"#);
    assert_eq!(out.trim(), r#"{"a":2,"b":1}"#);
}

#[test]
fn absent_result_prints_nothing() {
    let out = nata(&["-c", "a.missing"], DATA);
    assert_eq!(out, "");
}

#[test]
fn string_binding() {
    let out = nata(&["-r", "-n", "--arg", "who", "world", "\"hello \" & $who"], "");
    assert_eq!(out.trim(), "hello world");
}

#[test]
fn json_binding() {
    let out = nata(&["-c", "-n", "--argjson", "xs", "[1,2,3]", "$sum($xs)"], "");
    assert_eq!(out.trim(), "6");
}

#[test]
fn file_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.json");
    std::fs::write(&path, DATA).expect("write input");
    let out = nata(&["-c", "$sum(a.b)", path.to_str().expect("utf-8 path")], "");
    assert_eq!(out.trim(), "6");
}

#[test]
fn multiple_documents_evaluate_independently() {
    let out = nata(&["-c", "a + 1"], "{\"a\":1}\n{\"a\":2}");
    assert_eq!(out.trim(), "2\n3");
}

#[test]
fn evaluation_error_sets_exit_code_and_stderr() {
    let output = run(&["-n", "$sort([1, \"a\"])"], "");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("D3070"), "stderr was: {stderr}");
}

#[test]
fn parse_error_sets_exit_code_and_stderr() {
    let output = run(&["-n", "a ]"], "");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("S0201"), "stderr was: {stderr}");
}

#[test]
fn timeout_cancels_evaluation() {
    let output = run(&["-n", "--timeout", "20", "$sum((1..10000000).($ * 2))"], "");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("U1002"), "stderr was: {stderr}");
}

#[test]
fn transform_pipeline() {
    let out = nata(&["-c", "$ ~> |a|{\"c\":99}|"], r#"{"a":{"b":1}}"#);
    assert_eq!(out.trim(), r#"{"a":{"b":1,"c":99}}"#);
}

#[test]
fn trace_flag_emits_to_stderr() {
    // stderr carries the trace, stdout stays clean JSON
    let output = run(&["-c", "--trace", "a.b[0]"], DATA);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "1");
    assert!(!output.stderr.is_empty());
}
