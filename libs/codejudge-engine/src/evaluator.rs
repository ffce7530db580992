//! Test Evaluator - Language-Agnostic Comparison Logic
//!
//! **Core Responsibility:**
//! Compare what a test produced against what it should have produced.
//!
//! **Critical Properties:**
//! - Knows nothing about compilers or the script engine
//! - Pure function: (execution output, test case) → verdict
//!
//! **Normalization Rules (Applied to All Languages):**
//! - Trim leading and trailing whitespace: YES
//! - `\r\n` and `\n` compare equal: YES
//! - Case sensitivity: YES (exact match required)
//! - Floating-point tolerance: NO
//!
//! **Verdict priority:** error, then timeout, then comparison. A test
//! without an expected output never passes.

use codejudge_common::types::{TestCase, TestCaseResult};
use serde_json::Value;
use tracing::debug;

/// Raw outcome of a single test, produced by an executor.
#[derive(Debug, Clone, Default)]
pub struct TestExecutionOutput {
    pub test_case_id: usize,
    pub actual: Option<Value>,
    pub actual_serialized: Option<String>,
    pub error: Option<String>,
    pub timed_out: bool,
    pub logs: Vec<String>,
    pub execution_time_ms: Option<u64>,
}

impl TestExecutionOutput {
    pub fn new(test_case_id: usize) -> Self {
        Self {
            test_case_id,
            ..Default::default()
        }
    }

    /// Output that carries a produced value.
    pub fn value(test_case_id: usize, actual: Value) -> Self {
        let serialized = serialize_value(&actual);
        Self {
            test_case_id,
            actual: Some(actual),
            actual_serialized: Some(serialized),
            ..Default::default()
        }
    }

    pub fn failed(test_case_id: usize, error: impl Into<String>) -> Self {
        Self {
            test_case_id,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_time(mut self, ms: u64) -> Self {
        self.execution_time_ms = Some(ms);
        self
    }
}

/// Normalize output string for comparison
pub fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim().to_string()
}

/// Strings are kept as-is, everything else is JSON.
pub fn serialize_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Interpret text printed by a native program as a JSON value when it is
/// one (`5`, `true`, `[1,2]`), as a string otherwise.
pub fn parse_printed_value(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::String(String::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(_)) | Err(_) => Value::String(trimmed.to_string()),
        Ok(value) => value,
    }
}

/// Evaluate a single test case execution output
///
/// This function determines the verdict based on:
/// 1. Errors (highest priority)
/// 2. Timeouts (second priority)
/// 3. Output comparison (if execution succeeded)
pub fn evaluate_test(output: &TestExecutionOutput, test_case: &TestCase) -> TestCaseResult {
    let error = if let Some(error) = &output.error {
        Some(error.clone())
    } else if output.timed_out {
        Some("Execution timed out".to_string())
    } else {
        None
    };

    let passed = error.is_none()
        && match (&output.actual_serialized, &test_case.expected_output) {
            (Some(actual), Some(expected)) => {
                normalize_output(actual) == normalize_output(expected)
            }
            _ => false,
        };

    debug!(
        test_case_id = output.test_case_id,
        passed = passed,
        error = ?error,
        "Evaluated test case"
    );

    TestCaseResult {
        test_case_id: output.test_case_id,
        input: test_case.input.clone(),
        expected: test_case.expected_output.clone(),
        actual: output.actual.clone(),
        actual_serialized: output.actual_serialized.clone(),
        passed,
        error,
        description: test_case.description.clone(),
        logs: output.logs.clone(),
        execution_time_ms: output.execution_time_ms,
    }
}

/// Evaluate all outputs against their test cases.
///
/// Test ids are 1-based positions in `test_cases`. Tests without an output
/// become failures with `missing_error`, so the result always has one
/// entry per test case, in order.
pub fn evaluate(
    test_cases: &[TestCase],
    outputs: Vec<TestExecutionOutput>,
    missing_error: &str,
) -> Vec<TestCaseResult> {
    let mut by_id: Vec<Option<TestExecutionOutput>> = vec![None; test_cases.len()];
    for output in outputs {
        if let Some(slot) = output
            .test_case_id
            .checked_sub(1)
            .and_then(|idx| by_id.get_mut(idx))
        {
            *slot = Some(output);
        }
    }

    test_cases
        .iter()
        .zip(by_id)
        .enumerate()
        .map(|(idx, (test_case, output))| match output {
            Some(output) => evaluate_test(&output, test_case),
            None => TestCaseResult::failed(idx + 1, test_case, missing_error),
        })
        .collect()
}

/// One failed result per test case, all carrying `error_message`.
pub fn create_failure_results(test_cases: &[TestCase], error_message: &str) -> Vec<TestCaseResult> {
    test_cases
        .iter()
        .enumerate()
        .map(|(idx, tc)| TestCaseResult::failed(idx + 1, tc, error_message))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Helper to create a test case
    fn make_test_case(expected_output: &str) -> TestCase {
        TestCase {
            input: "input".to_string(),
            expected_output: Some(expected_output.to_string()),
            description: None,
        }
    }

    /// Helper to create a passing output
    fn make_output(test_case_id: usize, stdout: &str) -> TestExecutionOutput {
        TestExecutionOutput::value(test_case_id, Value::String(stdout.to_string()))
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("hello"), "hello");
        assert_eq!(normalize_output("  hello  "), "hello");
        assert_eq!(normalize_output("hello\n"), "hello");
        assert_eq!(normalize_output("\nhello\n"), "hello");
        assert_eq!(normalize_output("  hello world  \n"), "hello world");
        assert_eq!(normalize_output("a\r\nb\r\n"), "a\nb");
        assert_eq!(normalize_output(""), "");
        assert_eq!(normalize_output("   "), "");
    }

    #[test]
    fn test_evaluate_test_exact_match() {
        let test_case = make_test_case("120");
        let output = make_output(1, "120").with_time(42);

        let result = evaluate_test(&output, &test_case);

        assert!(result.passed);
        assert_eq!(result.test_case_id, 1);
        assert_eq!(result.execution_time_ms, Some(42));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_evaluate_test_with_whitespace() {
        let test_case = make_test_case("hello");
        let output = make_output(1, "  hello  \n");

        let result = evaluate_test(&output, &test_case);

        assert!(result.passed);
    }

    #[test]
    fn test_evaluate_test_mismatch() {
        let test_case = make_test_case("expected");
        let output = make_output(1, "actual");

        let result = evaluate_test(&output, &test_case);

        assert!(!result.passed);
        assert!(result.error.is_none());
        assert_eq!(result.actual_serialized.as_deref(), Some("actual"));
    }

    #[test]
    fn test_evaluate_test_runtime_error() {
        let test_case = make_test_case("output");
        let output = TestExecutionOutput {
            actual_serialized: Some("output".to_string()),
            ..TestExecutionOutput::failed(1, "RuntimeError: crash")
        };

        let result = evaluate_test(&output, &test_case);

        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("RuntimeError: crash"));
    }

    #[test]
    fn test_evaluate_test_timeout() {
        let test_case = make_test_case("output");
        let output = TestExecutionOutput {
            timed_out: true,
            ..TestExecutionOutput::new(1)
        };

        let result = evaluate_test(&output, &test_case);

        assert!(!result.passed);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_missing_expected_never_passes() {
        let test_case = TestCase {
            input: "f()".to_string(),
            expected_output: None,
            description: Some("no expectation".to_string()),
        };
        let result = evaluate_test(&make_output(1, ""), &test_case);
        assert!(!result.passed);
        assert_eq!(result.description.as_deref(), Some("no expectation"));
    }

    #[test]
    fn test_json_values_serialize() {
        assert_eq!(serialize_value(&json!([1, 2, 3])), "[1,2,3]");
        assert_eq!(serialize_value(&json!("text")), "text");
        assert_eq!(serialize_value(&json!(true)), "true");

        let output = TestExecutionOutput::value(1, json!([1, 2]));
        let result = evaluate_test(&output, &make_test_case("[1,2]"));
        assert!(result.passed);
    }

    #[test]
    fn test_parse_printed_value() {
        assert_eq!(parse_printed_value("5"), json!(5));
        assert_eq!(parse_printed_value("true"), json!(true));
        assert_eq!(parse_printed_value("[1,2]"), json!([1, 2]));
        assert_eq!(parse_printed_value("hello world"), json!("hello world"));
        assert_eq!(parse_printed_value("{a:1}"), json!("{a:1}"));
    }

    #[test]
    fn test_evaluate_fills_missing_outputs() {
        let test_cases = vec![make_test_case("1"), make_test_case("2"), make_test_case("3")];
        let outputs = vec![make_output(3, "3"), make_output(1, "1"), make_output(7, "x")];

        let results = evaluate(&test_cases, outputs, "No result");

        assert_eq!(results.len(), 3);
        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert_eq!(results[1].test_case_id, 2);
        assert_eq!(results[1].error.as_deref(), Some("No result"));
        assert!(results[2].passed);
    }

    #[test]
    fn test_create_failure_results() {
        let test_cases = vec![make_test_case("a"), make_test_case("b")];
        let results = create_failure_results(&test_cases, "Compilation failed");

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.passed));
        assert!(results
            .iter()
            .all(|r| r.error.as_deref() == Some("Compilation failed")));
        assert_eq!(results[1].test_case_id, 2);
    }
}
