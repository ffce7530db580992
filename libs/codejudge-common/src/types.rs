use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported submission languages.
///
/// `Javascript` runs inside the embedded script sandbox; `C` and `Cpp` go
/// through the native compile-and-run pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[serde(alias = "js", alias = "node")]
    Javascript,
    C,
    #[serde(alias = "c++", alias = "cxx")]
    Cpp,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Javascript, Language::C, Language::Cpp];

    /// True for languages evaluated in-process rather than compiled.
    pub fn is_script(&self) -> bool {
        matches!(self, Language::Javascript)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Javascript => "javascript",
            Language::C => "c",
            Language::Cpp => "cpp",
        };
        f.write_str(name)
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "javascript" | "js" | "node" => Ok(Language::Javascript),
            "c" => Ok(Language::C),
            "cpp" | "c++" | "cxx" => Ok(Language::Cpp),
            other => Err(format!("unsupported language: {}", other)),
        }
    }
}

/// Execution shape for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Test inputs are invocation expressions against functions in the code.
    #[serde(alias = "function-invocation")]
    Function,
    /// The program owns `main` and talks through stdin/stdout.
    Stdio,
    /// No tests: run once and report console output.
    #[serde(alias = "simple-run")]
    Simple,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionMode::Function => "function",
            ExecutionMode::Stdio => "stdio",
            ExecutionMode::Simple => "simple",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Invocation expression (`add(2, 3)`) or raw stdin text.
    pub input: String,
    #[serde(default, rename = "output", alias = "expectedOutput")]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Resolved per-request resource limits. Timeouts are in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLimits {
    #[serde(rename = "compileTimeout")]
    pub compile_timeout_ms: u64,
    #[serde(rename = "runTimeout")]
    pub run_timeout_ms: u64,
    /// Per-test budget inside the script sandbox.
    #[serde(rename = "testTimeout")]
    pub test_timeout_ms: u64,
    pub max_output_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            compile_timeout_ms: 10_000,
            run_timeout_ms: 5_000,
            test_timeout_ms: 2_000,
            max_output_bytes: 64 * 1024,
        }
    }
}

/// Limits as supplied by a caller; absent fields fall back to the engine defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOverrides {
    #[serde(default, rename = "compileTimeout")]
    pub compile_timeout_ms: Option<u64>,
    #[serde(default, rename = "runTimeout")]
    pub run_timeout_ms: Option<u64>,
    #[serde(default, rename = "testTimeout")]
    pub test_timeout_ms: Option<u64>,
    #[serde(default, rename = "maxOutputBytes")]
    pub max_output_bytes: Option<usize>,
}

impl LimitOverrides {
    pub fn resolve(&self, defaults: &ExecutionLimits) -> ExecutionLimits {
        ExecutionLimits {
            compile_timeout_ms: self.compile_timeout_ms.unwrap_or(defaults.compile_timeout_ms),
            run_timeout_ms: self.run_timeout_ms.unwrap_or(defaults.run_timeout_ms),
            test_timeout_ms: self.test_timeout_ms.unwrap_or(defaults.test_timeout_ms),
            max_output_bytes: self.max_output_bytes.unwrap_or(defaults.max_output_bytes),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub code: String,
    pub language: Language,
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub limits: Option<LimitOverrides>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// Machine-readable classification of a compiler diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    MissingSemicolon,
    UndeclaredIdentifier,
    MissingInclude,
    UnknownType,
    MismatchedBracket,
    ExpectedExpression,
    Redefinition,
    TypeMismatch,
    ArgumentCount,
    NoMatchingFunction,
    MissingReturn,
    UnusedVariable,
    FormatMismatch,
    AssignmentInCondition,
    UndefinedReference,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileDiagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub end_column: u32,
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub raw_message: String,
    pub localized_message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileError {
    /// Student-facing summary, also copied into every test result.
    pub message: String,
    /// Combined compiler output as captured.
    pub raw: String,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub diagnostics: Vec<CompileDiagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeCategory {
    Timeout,
    SegmentationViolation,
    ArithmeticException,
    AbnormalTermination,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeFailure {
    pub category: RuntimeCategory,
    pub raw_message: String,
    pub localized_message: String,
    #[serde(default)]
    pub hints: Vec<String>,
}

/// Verdict for one test case. Field names follow the snake_case wire format
/// consumed by the submission store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub test_case_id: usize,
    pub input: String,
    pub expected: Option<String>,
    pub actual: Option<serde_json::Value>,
    pub actual_serialized: Option<String>,
    pub passed: bool,
    pub error: Option<String>,
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl TestCaseResult {
    /// A failed verdict with no actual value, used when the test never produced output.
    pub fn failed(test_case_id: usize, test_case: &TestCase, error: impl Into<String>) -> Self {
        Self {
            test_case_id,
            input: test_case.input.clone(),
            expected: test_case.expected_output.clone(),
            actual: None,
            actual_serialized: None,
            passed: false,
            error: Some(error.into()),
            description: test_case.description.clone(),
            logs: Vec::new(),
            execution_time_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// False only when the pipeline itself failed (see `system_error`).
    pub success: bool,
    pub mode: ExecutionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_error: Option<CompileError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_error: Option<RuntimeFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_error: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_stdout: Option<String>,
    #[serde(default)]
    pub output_truncated: bool,
    pub results: Vec<TestCaseResult>,
}

impl ExecutionResult {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            success: true,
            mode,
            compile_error: None,
            runtime_error: None,
            load_error: None,
            system_error: None,
            timed_out: false,
            raw_stdout: None,
            output_truncated: false,
            results: Vec::new(),
        }
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }
}
