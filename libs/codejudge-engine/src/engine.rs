//! Native Compiled Executor
//!
//! **Core Responsibility:**
//! Compile C/C++ submissions with the configured toolchain and run the
//! resulting binary under time and output limits.
//!
//! **Execution shapes:**
//! - stdio: one fresh process per test, input on stdin, trimmed stdout compared
//! - simple: compile once, run once, report raw output
//! - function: synthesize a harness, compile once, run once, recover markers
//!
//! **Critical Architectural Boundary:**
//! - Engine knows HOW to compile and run
//! - Engine does NOT decide pass/fail (see evaluator.rs)
//! - Every request gets its own workspace, removed on every exit path

use crate::config::{EngineConfig, Toolchain};
use crate::diagnostics::{build_compile_error, classify_runtime, RuntimeSignal};
use crate::error::{EngineError, Result};
use crate::evaluator::{
    self, create_failure_results, normalize_output, parse_printed_value, TestExecutionOutput,
};
use crate::harness::{parse_markers, HarnessBuilder, Invocation, Marker};
use crate::mode::has_entry_point;
use crate::process::{ProcessOutput, ProcessRunner};
use crate::sandbox::UNSUPPORTED_FORMAT;
use crate::sanitize::{native_guard_preamble, sanitize_native};
use crate::workspace::Workspace;
use codejudge_common::types::{
    CompileError, ExecutionLimits, ExecutionMode, ExecutionResult, Language, RuntimeFailure,
    TestCase,
};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Compiler diagnostics get a larger budget than program output.
const MAX_COMPILER_OUTPUT_BYTES: usize = 1024 * 1024;

pub const NO_RESULT: &str = "No result was produced for this test case";

pub const ENTRY_POINT_WARNING: &str = "Automatic validation is not possible because the code defines its own main function. \
Remove main() to test individual functions, or submit the program in stdio mode.";

/// A native request after mode resolution.
#[derive(Debug, Clone, Copy)]
pub struct NativeJob<'a> {
    pub language: Language,
    pub code: &'a str,
    pub test_cases: &'a [TestCase],
    pub mode: ExecutionMode,
    pub limits: ExecutionLimits,
}

/// Outcome of running the compiler.
enum Compiled {
    Ok,
    Failed(CompileError),
}

/// Text placed in a test's `error` for a runtime failure.
pub fn runtime_error_text(failure: &RuntimeFailure) -> String {
    if failure.localized_message == failure.raw_message {
        failure.raw_message.clone()
    } else {
        format!("{} ({})", failure.localized_message, failure.raw_message)
    }
}

fn runtime_signal(output: &ProcessOutput, timeout_ms: u64) -> RuntimeSignal<'_> {
    RuntimeSignal {
        exit_code: output.exit_code,
        signal: output.signal,
        timed_out: output.timed_out,
        timeout_ms,
        stderr: &output.stderr,
    }
}

pub struct NativeEngine<'a> {
    config: &'a EngineConfig,
}

impl<'a> NativeEngine<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    fn toolchain(&self, language: Language) -> Result<&'a Toolchain> {
        self.config
            .toolchains
            .get(language)
            .ok_or_else(|| EngineError::ToolchainNotConfigured(language.to_string()))
    }

    #[tracing::instrument(
        skip(self, job),
        fields(language = %job.language, mode = %job.mode, test_count = job.test_cases.len())
    )]
    pub async fn execute(&self, job: NativeJob<'_>) -> Result<ExecutionResult> {
        let toolchain = self.toolchain(job.language)?;
        let workspace = Workspace::create(&self.config.workspace_root)?;

        let sanitized = sanitize_native(job.code);
        if !sanitized.is_clean() {
            warn!(neutralized = ?sanitized.neutralized, "Neutralized blocked native calls");
        }

        let result = match job.mode {
            ExecutionMode::Stdio => {
                let source = self.guarded_source(toolchain, &sanitized.code, !sanitized.is_clean());
                self.run_stdio(&workspace, toolchain, &source, job).await
            }
            ExecutionMode::Simple => {
                let source = self.guarded_source(toolchain, &sanitized.code, !sanitized.is_clean());
                self.run_simple(&workspace, toolchain, &source, job).await
            }
            ExecutionMode::Function if has_entry_point(job.language, job.code) => {
                info!("Code defines main; running once without automatic validation");
                let source = self.guarded_source(toolchain, &sanitized.code, !sanitized.is_clean());
                let mut result = self.run_simple(&workspace, toolchain, &source, job).await?;
                if result.compile_error.is_none() {
                    result.results = create_failure_results(job.test_cases, ENTRY_POINT_WARNING);
                }
                Ok(result)
            }
            ExecutionMode::Function => {
                let guarded = !sanitized.is_clean();
                self.run_function(&workspace, toolchain, &sanitized.code, guarded, job)
                    .await
            }
        };

        if let Err(e) = workspace.close() {
            warn!(error = %e, "Failed to remove workspace");
        }
        result
    }

    /// Prefix the guard macros when the sanitizer rewrote anything.
    fn guarded_source(&self, toolchain: &Toolchain, code: &str, guarded: bool) -> String {
        if !guarded {
            return code.to_string();
        }
        format!(
            "{}#line 1 \"{}\"\n{}",
            native_guard_preamble(),
            toolchain.source_file,
            code
        )
    }

    async fn compile(
        &self,
        workspace: &Workspace,
        toolchain: &Toolchain,
        language: Language,
        source: &str,
        limits: &ExecutionLimits,
    ) -> Result<Compiled> {
        workspace.write_file(&toolchain.source_file, source).await?;

        let start = Instant::now();
        let output = ProcessRunner::new(&toolchain.compiler)
            .args(toolchain.compile_args())
            .current_dir(workspace.path())
            .env("TMPDIR", workspace.path())
            .timeout(Duration::from_millis(limits.compile_timeout_ms))
            .max_output_bytes(MAX_COMPILER_OUTPUT_BYTES)
            .run()
            .await
            .map_err(|e| match e {
                EngineError::Spawn { source, .. }
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    EngineError::ToolchainMissing {
                        compiler: toolchain.compiler.clone(),
                    }
                }
                other => other,
            })?;
        let compilation_time_ms = start.elapsed().as_millis() as u64;

        if output.success() {
            info!(compilation_time_ms = compilation_time_ms, "Compilation succeeded");
            return Ok(Compiled::Ok);
        }

        let error = build_compile_error(
            &output.combined(),
            language,
            output.timed_out,
            limits.compile_timeout_ms,
        );
        warn!(
            compilation_time_ms = compilation_time_ms,
            timed_out = output.timed_out,
            diagnostics = error.diagnostics.len(),
            error_preview = error.message.as_str(),
            "Compilation failed"
        );
        Ok(Compiled::Failed(error))
    }

    fn compile_failure(
        &self,
        mut result: ExecutionResult,
        error: CompileError,
        test_cases: &[TestCase],
    ) -> ExecutionResult {
        result.results = create_failure_results(test_cases, &error.message);
        result.timed_out = error.timed_out;
        result.compile_error = Some(error);
        result
    }

    async fn run_binary(
        &self,
        workspace: &Workspace,
        toolchain: &Toolchain,
        stdin: Option<&str>,
        limits: &ExecutionLimits,
    ) -> Result<ProcessOutput> {
        let mut runner = ProcessRunner::new(workspace.file(&toolchain.binary_file))
            .current_dir(workspace.path())
            .timeout(Duration::from_millis(limits.run_timeout_ms))
            .max_output_bytes(limits.max_output_bytes);
        if let Some(input) = stdin {
            runner = runner.stdin(input);
        }
        runner.run().await
    }

    /// Shape A: fresh process per test, compare trimmed stdout.
    async fn run_stdio(
        &self,
        workspace: &Workspace,
        toolchain: &Toolchain,
        source: &str,
        job: NativeJob<'_>,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::new(job.mode);
        if let Compiled::Failed(error) = self
            .compile(workspace, toolchain, job.language, source, &job.limits)
            .await?
        {
            return Ok(self.compile_failure(result, error, job.test_cases));
        }

        let mut outputs = Vec::with_capacity(job.test_cases.len());
        for (idx, test_case) in job.test_cases.iter().enumerate() {
            let id = idx + 1;
            let run = self
                .run_binary(workspace, toolchain, Some(&test_case.input), &job.limits)
                .await?;
            result.output_truncated |= run.stdout_truncated;

            let signal = runtime_signal(&run, job.limits.run_timeout_ms);
            let output = if signal.is_failure() {
                let failure = classify_runtime(&signal);
                warn!(
                    test_case_id = id,
                    category = ?failure.category,
                    execution_time_ms = run.elapsed_ms(),
                    "Test run failed"
                );
                result.timed_out |= run.timed_out;
                let output = TestExecutionOutput {
                    timed_out: run.timed_out,
                    ..TestExecutionOutput::failed(id, runtime_error_text(&failure))
                };
                result.runtime_error.get_or_insert(failure);
                output
            } else {
                let stdout = normalize_output(&run.stdout);
                TestExecutionOutput::value(id, Value::String(stdout))
            };

            debug!(test_case_id = id, execution_time_ms = run.elapsed_ms(), "Test executed");
            outputs.push(output.with_time(run.elapsed_ms()));
        }

        result.results = evaluator::evaluate(job.test_cases, outputs, NO_RESULT);
        Ok(result)
    }

    /// Shape B: compile once, run once without input.
    async fn run_simple(
        &self,
        workspace: &Workspace,
        toolchain: &Toolchain,
        source: &str,
        job: NativeJob<'_>,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::new(job.mode);
        if let Compiled::Failed(error) = self
            .compile(workspace, toolchain, job.language, source, &job.limits)
            .await?
        {
            return Ok(self.compile_failure(result, error, job.test_cases));
        }

        let run = self.run_binary(workspace, toolchain, None, &job.limits).await?;
        result.raw_stdout = Some(run.stdout.clone());
        result.output_truncated = run.stdout_truncated;
        result.timed_out = run.timed_out;

        let signal = runtime_signal(&run, job.limits.run_timeout_ms);
        if signal.is_failure() {
            let failure = classify_runtime(&signal);
            warn!(category = ?failure.category, "Program run failed");
            result.runtime_error = Some(failure);
        }

        info!(execution_time_ms = run.elapsed_ms(), "Simple run completed");
        Ok(result)
    }

    /// Shape C: one harness program evaluates every invocation.
    async fn run_function(
        &self,
        workspace: &Workspace,
        toolchain: &Toolchain,
        code: &str,
        guarded: bool,
        job: NativeJob<'_>,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::new(job.mode);

        let mut builder = HarnessBuilder::new(job.language, toolchain.source_file.as_str())
            .user_code(code)
            .guards(guarded);
        let mut unsupported = Vec::new();
        for (idx, test_case) in job.test_cases.iter().enumerate() {
            match Invocation::parse(&test_case.input) {
                Some(invocation) => builder = builder.case(idx + 1, invocation),
                None => unsupported.push(idx + 1),
            }
        }
        debug!(
            cases = builder.case_count(),
            unsupported = unsupported.len(),
            "Harness assembled"
        );

        if let Compiled::Failed(error) = self
            .compile(workspace, toolchain, job.language, &builder.build(), &job.limits)
            .await?
        {
            return Ok(self.compile_failure(result, error, job.test_cases));
        }

        let run = self.run_binary(workspace, toolchain, None, &job.limits).await?;
        result.output_truncated = run.stdout_truncated;
        result.timed_out = run.timed_out;

        let parsed = parse_markers(&run.stdout, builder.tag(), job.test_cases.len());
        if !parsed.residual_stdout.trim().is_empty() {
            result.raw_stdout = Some(parsed.residual_stdout.clone());
        }

        let signal = runtime_signal(&run, job.limits.run_timeout_ms);
        let missing_error = if signal.is_failure() {
            let failure = classify_runtime(&signal);
            warn!(
                category = ?failure.category,
                markers = parsed.markers.len(),
                "Harness run failed"
            );
            let text = runtime_error_text(&failure);
            result.runtime_error = Some(failure);
            text
        } else {
            NO_RESULT.to_string()
        };

        let outputs: Vec<TestExecutionOutput> = (1..=job.test_cases.len())
            .map(|id| {
                if unsupported.contains(&id) {
                    return TestExecutionOutput::failed(id, UNSUPPORTED_FORMAT);
                }
                match parsed.markers.get(&id) {
                    Some(Marker::Value(text)) => TestExecutionOutput {
                        actual: Some(parse_printed_value(text)),
                        actual_serialized: Some(text.trim().to_string()),
                        ..TestExecutionOutput::new(id)
                    },
                    Some(Marker::Error(message)) => {
                        TestExecutionOutput::failed(id, format!("Exception thrown: {message}"))
                    }
                    None => TestExecutionOutput {
                        timed_out: run.timed_out,
                        ..TestExecutionOutput::failed(id, missing_error.clone())
                    },
                }
            })
            .collect();

        info!(
            markers = parsed.markers.len(),
            execution_time_ms = run.elapsed_ms(),
            "Harness run completed"
        );
        result.results = evaluator::evaluate(job.test_cases, outputs, NO_RESULT);
        Ok(result)
    }
}
