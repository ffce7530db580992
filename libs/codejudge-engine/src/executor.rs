//! Execution Orchestrator - High-Level Orchestration
//!
//! **Responsibility:**
//! Resolve limits and mode, dispatch to the script sandbox or the native
//! engine, and assemble one [`ExecutionResult`] per request.
//!
//! **Guarantees:**
//! - Never returns an error: infrastructure faults become `systemError`
//! - `results` always holds exactly one entry per test case, in order
//! - `success` is false only when `systemError` is set

use crate::config::EngineConfig;
use crate::engine::{NativeEngine, NativeJob, NO_RESULT};
use crate::error::{EngineError, Result};
use crate::evaluator::{self, create_failure_results};
use crate::mode::resolve_mode;
use crate::sandbox::{SandboxConfig, ScriptSandbox};
use codejudge_common::types::{
    ExecutionLimits, ExecutionMode, ExecutionRequest, ExecutionResult, TestCase, TestCaseResult,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const SIMPLE_RUN_NOT_EVALUATED: &str = "Test cases are not evaluated in simple-run mode";

#[derive(Debug, Clone)]
pub struct Executor {
    config: Arc<EngineConfig>,
}

impl Executor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Executor configured from `JUDGE_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(EngineConfig::from_env()?))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one request to completion.
    #[tracing::instrument(
        skip(self, request),
        fields(
            run_id = %Uuid::new_v4(),
            language = %request.language,
            test_count = request.test_cases.len()
        )
    )]
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let limits = request
            .limits
            .unwrap_or_default()
            .resolve(&self.config.default_limits);
        let mode = resolve_mode(
            request.language,
            &request.code,
            &request.test_cases,
            request.mode,
        );

        info!(
            mode = %mode,
            run_timeout_ms = limits.run_timeout_ms,
            "Starting execution"
        );

        let outcome = match self.validate(request) {
            Ok(()) => self.dispatch(request, mode, limits).await,
            Err(e) => Err(e),
        };

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Execution failed with infrastructure error");
                system_error_result(mode, &request.test_cases, &e)
            }
        };

        fill_missing_results(&mut result, &request.test_cases);
        result.success = result.system_error.is_none();

        info!(
            passed = result.passed_count(),
            total = result.results.len(),
            timed_out = result.timed_out,
            compile_error = result.compile_error.is_some(),
            "Execution finished"
        );
        result
    }

    /// Input guardrails applied before anything is written or compiled.
    fn validate(&self, request: &ExecutionRequest) -> Result<()> {
        if request.code.len() > self.config.max_source_bytes {
            return Err(EngineError::InputTooLarge {
                what: "source code",
                limit: self.config.max_source_bytes,
            });
        }
        if request
            .test_cases
            .iter()
            .any(|tc| tc.input.len() > self.config.max_input_bytes)
        {
            return Err(EngineError::InputTooLarge {
                what: "test input",
                limit: self.config.max_input_bytes,
            });
        }
        Ok(())
    }

    /// Runs on its own task so a panic inside an executor surfaces as an error.
    async fn dispatch(
        &self,
        request: &ExecutionRequest,
        mode: ExecutionMode,
        limits: ExecutionLimits,
    ) -> Result<ExecutionResult> {
        let config = Arc::clone(&self.config);
        let request = request.clone();

        tokio::spawn(async move {
            if request.language.is_script() {
                run_script(&config, &request, mode, limits).await
            } else {
                NativeEngine::new(&config)
                    .execute(NativeJob {
                        language: request.language,
                        code: &request.code,
                        test_cases: &request.test_cases,
                        mode,
                        limits,
                    })
                    .await
            }
        })
        .await?
    }
}

async fn run_script(
    config: &EngineConfig,
    request: &ExecutionRequest,
    mode: ExecutionMode,
    limits: ExecutionLimits,
) -> Result<ExecutionResult> {
    let sandbox = ScriptSandbox::new(SandboxConfig {
        console_line_limit: config.console_line_limit,
        memory_limit_bytes: config.script_memory_limit_bytes,
    });

    // Stdin has no meaning in the sandbox; stdio requests run as function tests
    if mode == ExecutionMode::Stdio {
        warn!("Stdio mode requested for a script; evaluating tests as invocations");
    }
    let test_cases: &[TestCase] = if mode == ExecutionMode::Simple {
        &[]
    } else {
        &request.test_cases
    };

    let run = sandbox.run(&request.code, test_cases, limits).await?;

    let mut result = ExecutionResult::new(mode);
    result.load_error = run.load_error;
    result.timed_out = run.timed_out;
    result.raw_stdout = run.raw_stdout;
    if !test_cases.is_empty() {
        result.results = evaluator::evaluate(test_cases, run.outputs, NO_RESULT);
    }
    Ok(result)
}

fn system_error_result(
    mode: ExecutionMode,
    test_cases: &[TestCase],
    error: &EngineError,
) -> ExecutionResult {
    let mut result = ExecutionResult::new(mode);
    result.success = false;
    result.system_error = Some(error.to_string());
    result.results = create_failure_results(test_cases, &format!("System error: {error}"));
    result
}

/// Pad or trim `results` so it lines up with `test_cases`.
fn fill_missing_results(result: &mut ExecutionResult, test_cases: &[TestCase]) {
    if result.results.len() == test_cases.len() {
        return;
    }
    let message = if result.mode == ExecutionMode::Simple {
        SIMPLE_RUN_NOT_EVALUATED
    } else {
        NO_RESULT
    };
    result.results.truncate(test_cases.len());
    let start = result.results.len();
    result.results.extend(
        test_cases
            .iter()
            .enumerate()
            .skip(start)
            .map(|(idx, tc)| TestCaseResult::failed(idx + 1, tc, message)),
    );
}
