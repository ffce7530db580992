//! Script Sandbox Executor
//!
//! **Core Responsibility:**
//! Run JavaScript submissions in an embedded QuickJS context and evaluate
//! each test invocation against it.
//!
//! **Isolation:**
//! - One fresh runtime and context per request, dropped afterwards
//! - Only a captured `console` and empty `module`/`exports` are exposed
//! - Heap and stack limits on the runtime
//! - A watchdog interrupt enforces the load deadline and every per-test deadline
//!
//! No filesystem or network access exists inside the context.

use crate::error::{EngineError, Result};
use crate::evaluator::TestExecutionOutput;
use crate::harness::{is_argument_list, strip_outer_parens, Invocation};
use crate::sanitize::{mask_comments_and_literals, sanitize_script};
use codejudge_common::types::{ExecutionLimits, TestCase};
use regex::Regex;
use rquickjs::{Context, Ctx, Runtime};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MAX_STACK_BYTES: usize = 1024 * 1024;

pub const UNSUPPORTED_FORMAT: &str = "Unsupported test case format";

/// Sandbox settings taken from the engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct SandboxConfig {
    pub console_line_limit: usize,
    pub memory_limit_bytes: usize,
}

/// Everything one sandboxed request produced.
#[derive(Debug, Clone, Default)]
pub struct ScriptRun {
    pub outputs: Vec<TestExecutionOutput>,
    pub load_error: Option<String>,
    /// True when the load or any test hit its deadline.
    pub timed_out: bool,
    /// Console output of a simple run.
    pub raw_stdout: Option<String>,
    pub neutralized: Vec<String>,
}

/// Shared between the interrupt handler and the code arming it.
#[derive(Debug, Clone, Default)]
struct Watchdog {
    deadline: Arc<Mutex<Option<Instant>>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    fn arm(&self, budget: Duration) {
        if let Ok(mut deadline) = self.deadline.lock() {
            *deadline = Some(Instant::now() + budget);
        }
        self.fired.store(false, Ordering::SeqCst);
    }

    fn disarm(&self) {
        if let Ok(mut deadline) = self.deadline.lock() {
            *deadline = None;
        }
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    fn expired(&self) -> bool {
        let expired = self
            .deadline
            .lock()
            .map(|d| d.is_some_and(|d| Instant::now() >= d))
            .unwrap_or(false);
        if expired {
            self.fired.store(true, Ordering::SeqCst);
        }
        expired
    }
}

fn prelude(console_line_limit: usize) -> String {
    format!(
        r#"(function (limit) {{
    var lines = [];
    function fmt(v) {{
        if (typeof v === 'string') return v;
        if (v === undefined) return 'undefined';
        if (typeof v === 'function') return String(v);
        try {{
            var s = JSON.stringify(v);
            return s === undefined ? String(v) : s;
        }} catch (e) {{
            return String(v);
        }}
    }}
    function push() {{
        var parts = [];
        for (var i = 0; i < arguments.length; i++) parts.push(fmt(arguments[i]));
        lines.push(parts.join(' '));
        if (lines.length > limit) lines.splice(0, lines.length - limit);
    }}
    var c = {{ log: push, info: push, warn: push, error: push, debug: push }};
    function fixed(name, value) {{
        Object.defineProperty(globalThis, name, {{ value: value, writable: false, configurable: false }});
    }}
    fixed('console', c);
    fixed('__judge_drain', function () {{
        var out = lines;
        lines = [];
        return JSON.stringify(out);
    }});
    fixed('__judge_describe', function (e) {{
        if (e !== null && typeof e === 'object' && 'message' in e) {{
            return e.name ? e.name + ': ' + e.message : String(e.message);
        }}
        try {{ return String(e); }} catch (_) {{ return 'Unknown error'; }}
    }});
    var compile = Function;
    fixed('__judge_args', function (body) {{
        return compile(body);
    }});
    fixed('__blocked', function (name) {{
        throw new Error(name + ' is not available in the sandbox');
    }});
}})({console_line_limit});
var module = {{ exports: {{}} }};
var exports = module.exports;
"#
    )
}

fn function_decl_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^\w$.])(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*\(")
            .expect("valid function declaration regex")
    })
}

fn function_binding_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?(?:function\b|\([^()]*\)\s*=>|[A-Za-z_$][\w$]*\s*=>)",
        )
        .expect("valid function binding regex")
    })
}

/// Name of the first function declared at the top level of `code`.
pub fn detect_entry_function(code: &str) -> Option<String> {
    let masked = mask_comments_and_literals(code, true);

    let mut candidates: Vec<(usize, String)> = function_decl_regex()
        .captures_iter(&masked)
        .chain(function_binding_regex().captures_iter(&masked))
        .filter_map(|caps| caps.get(1).map(|m| (m.start(), m.as_str().to_string())))
        .collect();
    candidates.sort_by_key(|(pos, _)| *pos);

    candidates.into_iter().find_map(|(pos, name)| {
        let prefix = &masked[..pos];
        let depth = prefix.matches('{').count() as i64 - prefix.matches('}').count() as i64;
        (depth == 0).then_some(name)
    })
}

/// JavaScript that resolves to the callee for a test, or `undefined`.
fn resolve_callee(name: &str) -> String {
    format!(
        "(typeof {name} === 'function' ? {name} : \
         (module.exports && typeof module.exports['{name}'] === 'function' ? module.exports['{name}'] : undefined))"
    )
}

/// How a test hands its arguments to the callee.
enum CallArgs<'a> {
    /// Argument text of a parsed invocation, spliced into the call.
    Inline(&'a str),
    /// A bare argument list, compiled separately so a syntax error reads
    /// as an unsupported input rather than a script failure.
    Bare(&'a str),
}

fn js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

fn call_wrapper(callee: &str, args: CallArgs<'_>, missing_error: &str) -> String {
    let missing = js_string(missing_error);
    let (prepare, call) = match args {
        CallArgs::Inline(args) => (String::new(), format!("__callee({args})")),
        CallArgs::Bare(args) => {
            let body = js_string(&format!("return [{args}];"));
            let unsupported = js_string(UNSUPPORTED_FORMAT);
            (
                format!(
                    "var __args;\n    try {{ __args = __judge_args({body}); }} catch (e) {{ \
                     return JSON.stringify({{ ok: false, error: {unsupported} }}); }}\n    "
                ),
                "__callee.apply(undefined, __args())".to_string(),
            )
        }
    };
    format!(
        r#"(function () {{
    var __callee = {callee};
    if (typeof __callee !== 'function') return JSON.stringify({{ ok: false, error: {missing} }});
    {prepare}try {{
        var __r = (function () {{ return {call}; }})();
        var __s;
        if (typeof __r === 'string') {{
            __s = __r;
        }} else if (__r === undefined) {{
            __s = 'undefined';
        }} else {{
            try {{ __s = JSON.stringify(__r); }} catch (e) {{ __s = undefined; }}
            if (__s === undefined) __s = String(__r);
        }}
        var __v = null;
        if (__r !== undefined) {{
            try {{ __v = JSON.parse(JSON.stringify(__r)); }} catch (e) {{ __v = __s; }}
            if (__v === undefined) __v = __s;
        }}
        return JSON.stringify({{ ok: true, value: __v, serialized: __s }});
    }} catch (e) {{
        return JSON.stringify({{ ok: false, error: __judge_describe(e) }});
    }}
}})()"#
    )
}

#[derive(Debug, Deserialize)]
struct CallOutcome {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    serialized: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// The script to evaluate for one test input, or the error to report.
fn test_script(input: &str, entry: Option<&str>) -> std::result::Result<String, String> {
    if let Some(invocation) = Invocation::parse(input) {
        let missing = format!("Function '{}' is not defined", invocation.function);
        return Ok(call_wrapper(
            &resolve_callee(&invocation.function),
            CallArgs::Inline(&invocation.args),
            &missing,
        ));
    }

    if !is_argument_list(input) {
        return Err(UNSUPPORTED_FORMAT.to_string());
    }
    let args = CallArgs::Bare(strip_outer_parens(input));
    match entry {
        Some(name) => {
            let missing = format!("Function '{name}' is not defined");
            Ok(call_wrapper(&resolve_callee(name), args, &missing))
        }
        None => Ok(call_wrapper(
            "(typeof module.exports === 'function' ? module.exports : undefined)",
            args,
            UNSUPPORTED_FORMAT,
        )),
    }
}

fn engine_error(err: rquickjs::Error) -> EngineError {
    EngineError::ScriptEngine(err.to_string())
}

/// Message for a failed evaluation. Clears the pending exception.
fn describe_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !matches!(err, rquickjs::Error::Exception) {
        return err.to_string();
    }
    let thrown = ctx.catch();
    if ctx.globals().set("__judge_thrown", thrown).is_err() {
        return "Uncaught exception".to_string();
    }
    ctx.eval::<String, _>("__judge_describe(__judge_thrown)")
        .unwrap_or_else(|_| "Uncaught exception".to_string())
}

fn drain_console(ctx: &Ctx<'_>) -> Vec<String> {
    ctx.eval::<String, _>("__judge_drain()")
        .ok()
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptSandbox {
    config: SandboxConfig,
}

impl ScriptSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Load `code` once and evaluate every test case against it.
    ///
    /// Runs on a blocking thread; the returned future completes when the
    /// script does or when its deadlines fire.
    #[tracing::instrument(skip_all, fields(test_count = test_cases.len()))]
    pub async fn run(
        &self,
        code: &str,
        test_cases: &[TestCase],
        limits: ExecutionLimits,
    ) -> Result<ScriptRun> {
        let config = self.config;
        let code = code.to_string();
        let test_cases = test_cases.to_vec();

        tokio::task::spawn_blocking(move || run_blocking(&code, &test_cases, limits, config))
            .await?
    }
}

fn run_blocking(
    code: &str,
    test_cases: &[TestCase],
    limits: ExecutionLimits,
    config: SandboxConfig,
) -> Result<ScriptRun> {
    let sanitized = sanitize_script(code);
    if !sanitized.is_clean() {
        warn!(neutralized = ?sanitized.neutralized, "Neutralized blocked script constructs");
    }

    let runtime = Runtime::new().map_err(engine_error)?;
    runtime.set_memory_limit(config.memory_limit_bytes);
    runtime.set_max_stack_size(MAX_STACK_BYTES);

    let watchdog = Watchdog::default();
    let handler_watchdog = watchdog.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || handler_watchdog.expired())));

    let context = Context::full(&runtime).map_err(engine_error)?;

    context.with(|ctx| {
        ctx.eval::<(), _>(prelude(config.console_line_limit.max(1)))
            .map_err(|e| EngineError::ScriptEngine(describe_error(&ctx, e)))?;

        let mut run = ScriptRun {
            neutralized: sanitized.neutralized.clone(),
            ..Default::default()
        };

        watchdog.arm(Duration::from_millis(limits.run_timeout_ms));
        let loaded = ctx.eval::<(), _>(sanitized.code.as_str());
        watchdog.disarm();

        if let Err(err) = loaded {
            let message = if watchdog.fired() {
                let _ = describe_error(&ctx, err);
                run.timed_out = true;
                format!("Timeout after {}ms", limits.run_timeout_ms)
            } else {
                describe_error(&ctx, err)
            };
            let logs = drain_console(&ctx);
            warn!(error = %message, "Script failed to load");

            if test_cases.is_empty() {
                run.raw_stdout = Some(logs.join("\n"));
            }
            run.outputs = test_cases
                .iter()
                .enumerate()
                .map(|(idx, _)| {
                    TestExecutionOutput::failed(idx + 1, &message).with_logs(logs.clone())
                })
                .collect();
            run.load_error = Some(message);
            return Ok(run);
        }

        let load_logs = drain_console(&ctx);
        if test_cases.is_empty() {
            run.raw_stdout = Some(load_logs.join("\n"));
            info!("Script simple run completed");
            return Ok(run);
        }

        let entry = detect_entry_function(code);
        debug!(entry = ?entry, "Detected entry function");

        for (idx, test_case) in test_cases.iter().enumerate() {
            let id = idx + 1;
            let script = match test_script(&test_case.input, entry.as_deref()) {
                Ok(script) => script,
                Err(error) => {
                    run.outputs.push(TestExecutionOutput::failed(id, error));
                    continue;
                }
            };

            let started = Instant::now();
            watchdog.arm(Duration::from_millis(limits.test_timeout_ms));
            let evaluated = ctx.eval::<String, _>(script);
            watchdog.disarm();
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let output = match evaluated {
                Err(err) if watchdog.fired() => {
                    let _ = describe_error(&ctx, err);
                    run.timed_out = true;
                    TestExecutionOutput {
                        timed_out: true,
                        ..TestExecutionOutput::failed(
                            id,
                            format!("Timeout after {}ms", limits.test_timeout_ms),
                        )
                    }
                }
                Err(err) => TestExecutionOutput::failed(id, describe_error(&ctx, err)),
                Ok(json) => match serde_json::from_str::<CallOutcome>(&json) {
                    Ok(outcome) if outcome.ok => TestExecutionOutput {
                        actual: Some(outcome.value),
                        actual_serialized: outcome.serialized,
                        ..TestExecutionOutput::new(id)
                    },
                    Ok(outcome) => TestExecutionOutput::failed(
                        id,
                        outcome.error.unwrap_or_else(|| "Unknown error".to_string()),
                    ),
                    Err(e) => {
                        TestExecutionOutput::failed(id, format!("Invalid sandbox result: {e}"))
                    }
                },
            };

            debug!(test_case_id = id, elapsed_ms = elapsed_ms, "Script test evaluated");
            run.outputs
                .push(output.with_logs(drain_console(&ctx)).with_time(elapsed_ms));
        }

        info!(
            tests = run.outputs.len(),
            timed_out = run.timed_out,
            "Script tests evaluated"
        );
        Ok(run)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SandboxConfig {
        SandboxConfig {
            console_line_limit: 100,
            memory_limit_bytes: 32 * 1024 * 1024,
        }
    }

    fn tc(input: &str, expected: &str) -> TestCase {
        TestCase {
            input: input.to_string(),
            expected_output: Some(expected.to_string()),
            description: None,
        }
    }

    fn limits() -> ExecutionLimits {
        ExecutionLimits {
            run_timeout_ms: 1_000,
            test_timeout_ms: 200,
            ..ExecutionLimits::default()
        }
    }

    #[test]
    fn test_detect_entry_function() {
        assert_eq!(
            detect_entry_function("function add(a, b) {\n  function inner() {}\n  return a + b;\n}"),
            Some("add".to_string())
        );
        assert_eq!(
            detect_entry_function("// function fake() {}\nconst sum = (a, b) => a + b;"),
            Some("sum".to_string())
        );
        assert_eq!(
            detect_entry_function("let twice = x => x * 2;"),
            Some("twice".to_string())
        );
        assert_eq!(detect_entry_function("const x = 5;"), None);
    }

    #[test]
    fn test_test_script_shapes() {
        assert!(test_script("add(1, 2)", None).unwrap().contains("__callee(1, 2)"));
        assert!(test_script("1, 2", Some("add")).unwrap().contains("typeof add"));
        assert_eq!(test_script("1; 2", Some("add")).unwrap_err(), UNSUPPORTED_FORMAT);
        assert_eq!(
            test_script("Math.max(1, 2)", Some("add")).unwrap_err(),
            UNSUPPORTED_FORMAT
        );
        assert!(test_script("(1, 1)", Some("add"))
            .unwrap()
            .contains(r#"__judge_args("return [1, 1];")"#));
    }

    #[tokio::test]
    async fn test_function_invocations() {
        let sandbox = ScriptSandbox::new(config());
        let code = "function add(a, b) { console.log('adding', a, b); return a + b; }";
        let run = sandbox
            .run(code, &[tc("add(2, 3)", "5"), tc("add(-1, 1)", "0")], limits())
            .await
            .unwrap();

        assert!(run.load_error.is_none());
        assert_eq!(run.outputs.len(), 2);
        assert_eq!(run.outputs[0].actual_serialized.as_deref(), Some("5"));
        assert_eq!(run.outputs[0].actual, Some(serde_json::json!(5)));
        assert_eq!(run.outputs[0].logs, vec!["adding 2 3".to_string()]);
        assert_eq!(run.outputs[1].actual_serialized.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_bare_arguments_and_exports() {
        let sandbox = ScriptSandbox::new(config());
        let code = "const double = (xs) => xs.map(x => x * 2);\nmodule.exports.triple = n => n * 3;";
        let run = sandbox
            .run(code, &[tc("[1, 2]", "[2,4]"), tc("triple(3)", "9")], limits())
            .await
            .unwrap();

        assert_eq!(run.outputs[0].actual_serialized.as_deref(), Some("[2,4]"));
        assert_eq!(run.outputs[1].actual_serialized.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn test_missing_function_and_thrown_error() {
        let sandbox = ScriptSandbox::new(config());
        let code = "function boom() { throw new TypeError('bad input'); }";
        let run = sandbox
            .run(code, &[tc("nope(1)", "1"), tc("boom()", "1")], limits())
            .await
            .unwrap();

        assert_eq!(
            run.outputs[0].error.as_deref(),
            Some("Function 'nope' is not defined")
        );
        assert_eq!(run.outputs[1].error.as_deref(), Some("TypeError: bad input"));
    }

    #[tokio::test]
    async fn test_per_test_timeout() {
        let sandbox = ScriptSandbox::new(config());
        let code = "function spin() { while (true) {} }\nfunction ok() { return 1; }";
        let run = sandbox
            .run(code, &[tc("spin()", "1"), tc("ok()", "1")], limits())
            .await
            .unwrap();

        assert!(run.timed_out);
        assert!(run.outputs[0].timed_out);
        assert_eq!(run.outputs[0].error.as_deref(), Some("Timeout after 200ms"));
        assert_eq!(run.outputs[1].actual_serialized.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_load_error_reaches_every_test() {
        let sandbox = ScriptSandbox::new(config());
        let code = "console.log('before');\nfunction f( {";
        let run = sandbox
            .run(code, &[tc("f(1)", "1"), tc("f(2)", "2")], limits())
            .await
            .unwrap();

        let load_error = run.load_error.clone().unwrap();
        assert!(load_error.contains("SyntaxError"));
        for output in &run.outputs {
            assert_eq!(output.error.as_deref(), Some(load_error.as_str()));
        }
    }

    #[tokio::test]
    async fn test_runtime_load_error_keeps_console() {
        let sandbox = ScriptSandbox::new(config());
        let code = "console.log('partial');\nundefinedThing();";
        let run = sandbox.run(code, &[tc("f(1)", "1")], limits()).await.unwrap();

        assert!(run.load_error.unwrap().contains("ReferenceError"));
        assert_eq!(run.outputs[0].logs, vec!["partial".to_string()]);
    }

    #[tokio::test]
    async fn test_blocked_process_exit() {
        let sandbox = ScriptSandbox::new(config());
        let code = "function quit() { process.exit(1); return 2; }";
        let run = sandbox.run(code, &[tc("quit()", "2")], limits()).await.unwrap();

        assert!(run.neutralized.contains(&"process.exit".to_string()));
        assert!(run.outputs[0]
            .error
            .as_deref()
            .unwrap()
            .contains("process.exit is not available"));
    }

    #[tokio::test]
    async fn test_simple_run_returns_console() {
        let sandbox = ScriptSandbox::new(config());
        let run = sandbox
            .run("console.log('hi'); console.log({a: 1});", &[], limits())
            .await
            .unwrap();

        assert_eq!(run.raw_stdout.as_deref(), Some("hi\n{\"a\":1}"));
        assert!(run.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_console_is_bounded() {
        let sandbox = ScriptSandbox::new(SandboxConfig {
            console_line_limit: 3,
            ..config()
        });
        let run = sandbox
            .run("for (let i = 0; i < 10; i++) console.log(i);", &[], limits())
            .await
            .unwrap();

        assert_eq!(run.raw_stdout.as_deref(), Some("7\n8\n9"));
    }

    #[tokio::test]
    async fn test_unsupported_input() {
        let sandbox = ScriptSandbox::new(config());
        let run = sandbox
            .run("const x = 1;", &[tc("just text; more", "1")], limits())
            .await
            .unwrap();

        assert_eq!(run.outputs[0].error.as_deref(), Some(UNSUPPORTED_FORMAT));
    }

    #[tokio::test]
    async fn test_parenthesized_arguments_spread() {
        let sandbox = ScriptSandbox::new(config());
        let code = "function add(a, b) { return a + b; }";
        let run = sandbox
            .run(code, &[tc("(1, 1)", "2"), tc("(\"a\", \"b\")", "ab")], limits())
            .await
            .unwrap();

        assert_eq!(run.outputs[0].actual_serialized.as_deref(), Some("2"));
        assert_eq!(run.outputs[0].error, None);
        assert_eq!(run.outputs[1].actual_serialized.as_deref(), Some("ab"));
    }

    #[tokio::test]
    async fn test_malformed_bare_arguments_are_unsupported() {
        let sandbox = ScriptSandbox::new(config());
        let code = "function add(a, b) { return a + b; }";
        let run = sandbox
            .run(
                code,
                &[tc("hello world", "1"), tc("Math.max(1, 2)", "2"), tc("1, 2", "3")],
                limits(),
            )
            .await
            .unwrap();

        assert_eq!(run.outputs[0].error.as_deref(), Some(UNSUPPORTED_FORMAT));
        assert_eq!(run.outputs[0].actual, None);
        assert_eq!(run.outputs[1].error.as_deref(), Some(UNSUPPORTED_FORMAT));
        assert_eq!(run.outputs[2].actual_serialized.as_deref(), Some("3"));
    }
}
