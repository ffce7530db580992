//! Runtime failure classification.

use codejudge_common::types::{RuntimeCategory, RuntimeFailure};

pub const SIGABRT: i32 = 6;
pub const SIGBUS: i32 = 7;
pub const SIGFPE: i32 = 8;
pub const SIGKILL: i32 = 9;
pub const SIGSEGV: i32 = 11;

/// Shell-style `128 + signal` exit codes.
const EXIT_SEGV: i32 = 128 + SIGSEGV;
const EXIT_BUS: i32 = 128 + SIGBUS;
const EXIT_FPE: i32 = 128 + SIGFPE;
const EXIT_ABRT: i32 = 128 + SIGABRT;

const SEGV_SIGNATURES: &[&str] = &[
    "segmentation fault",
    "stack overflow",
    "stack smashing",
    "bus error",
    "addresssanitizer",
    "core dumped",
];
const FPE_SIGNATURES: &[&str] = &["floating point exception", "division by zero", "divide by zero"];
const ABORT_SIGNATURES: &[&str] = &[
    "assertion",
    "terminate called",
    "aborted",
    "abort()",
    "double free",
    "free(): invalid",
    "std::bad_alloc",
];

/// How a process ended, as observed by the supervisor.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeSignal<'a> {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub timeout_ms: u64,
    pub stderr: &'a str,
}

impl RuntimeSignal<'_> {
    /// Anything other than a clean zero exit.
    pub fn is_failure(&self) -> bool {
        self.timed_out || self.signal.is_some() || self.exit_code != Some(0)
    }
}

fn signal_name(signal: i32) -> &'static str {
    match signal {
        SIGABRT => "SIGABRT",
        SIGBUS => "SIGBUS",
        SIGFPE => "SIGFPE",
        SIGKILL => "SIGKILL",
        SIGSEGV => "SIGSEGV",
        _ => "signal",
    }
}

fn mentions(text: &str, signatures: &[&str]) -> bool {
    signatures.iter().any(|s| text.contains(s))
}

fn hints(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Classify a failed run. Unmatched failures fall back to a generic
/// runtime error carrying the raw text.
pub fn classify_runtime(run: &RuntimeSignal<'_>) -> RuntimeFailure {
    if run.timed_out {
        return RuntimeFailure {
            category: RuntimeCategory::Timeout,
            raw_message: format!("Execution timed out after {}ms", run.timeout_ms),
            localized_message: format!(
                "The program did not finish within the time limit of {}ms.",
                run.timeout_ms
            ),
            hints: hints(&[
                "Look for a loop whose exit condition is never reached.",
                "Check whether the algorithm is too slow for the input size.",
                "Make sure the program does not wait for input that is never sent.",
            ]),
        };
    }

    let stderr = run.stderr.trim();
    let lowered = stderr.to_lowercase();
    let raw_message = if !stderr.is_empty() {
        stderr.to_string()
    } else if let Some(signal) = run.signal {
        format!("Terminated by {} ({})", signal_name(signal), signal)
    } else if let Some(code) = run.exit_code {
        format!("Process exited with code {code}")
    } else {
        "Process terminated abnormally".to_string()
    };

    let is_segv = matches!(run.signal, Some(SIGSEGV | SIGBUS))
        || matches!(run.exit_code, Some(EXIT_SEGV | EXIT_BUS))
        || mentions(&lowered, SEGV_SIGNATURES);
    let is_fpe = matches!(run.signal, Some(SIGFPE))
        || matches!(run.exit_code, Some(EXIT_FPE))
        || mentions(&lowered, FPE_SIGNATURES);
    let is_abort = matches!(run.signal, Some(SIGABRT))
        || matches!(run.exit_code, Some(EXIT_ABRT))
        || mentions(&lowered, ABORT_SIGNATURES);

    // Signals take precedence over text, text over exit codes
    let category = match run.signal {
        Some(SIGSEGV | SIGBUS) => RuntimeCategory::SegmentationViolation,
        Some(SIGFPE) => RuntimeCategory::ArithmeticException,
        Some(SIGABRT | SIGKILL) => RuntimeCategory::AbnormalTermination,
        _ if is_segv => RuntimeCategory::SegmentationViolation,
        _ if is_fpe => RuntimeCategory::ArithmeticException,
        _ if is_abort => RuntimeCategory::AbnormalTermination,
        _ => RuntimeCategory::Unknown,
    };

    let (localized_message, hint_list) = match category {
        RuntimeCategory::SegmentationViolation => (
            "The program accessed memory it does not own (segmentation fault).".to_string(),
            hints(&[
                "Check array and vector indexes against their sizes.",
                "Make sure pointers are initialized and not null before use.",
                "Deep or unbounded recursion can overflow the stack.",
            ]),
        ),
        RuntimeCategory::ArithmeticException => (
            "The program performed an invalid arithmetic operation, usually a division by zero."
                .to_string(),
            hints(&[
                "Check divisors and modulo operands for zero before dividing.",
                "Integer overflow in INT_MIN / -1 also raises this error.",
            ]),
        ),
        RuntimeCategory::AbnormalTermination if run.signal == Some(SIGKILL) => (
            "The program was killed, often because it used too much memory.".to_string(),
            hints(&["Reduce the size of large arrays or containers."]),
        ),
        RuntimeCategory::AbnormalTermination => (
            "The program stopped abnormally (failed assertion, uncaught exception or abort)."
                .to_string(),
            hints(&[
                "Check the condition of any failing assert().",
                "Catch or avoid exceptions such as std::out_of_range.",
                "Memory freed twice or corrupted also aborts the program.",
            ]),
        ),
        RuntimeCategory::Timeout | RuntimeCategory::Unknown => {
            ("Runtime error".to_string(), Vec::new())
        }
    };

    RuntimeFailure {
        category,
        raw_message,
        localized_message,
        hints: hint_list,
    }
}
