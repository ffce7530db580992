// Environment-driven defaults for execution limits

use crate::types::ExecutionLimits;

pub const COMPILE_TIMEOUT_ENV: &str = "JUDGE_COMPILE_TIMEOUT_MS";
pub const RUN_TIMEOUT_ENV: &str = "JUDGE_RUN_TIMEOUT_MS";
pub const TEST_TIMEOUT_ENV: &str = "JUDGE_TEST_TIMEOUT_MS";
pub const MAX_OUTPUT_ENV: &str = "JUDGE_MAX_OUTPUT_BYTES";

impl ExecutionLimits {
    /// Built-in defaults, with any `JUDGE_*` variables that parse applied on top.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            compile_timeout_ms: read(COMPILE_TIMEOUT_ENV).unwrap_or(defaults.compile_timeout_ms),
            run_timeout_ms: read(RUN_TIMEOUT_ENV).unwrap_or(defaults.run_timeout_ms),
            test_timeout_ms: read(TEST_TIMEOUT_ENV).unwrap_or(defaults.test_timeout_ms),
            max_output_bytes: read(MAX_OUTPUT_ENV)
                .map(|v| v as usize)
                .unwrap_or(defaults.max_output_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [(RUN_TIMEOUT_ENV, "250"), (MAX_OUTPUT_ENV, "1024")]
            .into_iter()
            .collect();

        let limits = ExecutionLimits::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(limits.run_timeout_ms, 250);
        assert_eq!(limits.max_output_bytes, 1024);
        assert_eq!(limits.compile_timeout_ms, ExecutionLimits::default().compile_timeout_ms);
    }

    #[test]
    fn test_garbage_values_ignored() {
        let limits = ExecutionLimits::from_lookup(|k| {
            (k == COMPILE_TIMEOUT_ENV).then(|| "soon".to_string())
        });
        assert_eq!(limits, ExecutionLimits::default());
    }
}
