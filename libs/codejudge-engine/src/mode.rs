//! Execution mode detection.

use crate::sanitize::mask_comments_and_literals;
use codejudge_common::types::{ExecutionMode, Language, TestCase};
use regex::Regex;
use std::sync::OnceLock;

fn entry_point_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:int|void|auto)\s+main\s*\(").expect("valid entry point regex")
    })
}

/// Whether native source defines its own `main`.
///
/// Comments and string literals are ignored, so `// int main()` does not count.
/// Script languages have no entry point.
pub fn has_entry_point(language: Language, code: &str) -> bool {
    if language.is_script() {
        return false;
    }
    let masked = mask_comments_and_literals(code, false);
    entry_point_regex().is_match(&masked)
}

/// Pick the execution mode for a request.
///
/// An explicit mode always wins. Otherwise: no tests runs once, a program
/// with its own entry point talks over stdio, and everything else is
/// treated as function invocation.
pub fn resolve_mode(
    language: Language,
    code: &str,
    test_cases: &[TestCase],
    requested: Option<ExecutionMode>,
) -> ExecutionMode {
    if let Some(mode) = requested {
        return mode;
    }
    if test_cases.is_empty() {
        return ExecutionMode::Simple;
    }
    if has_entry_point(language, code) {
        return ExecutionMode::Stdio;
    }
    // Bare argument lists are still function tests; the script sandbox
    // derives the callee from the code.
    ExecutionMode::Function
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tc(input: &str) -> TestCase {
        TestCase {
            input: input.to_string(),
            expected_output: None,
            description: None,
        }
    }

    #[test]
    fn test_explicit_mode_wins() {
        let mode = resolve_mode(
            Language::Cpp,
            "int main(){}",
            &[tc("1 2")],
            Some(ExecutionMode::Function),
        );
        assert_eq!(mode, ExecutionMode::Function);
    }

    #[test]
    fn test_no_tests_is_simple() {
        assert_eq!(
            resolve_mode(Language::C, "int main(void){}", &[], None),
            ExecutionMode::Simple
        );
    }

    #[test]
    fn test_entry_point_is_stdio() {
        let code = "#include <cstdio>\nint main() { int a,b; scanf(\"%d %d\",&a,&b); }";
        assert_eq!(
            resolve_mode(Language::Cpp, code, &[tc("2 3")], None),
            ExecutionMode::Stdio
        );
    }

    #[test]
    fn test_invocation_is_function() {
        let code = "int add(int a, int b) { return a + b; }";
        assert_eq!(
            resolve_mode(Language::Cpp, code, &[tc("add(2, 3)")], None),
            ExecutionMode::Function
        );
    }

    #[test]
    fn test_fallback_is_function() {
        assert_eq!(
            resolve_mode(Language::Javascript, "function f(){}", &[tc("1 2")], None),
            ExecutionMode::Function
        );
    }

    #[test]
    fn test_commented_main_is_ignored() {
        let code = "// int main() { }\n/* void main( */ int add(int a,int b){return a+b;}";
        assert!(!has_entry_point(Language::C, code));
        assert!(has_entry_point(Language::C, "int  main (void) { return 0; }"));
        assert!(has_entry_point(Language::Cpp, "auto main() -> int { return 0; }"));
    }

    #[test]
    fn test_script_never_has_entry_point() {
        assert!(!has_entry_point(Language::Javascript, "function main() {}\nint main()"));
    }
}
