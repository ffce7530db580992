//! Textual sanitizers.
//!
//! Best effort only: dangerous calls are rewritten in place so the program
//! still compiles or loads, but calling them fails. This is not an isolation
//! boundary.

use regex::Regex;
use std::sync::OnceLock;

/// Source after neutralization plus the constructs that were rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub code: String,
    pub neutralized: Vec<String>,
}

impl Sanitized {
    pub fn is_clean(&self) -> bool {
        self.neutralized.is_empty()
    }
}

const NATIVE_BLOCKED: &[&str] = &[
    "system", "popen", "fork", "vfork", "execl", "execlp", "execle", "execv", "execvp",
    "execvpe", "kill", "remove", "unlink",
];

fn native_call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names = NATIVE_BLOCKED.join("|");
        Regex::new(&format!(r"\b(?:std\s*::\s*)?({names})\s*\(")).expect("valid native call regex")
    })
}

fn script_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"\bprocess\s*\.\s*exit\b", "process.exit"),
            (r"\bprocess\s*\.\s*kill\b", "process.kill"),
            (r"\brequire\b", "require"),
            (r"\bimport\s*\(", "import"),
            (r"\bchild_process\b", "child_process"),
            (r"\bexecSync\b", "execSync"),
            (r"\bspawnSync\b", "spawnSync"),
        ]
        .into_iter()
        .map(|(pattern, name)| (Regex::new(pattern).expect("valid script rule"), name))
        .collect()
    })
}

/// Rewrite process-control and module-loading constructs to `__blocked("<name>")`.
///
/// The sandbox prelude defines `__blocked` as a function that throws, so
/// `process.exit(1)` becomes `__blocked("process.exit")(1)` and fails before
/// anything runs.
pub fn sanitize_script(code: &str) -> Sanitized {
    let mut current = code.to_string();
    let mut neutralized = Vec::new();

    for (re, name) in script_rules() {
        let masked = mask_comments_and_literals(&current, true);
        let mut out = String::with_capacity(current.len());
        let mut last = 0;
        let mut hit = false;

        for m in re.find_iter(&masked) {
            out.push_str(&current[last..m.start()]);
            out.push_str(&format!("__blocked(\"{name}\")"));
            // keep the `(` the import rule consumed
            if m.as_str().ends_with('(') {
                out.push('(');
            }
            last = m.end();
            hit = true;
        }

        if hit {
            out.push_str(&current[last..]);
            current = out;
            neutralized.push(name.to_string());
        }
    }

    Sanitized {
        code: current,
        neutralized,
    }
}

/// Rewrite calls such as `system("...")` to `judge_blocked_system(...)`.
///
/// Declarations (`int kill(int pid)`) and member calls (`list.remove(x)`)
/// are left alone. The macros come from [`native_guard_preamble`].
pub fn sanitize_native(code: &str) -> Sanitized {
    let masked = mask_comments_and_literals(code, false);
    let mut out = String::with_capacity(code.len());
    let mut neutralized: Vec<String> = Vec::new();
    let mut last = 0;

    for caps in native_call_regex().captures_iter(&masked) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !is_call_site(&masked[..whole.start()]) {
            continue;
        }
        out.push_str(&code[last..whole.start()]);
        out.push_str("judge_blocked_");
        out.push_str(name.as_str());
        out.push('(');
        last = whole.end();

        if !neutralized.iter().any(|n| n == name.as_str()) {
            neutralized.push(name.as_str().to_string());
        }
    }
    out.push_str(&code[last..]);

    Sanitized {
        code: out,
        neutralized,
    }
}

/// A free-function call, not a declaration or member access.
fn is_call_site(before: &str) -> bool {
    let before = before.trim_end();
    if before.ends_with('.') || before.ends_with("->") || before.ends_with("::") {
        return false;
    }
    match before.chars().last() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => {
            let word: String = before
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            word == "return"
        }
        _ => true,
    }
}

/// Macro definitions that back the rewritten native calls.
pub fn native_guard_preamble() -> String {
    let mut out = String::new();
    for name in NATIVE_BLOCKED {
        let value = if *name == "popen" { "0" } else { "(-1)" };
        out.push_str(&format!("#define judge_blocked_{name}(...) {value}\n"));
    }
    out
}

/// Blank out comments and string/char literal contents, keeping byte offsets.
///
/// Quotes themselves are kept so the result still reads as code. With
/// `template_literals` backticks are treated as string delimiters too.
pub fn mask_comments_and_literals(code: &str, template_literals: bool) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Literal(u8),
    }

    let bytes = code.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut state = State::Code;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Code => match b {
                b'/' if next == Some(b'/') => {
                    state = State::LineComment;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                b'/' if next == Some(b'*') => {
                    state = State::BlockComment;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                b'"' | b'\'' => {
                    state = State::Literal(b);
                    out.push(b);
                }
                b'`' if template_literals => {
                    state = State::Literal(b);
                    out.push(b);
                }
                _ => out.push(b),
            },
            State::LineComment => {
                if b == b'\n' {
                    state = State::Code;
                    out.push(b'\n');
                } else {
                    out.push(b' ');
                }
            }
            State::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = State::Code;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                out.push(if b == b'\n' { b'\n' } else { b' ' });
            }
            State::Literal(quote) => {
                if b == b'\\' {
                    out.push(b' ');
                    if let Some(n) = next {
                        out.push(if n == b'\n' { b'\n' } else { b' ' });
                    }
                    i += 2;
                    continue;
                }
                if b == quote {
                    state = State::Code;
                    out.push(b);
                } else if b == b'\n' && quote != b'`' {
                    // unterminated literal ends at the line break
                    state = State::Code;
                    out.push(b'\n');
                } else {
                    out.push(if b == b'\n' { b'\n' } else { b' ' });
                }
            }
        }
        i += 1;
    }

    // Only ASCII bytes were substituted, and whole multi-byte sequences are blanked together
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_process_exit_is_blocked() {
        let result = sanitize_script("function f(){ process.exit(1); }");
        assert_eq!(
            result.code,
            "function f(){ __blocked(\"process.exit\")(1); }"
        );
        assert_eq!(result.neutralized, vec!["process.exit"]);
    }

    #[test]
    fn test_script_require_and_import() {
        let result = sanitize_script("const cp = require('child_process');\nimport('fs');");
        assert!(result.code.contains("__blocked(\"require\")('child_process')"));
        assert!(result.code.contains("__blocked(\"import\")('fs')"));
        assert!(result.neutralized.contains(&"require".to_string()));
        assert!(result.neutralized.contains(&"import".to_string()));
    }

    #[test]
    fn test_script_strings_are_untouched() {
        let code = "function f(){ return \"process.exit\"; }";
        let result = sanitize_script(code);
        assert_eq!(result.code, code);
        assert!(result.is_clean());
    }

    #[test]
    fn test_native_system_call_rewritten() {
        let result = sanitize_native("int main(){ system(\"rm -rf /\"); return 0; }");
        assert_eq!(
            result.code,
            "int main(){ judge_blocked_system(\"rm -rf /\"); return 0; }"
        );
        assert_eq!(result.neutralized, vec!["system"]);
    }

    #[test]
    fn test_native_std_prefix_and_return() {
        let result = sanitize_native("int f(){ return std::system(\"ls\"); }");
        assert_eq!(result.code, "int f(){ return judge_blocked_system(\"ls\"); }");
    }

    #[test]
    fn test_native_declarations_and_members_untouched() {
        let code = "int kill(int x) { return x; }\nvoid g(std::list<int>& l){ l.remove(3); }";
        let result = sanitize_native(code);
        assert_eq!(result.code, code);
        assert!(result.is_clean());
    }

    #[test]
    fn test_native_literals_untouched() {
        let code = "// fork() here\nconst char* s = \"fork()\";";
        let result = sanitize_native(code);
        assert_eq!(result.code, code);
    }

    #[test]
    fn test_guard_preamble_defines_every_macro() {
        let preamble = native_guard_preamble();
        for name in NATIVE_BLOCKED {
            assert!(preamble.contains(&format!("#define judge_blocked_{name}(...)")));
        }
    }

    #[test]
    fn test_mask_keeps_offsets() {
        let code = "a = \"héllo\"; /* c */ b";
        let masked = mask_comments_and_literals(code, false);
        assert_eq!(masked.len(), code.len());
        assert!(masked.starts_with("a = \""));
        assert!(masked.ends_with(" b"));
        assert!(!masked.contains('c'));
    }
}
