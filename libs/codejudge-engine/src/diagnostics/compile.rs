//! Compiler diagnostic parsing and localization.

use codejudge_common::types::{CompileDiagnostic, CompileError, DiagnosticKind, Language, Severity};
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Lines to scan after a diagnostic for its caret marker.
const CARET_LOOKAHEAD: usize = 3;

fn diagnostic_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^(?P<file>[^:\n]+):(?P<line>\d+):(?P<col>\d+): ",
            r"(?P<sev>fatal error|error|warning|note): (?P<msg>.*)$",
        ))
        .expect("valid diagnostic regex")
    })
}

fn undefined_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"undefined reference to [`'‘]([^`'’]+)['’]").expect("valid linker regex")
    })
}

/// Header that declares a standard function, as `(c_header, cpp_header)`.
fn header_for(name: &str) -> Option<(&'static str, &'static str)> {
    let header = match name {
        "printf" | "scanf" | "puts" | "gets" | "fprintf" | "sprintf" | "snprintf" | "sscanf"
        | "getchar" | "putchar" | "fgets" | "fputs" | "fopen" | "fclose" => ("stdio.h", "cstdio"),
        "malloc" | "calloc" | "realloc" | "free" | "exit" | "abs" | "atoi" | "atof" | "atol"
        | "rand" | "srand" | "qsort" | "strtol" => ("stdlib.h", "cstdlib"),
        "strlen" | "strcpy" | "strncpy" | "strcmp" | "strncmp" | "strcat" | "strchr"
        | "strstr" | "memset" | "memcpy" | "memmove" => ("string.h", "cstring"),
        "sqrt" | "pow" | "fabs" | "floor" | "ceil" | "round" | "sin" | "cos" | "tan" | "log"
        | "log10" | "exp" => ("math.h", "cmath"),
        "isdigit" | "isalpha" | "isalnum" | "isspace" | "isupper" | "islower" | "toupper"
        | "tolower" => ("ctype.h", "cctype"),
        "bool" | "true" | "false" => ("stdbool.h", "cstdbool"),
        "INT_MAX" | "INT_MIN" | "LLONG_MAX" | "LLONG_MIN" => ("limits.h", "climits"),
        "cout" | "cin" | "cerr" | "endl" => ("iostream", "iostream"),
        "string" | "getline" | "to_string" | "stoi" => ("string", "string"),
        "vector" => ("vector", "vector"),
        "map" => ("map", "map"),
        "set" => ("set", "set"),
        "unordered_map" => ("unordered_map", "unordered_map"),
        "stack" => ("stack", "stack"),
        "queue" | "priority_queue" => ("queue", "queue"),
        "pair" | "swap" | "make_pair" => ("utility", "utility"),
        "sort" | "reverse" | "max" | "min" | "max_element" | "min_element" | "find" => {
            ("algorithm", "algorithm")
        }
        "accumulate" => ("numeric", "numeric"),
        "setprecision" | "setw" => ("iomanip", "iomanip"),
        _ => return None,
    };
    Some(header)
}

fn include_suggestion(language: Language, name: &str) -> Option<String> {
    let (c_header, cpp_header) = header_for(name)?;
    let header = if language == Language::C { c_header } else { cpp_header };
    Some(format!("Add #include <{header}> at the top of the file."))
}

struct Localized {
    kind: DiagnosticKind,
    message: String,
    suggestion: Option<String>,
}

type Localizer = fn(&Captures, Language) -> Localized;

fn quoted(caps: &Captures, group: usize) -> String {
    caps.get(group)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn rules() -> &'static [(Regex, Localizer)] {
    static RULES: OnceLock<Vec<(Regex, Localizer)>> = OnceLock::new();
    RULES.get_or_init(|| {
        let table: [(&str, Localizer); 14] = [
            (r"expected ['‘];['’]", |_, _| Localized {
                kind: DiagnosticKind::MissingSemicolon,
                message: "Missing semicolon (;) at the end of a statement.".to_string(),
                suggestion: Some("Add ';' at the end of the previous statement.".to_string()),
            }),
            (r"implicit declaration of function ['‘](\w+)['’]", |caps, lang| {
                let name = quoted(caps, 1);
                Localized {
                    kind: DiagnosticKind::MissingInclude,
                    message: format!("Function '{name}' is used without being declared."),
                    suggestion: include_suggestion(lang, &name)
                        .or_else(|| Some(format!("Declare '{name}' before calling it."))),
                }
            }),
            (
                r"['‘](\w+)['’] (?:was not declared in this scope|undeclared)",
                |caps, lang| {
                    let name = quoted(caps, 1);
                    match include_suggestion(lang, &name) {
                        Some(suggestion) => Localized {
                            kind: DiagnosticKind::MissingInclude,
                            message: format!(
                                "'{name}' is used but the header that declares it is not included."
                            ),
                            suggestion: Some(suggestion),
                        },
                        None => Localized {
                            kind: DiagnosticKind::UndeclaredIdentifier,
                            message: format!("'{name}' is used but was never declared."),
                            suggestion: Some(format!(
                                "Declare '{name}' before using it, or check its spelling."
                            )),
                        },
                    }
                },
            ),
            (
                r"unknown type name ['‘](\w+)['’]|['‘](\w+)['’] does not name a type",
                |caps, lang| {
                    let name = caps
                        .get(1)
                        .or_else(|| caps.get(2))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default();
                    Localized {
                        kind: DiagnosticKind::UnknownType,
                        message: format!("'{name}' is not a known type."),
                        suggestion: include_suggestion(lang, &name).or_else(|| {
                            Some("Check the spelling of the type name.".to_string())
                        }),
                    }
                },
            ),
            (
                r"expected ['‘][\)\]\}]['’]|expected ['‘]\}['’] at end of input|expected declaration or statement at end of input",
                |_, _| Localized {
                    kind: DiagnosticKind::MismatchedBracket,
                    message: "A bracket is not closed or does not match its opening bracket."
                        .to_string(),
                    suggestion: Some(
                        "Check that every '(', '[' and '{' has a matching closing bracket."
                            .to_string(),
                    ),
                },
            ),
            (
                r"expected (?:primary-)?expression before",
                |_, _| Localized {
                    kind: DiagnosticKind::ExpectedExpression,
                    message: "An expression is missing or incomplete here.".to_string(),
                    suggestion: None,
                },
            ),
            (
                r"(?:redefinition|redeclaration) of ['‘]([^'’]+)['’]|conflicting (?:declaration|types for) ['‘]([^'’]+)['’]",
                |caps, _| {
                    let name = caps
                        .get(1)
                        .or_else(|| caps.get(2))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default();
                    Localized {
                        kind: DiagnosticKind::Redefinition,
                        message: format!("'{name}' is defined more than once."),
                        suggestion: Some("Rename one of the definitions or remove the duplicate.".to_string()),
                    }
                },
            ),
            (
                r"too (few|many) arguments to function",
                |caps, _| Localized {
                    kind: DiagnosticKind::ArgumentCount,
                    message: format!(
                        "The function is called with too {} arguments.",
                        quoted(caps, 1)
                    ),
                    suggestion: Some(
                        "Compare the call with the function's parameter list.".to_string(),
                    ),
                },
            ),
            (
                r"no matching function for call to ['‘]([^'’]+)['’]",
                |caps, _| Localized {
                    kind: DiagnosticKind::NoMatchingFunction,
                    message: format!(
                        "No function matches the call '{}' with these argument types.",
                        quoted(caps, 1)
                    ),
                    suggestion: Some("Check the number and types of the arguments.".to_string()),
                },
            ),
            (
                r"cannot convert|invalid conversion from|incompatible types?|incompatible (?:pointer|integer)",
                |_, _| Localized {
                    kind: DiagnosticKind::TypeMismatch,
                    message: "A value has the wrong type for where it is used.".to_string(),
                    suggestion: Some(
                        "Check the declared types of the variables and function results involved."
                            .to_string(),
                    ),
                },
            ),
            (
                r"no return statement in function returning non-void|control reaches end of non-void function",
                |_, _| Localized {
                    kind: DiagnosticKind::MissingReturn,
                    message: "A function that must return a value can finish without returning one."
                        .to_string(),
                    suggestion: Some("Add a return statement on every path.".to_string()),
                },
            ),
            (r"unused variable ['‘](\w+)['’]", |caps, _| Localized {
                kind: DiagnosticKind::UnusedVariable,
                message: format!("Variable '{}' is declared but never used.", quoted(caps, 1)),
                suggestion: None,
            }),
            (
                r"format ['‘][^'’]+['’] expects argument of type ['‘]([^'’]+)['’], but argument (\d+) has type ['‘]([^'’]+)['’]",
                |caps, _| Localized {
                    kind: DiagnosticKind::FormatMismatch,
                    message: format!(
                        "The format expects '{}', but argument {} has type '{}'.",
                        quoted(caps, 1),
                        quoted(caps, 2),
                        quoted(caps, 3)
                    ),
                    suggestion: Some(
                        "Use the conversion specifier that matches the argument type.".to_string(),
                    ),
                },
            ),
            (
                r"suggest parentheses around assignment used as truth value",
                |_, _| Localized {
                    kind: DiagnosticKind::AssignmentInCondition,
                    message: "An assignment '=' is used as a condition.".to_string(),
                    suggestion: Some("Use '==' to compare values.".to_string()),
                },
            ),
        ];

        table
            .into_iter()
            .map(|(pattern, localize)| {
                (
                    Regex::new(pattern).expect("valid localization pattern"),
                    localize,
                )
            })
            .collect()
    })
}

fn localize(message: &str, language: Language) -> Localized {
    for (re, localize) in rules() {
        if let Some(caps) = re.captures(message) {
            return localize(&caps, language);
        }
    }
    Localized {
        kind: DiagnosticKind::Other,
        message: message.to_string(),
        suggestion: None,
    }
}

fn parse_severity(text: &str) -> Severity {
    match text {
        "warning" => Severity::Warning,
        "note" => Severity::Note,
        _ => Severity::Error,
    }
}

/// Width of the `^~~~` run on a caret line, if `line` is one.
fn caret_width(line: &str) -> Option<u32> {
    let body = match line.find('|') {
        Some(bar) if line[..bar].trim().is_empty() => &line[bar + 1..],
        _ => line,
    };
    let trimmed = body.trim_start();
    if !trimmed.starts_with('^') {
        return None;
    }
    let width = trimmed
        .chars()
        .take_while(|c| *c == '^' || *c == '~')
        .count();
    Some(width as u32)
}

/// Parse gcc/g++ output into diagnostics sorted by position.
///
/// Entries are deduplicated on (line, column, message). Linker
/// `undefined reference` errors become line-0 diagnostics.
pub fn parse_compile_output(raw: &str, language: Language) -> Vec<CompileDiagnostic> {
    let lines: Vec<&str> = raw.lines().collect();
    let mut seen = HashSet::new();
    let mut diagnostics = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = diagnostic_line_regex().captures(line) {
            let line_no: u32 = caps["line"].parse().unwrap_or(0);
            let column: u32 = caps["col"].parse().unwrap_or(0);
            let raw_message = caps["msg"].trim().to_string();

            if !seen.insert((line_no, column, raw_message.clone())) {
                continue;
            }

            let end_column = lines
                .iter()
                .skip(idx + 1)
                .take(CARET_LOOKAHEAD)
                .take_while(|l| !diagnostic_line_regex().is_match(l))
                .find_map(|l| caret_width(l))
                .map(|width| column + width.max(1))
                .unwrap_or(column + 1);

            let localized = localize(&raw_message, language);
            diagnostics.push(CompileDiagnostic {
                file: caps["file"].to_string(),
                line: line_no,
                column,
                end_column,
                severity: parse_severity(&caps["sev"]),
                kind: localized.kind,
                raw_message,
                localized_message: localized.message,
                suggestion: localized.suggestion,
            });
            continue;
        }

        if let Some(caps) = undefined_reference_regex().captures(line) {
            let symbol = quoted(&caps, 1);
            let raw_message = format!("undefined reference to '{symbol}'");
            if !seen.insert((0, 0, raw_message.clone())) {
                continue;
            }
            diagnostics.push(CompileDiagnostic {
                file: "linker".to_string(),
                line: 0,
                column: 0,
                end_column: 0,
                severity: Severity::Error,
                kind: DiagnosticKind::UndefinedReference,
                raw_message,
                localized_message: format!(
                    "'{symbol}' is declared or called but never defined."
                ),
                suggestion: Some(
                    "Define the function, or check that its name and parameters match the call."
                        .to_string(),
                ),
            });
        }
    }

    diagnostics.sort_by_key(|d| (d.line, d.column));
    diagnostics
}

/// Assemble the compile error reported to the caller.
pub fn build_compile_error(
    raw: &str,
    language: Language,
    timed_out: bool,
    timeout_ms: u64,
) -> CompileError {
    let raw = raw.trim().to_string();

    if timed_out {
        return CompileError {
            message: format!("Compilation timed out after {timeout_ms}ms"),
            raw,
            timed_out: true,
            diagnostics: Vec::new(),
        };
    }

    let diagnostics = parse_compile_output(&raw, language);
    let errors: Vec<&CompileDiagnostic> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();

    let message = match errors.first() {
        Some(first) if first.line > 0 => format!(
            "Compilation failed with {} error(s). Line {}, column {}: {}",
            errors.len(),
            first.line,
            first.column,
            first.localized_message
        ),
        Some(first) => format!(
            "Compilation failed with {} error(s): {}",
            errors.len(),
            first.localized_message
        ),
        None => {
            let first_line = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            if first_line.is_empty() {
                "Compilation failed".to_string()
            } else {
                format!("Compilation failed: {first_line}")
            }
        }
    };

    CompileError {
        message,
        raw,
        timed_out: false,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_SEMICOLON: &str = "main.cpp: In function 'int main()':
main.cpp:4:14: error: expected ';' before 'return'
    4 |     int x = 5
      |              ^
      |              ;
    5 |     return x;
      |     ~~~~~~
";

    #[test]
    fn test_missing_semicolon() {
        let diags = parse_compile_output(MISSING_SEMICOLON, Language::Cpp);

        assert_eq!(diags.len(), 1);
        let d = &diags[0];
        assert_eq!(d.file, "main.cpp");
        assert_eq!(d.line, 4);
        assert_eq!(d.column, 14);
        assert_eq!(d.end_column, 15);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.kind, DiagnosticKind::MissingSemicolon);
        assert!(d.suggestion.is_some());
    }

    #[test]
    fn test_caret_run_sets_end_column() {
        let raw = "main.c:3:5: error: 'foo' undeclared (first use in this function)
    3 |     foo = 1;
      |     ^~~
";
        let diags = parse_compile_output(raw, Language::C);
        assert_eq!(diags[0].end_column, 8);
        assert_eq!(diags[0].kind, DiagnosticKind::UndeclaredIdentifier);
    }

    #[test]
    fn test_implicit_declaration_suggests_header() {
        let raw = "main.c:2:5: warning: implicit declaration of function 'printf' [-Wimplicit-function-declaration]";
        let diags = parse_compile_output(raw, Language::C);
        assert_eq!(diags[0].kind, DiagnosticKind::MissingInclude);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(
            diags[0].suggestion.as_deref(),
            Some("Add #include <stdio.h> at the top of the file.")
        );
    }

    #[test]
    fn test_undeclared_known_name_suggests_cpp_header() {
        let raw = "main.cpp:5:5: error: 'cout' was not declared in this scope";
        let diags = parse_compile_output(raw, Language::Cpp);
        assert_eq!(diags[0].kind, DiagnosticKind::MissingInclude);
        assert!(diags[0].suggestion.as_deref().unwrap().contains("<iostream>"));
    }

    #[test]
    fn test_unicode_quotes() {
        let raw = "main.cpp:2:1: error: ‘strng’ does not name a type";
        let diags = parse_compile_output(raw, Language::Cpp);
        assert_eq!(diags[0].kind, DiagnosticKind::UnknownType);
        assert!(diags[0].localized_message.contains("strng"));
    }

    #[test]
    fn test_dedupe_and_sort() {
        let raw = "main.cpp:9:1: error: expected '}' at end of input
main.cpp:2:3: error: 'y' was not declared in this scope
main.cpp:2:3: error: 'y' was not declared in this scope
";
        let diags = parse_compile_output(raw, Language::Cpp);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].line, 2);
        assert_eq!(diags[1].line, 9);
        assert_eq!(diags[1].kind, DiagnosticKind::MismatchedBracket);
    }

    #[test]
    fn test_linker_error() {
        let raw = "/usr/bin/ld: /tmp/cc1.o: in function `main':
main.cpp:(.text+0x5): undefined reference to `helper(int)'
collect2: error: ld returned 1 exit status";
        let diags = parse_compile_output(raw, Language::Cpp);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 0);
        assert_eq!(diags[0].kind, DiagnosticKind::UndefinedReference);
        assert!(diags[0].localized_message.contains("helper(int)"));
    }

    #[test]
    fn test_unmatched_message_passes_through() {
        let raw = "main.cpp:1:1: error: something entirely new";
        let diags = parse_compile_output(raw, Language::Cpp);
        assert_eq!(diags[0].kind, DiagnosticKind::Other);
        assert_eq!(diags[0].localized_message, "something entirely new");
    }

    #[test]
    fn test_build_compile_error_message() {
        let error = build_compile_error(MISSING_SEMICOLON, Language::Cpp, false, 10_000);
        assert!(error.message.starts_with("Compilation failed with 1 error(s). Line 4, column 14"));
        assert!(!error.timed_out);
        assert_eq!(error.diagnostics.len(), 1);
    }

    #[test]
    fn test_build_compile_error_timeout() {
        let error = build_compile_error("", Language::C, true, 250);
        assert_eq!(error.message, "Compilation timed out after 250ms");
        assert!(error.timed_out);
    }

    #[test]
    fn test_build_compile_error_without_diagnostics() {
        let error = build_compile_error("cc1plus: out of memory", Language::Cpp, false, 1);
        assert_eq!(error.message, "Compilation failed: cc1plus: out of memory");
    }
}
