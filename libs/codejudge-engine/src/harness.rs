//! Harness synthesis for function-invocation mode.
//!
//! **Layout of a generated program:**
//! 1. Preamble: standard includes, value printers, sanitizer macros
//! 2. User code, introduced by `#line 1 "<source file>"` so compiler
//!    diagnostics point at the student's own line numbers
//! 3. Driver: a generated `main` that evaluates each invocation and prints
//!    `__TC_<tag>_<id>:<value>` or `__TC_<tag>_<id>__ERR:<message>`
//!
//! The tag is random per harness and never visible to the user code, so
//! only the driver can produce a marker that [`parse_markers`] accepts.
//! Test inputs only reach the driver after passing [`Invocation::parse`].

use crate::sanitize::native_guard_preamble;
use codejudge_common::types::Language;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;
use uuid::Uuid;

pub const MARKER_PREFIX: &str = "__TC_";
pub const DRIVER_FILE_NAME: &str = "test_driver";

/// A test input of the form `identifier(arguments)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub function: String,
    /// Argument text between the outer parentheses, verbatim.
    pub args: String,
}

impl Invocation {
    /// Parse a strict invocation expression.
    ///
    /// Accepts an identifier, optional whitespace and a parenthesized
    /// argument list whose closing `)` ends the input. Brackets inside the
    /// arguments must balance; quotes may be `'`, `"` or `` ` ``. A `;`
    /// outside a literal is rejected.
    pub fn parse(input: &str) -> Option<Self> {
        let text = input.trim();
        let mut chars = text.char_indices();

        let (_, first) = chars.next()?;
        if !is_ident_start(first) {
            return None;
        }
        let ident_end = text
            .char_indices()
            .find(|(_, c)| !is_ident_char(*c))
            .map(|(i, _)| i)?;
        let function = &text[..ident_end];

        let after_ident = &text[ident_end..];
        let open = ident_end + (after_ident.len() - after_ident.trim_start().len());
        if !text[open..].starts_with('(') {
            return None;
        }

        let args_start = open + 1;
        let close = args_start + find_closing_paren(&text[args_start..])?;
        if !text[close + 1..].trim().is_empty() {
            return None;
        }

        Some(Self {
            function: function.to_string(),
            args: text[args_start..close].trim().to_string(),
        })
    }

    pub fn expression(&self) -> String {
        format!("{}({})", self.function, self.args)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Characters outside string literals, with their byte offsets.
///
/// `None` for an unterminated literal or a `;` in code.
fn code_chars(text: &str) -> Option<Vec<(usize, char)>> {
    let mut out = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                ';' => return None,
                _ => out.push((i, c)),
            },
        }
    }

    if quote.is_some() {
        return None;
    }
    Some(out)
}

/// Offset of the `)` that closes an already-open parenthesis.
fn find_closing_paren(text: &str) -> Option<usize> {
    let mut stack = Vec::new();
    for (i, c) in code_chars(text)? {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' if stack.is_empty() => return Some(i),
            ')' | ']' | '}' => {
                let open = stack.pop()?;
                if !brackets_match(open, c) {
                    return None;
                }
            }
            _ => {}
        }
    }
    None
}

fn brackets_match(open: char, close: char) -> bool {
    matches!((open, close), ('(', ')') | ('[', ']') | ('{', '}'))
}

/// Whether `text` can stand as a bare argument list such as `[1, 2], 3`.
///
/// Brackets must balance and no argument may call a function, so
/// `Math.max(1, 2)` is rejected while `(1, 1)` and `[(1), 2]` pass.
pub fn is_argument_list(text: &str) -> bool {
    let Some(chars) = code_chars(text) else {
        return false;
    };
    let mut stack = Vec::new();
    let mut prev: Option<char> = None;
    for (_, c) in chars {
        match c {
            '(' if prev.is_some_and(|p| is_ident_char(p) || p == ')' || p == ']') => {
                return false;
            }
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => match stack.pop() {
                Some(open) if brackets_match(open, c) => {}
                _ => return false,
            },
            _ => {}
        }
        if !c.is_whitespace() {
            prev = Some(c);
        }
    }
    stack.is_empty() && !text.trim().is_empty()
}

/// Drop one pair of parentheses when they enclose the whole text.
pub fn strip_outer_parens(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix('(') else {
        return trimmed;
    };
    match find_closing_paren(inner) {
        Some(close) if close + 1 == inner.len() => inner[..close].trim(),
        _ => trimmed,
    }
}

const CPP_INCLUDES: &[&str] = &[
    "algorithm", "array", "climits", "cmath", "cstdio", "cstdlib", "cstring", "deque",
    "functional", "iomanip", "iostream", "limits", "map", "numeric", "queue", "set",
    "sstream", "stack", "stdexcept", "string", "tuple", "unordered_map", "unordered_set",
    "utility", "vector",
];

const C_INCLUDES: &[&str] = &[
    "ctype.h", "limits.h", "math.h", "stdbool.h", "stdint.h", "stdio.h", "stdlib.h", "string.h",
];

const CPP_PRINTERS: &str = r#"namespace judge_harness {
inline void print(std::ostream& os, bool value, bool) { os << (value ? "true" : "false"); }
inline void print(std::ostream& os, double value, bool) {
    std::ostringstream tmp;
    tmp << std::setprecision(15) << value;
    os << tmp.str();
}
inline void print(std::ostream& os, float value, bool nested) { print(os, static_cast<double>(value), nested); }
inline void print(std::ostream& os, long double value, bool nested) { print(os, static_cast<double>(value), nested); }
inline void print(std::ostream& os, char value, bool nested) {
    if (nested) os << '\'' << value << '\''; else os << value;
}
inline void print(std::ostream& os, const std::string& value, bool nested) {
    if (nested) os << '"' << value << '"'; else os << value;
}
inline void print(std::ostream& os, const char* value, bool nested) {
    print(os, std::string(value ? value : ""), nested);
}
inline void print(std::ostream& os, const std::vector<bool>& value, bool) {
    os << '[';
    for (std::size_t i = 0; i < value.size(); ++i) {
        if (i) os << ',';
        os << (value[i] ? "true" : "false");
    }
    os << ']';
}
template <typename T> void print(std::ostream& os, const T& value, bool nested);
template <typename A, typename B> void print(std::ostream& os, const std::pair<A, B>& value, bool nested);
template <typename T, typename Alloc> void print(std::ostream& os, const std::vector<T, Alloc>& value, bool nested);
template <typename T, std::size_t N> void print(std::ostream& os, const std::array<T, N>& value, bool nested);
template <typename T, typename C, typename Alloc> void print(std::ostream& os, const std::set<T, C, Alloc>& value, bool nested);
template <typename K, typename V, typename C, typename Alloc> void print(std::ostream& os, const std::map<K, V, C, Alloc>& value, bool nested);

template <typename It> void print_range(std::ostream& os, It first, It last) {
    os << '[';
    for (bool sep = false; first != last; ++first, sep = true) {
        if (sep) os << ',';
        print(os, *first, true);
    }
    os << ']';
}
template <typename T> void print(std::ostream& os, const T& value, bool) { os << value; }
template <typename A, typename B> void print(std::ostream& os, const std::pair<A, B>& value, bool) {
    os << '[';
    print(os, value.first, true);
    os << ',';
    print(os, value.second, true);
    os << ']';
}
template <typename T, typename Alloc> void print(std::ostream& os, const std::vector<T, Alloc>& value, bool) {
    print_range(os, value.begin(), value.end());
}
template <typename T, std::size_t N> void print(std::ostream& os, const std::array<T, N>& value, bool) {
    print_range(os, value.begin(), value.end());
}
template <typename T, typename C, typename Alloc> void print(std::ostream& os, const std::set<T, C, Alloc>& value, bool) {
    print_range(os, value.begin(), value.end());
}
template <typename K, typename V, typename C, typename Alloc> void print(std::ostream& os, const std::map<K, V, C, Alloc>& value, bool) {
    os << '{';
    bool sep = false;
    for (const auto& entry : value) {
        if (sep) os << ',';
        sep = true;
        print(os, entry.first, true);
        os << ':';
        print(os, entry.second, true);
    }
    os << '}';
}
template <typename T> std::string render(const T& value) {
    std::ostringstream os;
    print(os, value, false);
    return os.str();
}
} // namespace judge_harness
"#;

const C_PRINTERS: &str = r#"static inline void judge_harness_print_bool(_Bool v) { fputs(v ? "true" : "false", stdout); }
static inline void judge_harness_print_char(char v) { putchar(v); }
static inline void judge_harness_print_int(long long v) { printf("%lld", v); }
static inline void judge_harness_print_uint(unsigned long long v) { printf("%llu", v); }
static inline void judge_harness_print_double(double v) { printf("%.15g", v); }
static inline void judge_harness_print_str(const char* v) { fputs(v ? v : "", stdout); }
static inline void judge_harness_print_ptr(const void* v) { printf("%p", v); }
#define judge_harness_print(x) _Generic((x), \
    _Bool: judge_harness_print_bool, \
    char: judge_harness_print_char, \
    signed char: judge_harness_print_int, \
    short: judge_harness_print_int, \
    int: judge_harness_print_int, \
    long: judge_harness_print_int, \
    long long: judge_harness_print_int, \
    unsigned char: judge_harness_print_uint, \
    unsigned short: judge_harness_print_uint, \
    unsigned int: judge_harness_print_uint, \
    unsigned long: judge_harness_print_uint, \
    unsigned long long: judge_harness_print_uint, \
    float: judge_harness_print_double, \
    double: judge_harness_print_double, \
    long double: judge_harness_print_double, \
    char*: judge_harness_print_str, \
    const char*: judge_harness_print_str, \
    default: judge_harness_print_ptr)(x)
"#;

/// Builds the three-section harness program for one native language.
#[derive(Debug, Clone)]
pub struct HarnessBuilder {
    language: Language,
    source_file: String,
    user_code: String,
    guards: bool,
    tag: String,
    cases: Vec<(usize, Invocation)>,
}

impl HarnessBuilder {
    pub fn new(language: Language, source_file: impl Into<String>) -> Self {
        Self {
            language,
            source_file: source_file.into(),
            user_code: String::new(),
            guards: false,
            tag: Uuid::new_v4().simple().to_string(),
            cases: Vec::new(),
        }
    }

    pub fn user_code(mut self, code: impl Into<String>) -> Self {
        self.user_code = code.into();
        self
    }

    /// Emit the sanitizer macros backing `judge_blocked_*` calls.
    pub fn guards(mut self, enabled: bool) -> Self {
        self.guards = enabled;
        self
    }

    /// Marker tag the driver prints; pass it to [`parse_markers`].
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn case(mut self, test_case_id: usize, invocation: Invocation) -> Self {
        self.cases.push((test_case_id, invocation));
        self
    }

    pub fn case_count(&self) -> usize {
        self.cases.len()
    }

    pub fn build(&self) -> String {
        let mut out = self.preamble();
        let _ = writeln!(out, "#line 1 \"{}\"", self.source_file);
        out.push_str(&self.user_code);
        if !self.user_code.ends_with('\n') {
            out.push('\n');
        }
        let _ = writeln!(out, "#line 1 \"{}\"", DRIVER_FILE_NAME);
        out.push_str(&self.driver());
        out
    }

    fn preamble(&self) -> String {
        let mut out = String::new();
        match self.language {
            Language::Cpp => {
                for header in CPP_INCLUDES {
                    let _ = writeln!(out, "#include <{header}>");
                }
                out.push_str("using namespace std;\n");
                out.push_str(CPP_PRINTERS);
            }
            _ => {
                for header in C_INCLUDES {
                    let _ = writeln!(out, "#include <{header}>");
                }
                out.push_str(C_PRINTERS);
            }
        }
        if self.guards {
            out.push_str(&native_guard_preamble());
        }
        out
    }

    fn driver(&self) -> String {
        match self.language {
            Language::Cpp => self.cpp_driver(),
            _ => self.c_driver(),
        }
    }

    fn cpp_driver(&self) -> String {
        let mut out = String::from("int main() {\n");
        let tag = &self.tag;
        for (id, invocation) in &self.cases {
            let expr = invocation.expression();
            let _ = write!(
                out,
                "    try {{\n\
                 \x20       auto judge_value = ({expr});\n\
                 \x20       std::string judge_text = judge_harness::render(judge_value);\n\
                 \x20       std::cout << \"{MARKER_PREFIX}{tag}_{id}:\" << judge_text << std::endl;\n\
                 \x20   }} catch (const std::exception& judge_error) {{\n\
                 \x20       std::cout << \"{MARKER_PREFIX}{tag}_{id}__ERR:\" << judge_error.what() << std::endl;\n\
                 \x20   }} catch (...) {{\n\
                 \x20       std::cout << \"{MARKER_PREFIX}{tag}_{id}__ERR:unknown exception\" << std::endl;\n\
                 \x20   }}\n"
            );
        }
        out.push_str("    return 0;\n}\n");
        out
    }

    fn c_driver(&self) -> String {
        let mut out = String::from("int main(void) {\n");
        let tag = &self.tag;
        for (id, invocation) in &self.cases {
            let expr = invocation.expression();
            let _ = write!(
                out,
                "    {{\n\
                 \x20       __typeof__(({expr})) judge_value = ({expr});\n\
                 \x20       printf(\"{MARKER_PREFIX}{tag}_{id}:\");\n\
                 \x20       judge_harness_print(judge_value);\n\
                 \x20       putchar('\\n');\n\
                 \x20       fflush(stdout);\n\
                 \x20   }}\n"
            );
        }
        out.push_str("    return 0;\n}\n");
        out
    }
}

/// One recovered driver marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Value(String),
    Error(String),
}

#[derive(Debug, Clone, Default)]
pub struct ParsedMarkers {
    pub markers: BTreeMap<usize, Marker>,
    /// Program output with marker text removed.
    pub residual_stdout: String,
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"__TC_([0-9a-f]+)_(\d+)(__ERR)?:").expect("valid marker regex")
    })
}

/// Recover `__TC_<tag>_<id>` markers from harness stdout.
///
/// Only markers carrying `tag` count; anything else the program printed,
/// including look-alike markers, stays in the residual output. The first
/// tagged marker on a line wins so a returned value may contain marker
/// text. Ids outside `1..=test_count` are ignored.
pub fn parse_markers(stdout: &str, tag: &str, test_count: usize) -> ParsedMarkers {
    let mut parsed = ParsedMarkers::default();
    let mut residual = Vec::new();

    for line in stdout.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some(caps) = marker_regex()
            .captures_iter(line)
            .find(|caps| caps.get(1).is_some_and(|m| m.as_str() == tag))
        else {
            residual.push(line);
            continue;
        };
        let (Some(whole), Some(id)) = (caps.get(0), caps.get(2)) else {
            residual.push(line);
            continue;
        };

        let prefix = &line[..whole.start()];
        if !prefix.trim().is_empty() {
            residual.push(prefix);
        }

        let Ok(id) = id.as_str().parse::<usize>() else {
            continue;
        };
        if id == 0 || id > test_count {
            continue;
        }

        let text = line[whole.end()..].to_string();
        let marker = if caps.get(3).is_some() {
            Marker::Error(text)
        } else {
            Marker::Value(text)
        };
        parsed.markers.entry(id).or_insert(marker);
    }

    parsed.residual_stdout = residual.join("\n");
    parsed
}
