//! Diagnostic Classifier
//!
//! Turns raw compiler output and process terminations into structured,
//! localized entries. Everything here is a pure function of its input and
//! never fails: text that matches no known pattern is passed through raw.

pub mod compile;
pub mod runtime;

pub use compile::{build_compile_error, parse_compile_output};
pub use runtime::{classify_runtime, RuntimeSignal};
