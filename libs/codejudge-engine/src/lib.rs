//! Execution core of the code judge.
//!
//! [`Executor`] is the entry point: it takes an [`ExecutionRequest`] and
//! always returns an [`ExecutionResult`], running JavaScript in the embedded
//! sandbox and C/C++ through the native compile-and-run pipeline.
//!
//! [`ExecutionRequest`]: codejudge_common::types::ExecutionRequest
//! [`ExecutionResult`]: codejudge_common::types::ExecutionResult

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod harness;
pub mod mode;
pub mod process;
pub mod sandbox;
pub mod sanitize;
pub mod workspace;


pub use config::{EngineConfig, Toolchain, ToolchainRegistry};
pub use error::EngineError;
pub use executor::Executor;
