use thiserror::Error;

/// Infrastructure failures inside the engine.
///
/// None of these are attributable to the submitted code; the orchestrator
/// turns every variant into a `systemError` result.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("compiler '{compiler}' is not installed or not on PATH")]
    ToolchainMissing { compiler: String },

    #[error("no toolchain configured for language '{0}'")]
    ToolchainNotConfigured(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} exceeds maximum size of {limit} bytes")]
    InputTooLarge { what: &'static str, limit: usize },

    #[error("script engine error: {0}")]
    ScriptEngine(String),

    #[error("execution task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
