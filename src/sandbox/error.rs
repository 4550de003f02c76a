//! Error types for the application sandbox.

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("engine creation failed: {0}")]
    EngineCreation(String),
    #[error("component compilation failed: {0}")]
    Compilation(String),
    #[error("instantiation failed: {0}")]
    Instantiation(String),
    #[error("export '{0}' not found")]
    MissingExport(String),
    #[error("guest execution failed: {0}")]
    Execution(String),
    #[error("malformed guest message: {0}")]
    Protocol(String),
    #[error("capability error: {0}")]
    Capability(String),
    #[error("guest did not settle within {0} rounds")]
    RoundLimit(usize),
}
