use preprocess::FrameError;
use thiserror::Error;

/// Failures of the inference engine lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine is already initialized")]
    AlreadyInitialized,

    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("Output layer '{0}' requested more than once")]
    DuplicateOutputLayer(String),

    #[error("Backend did not provide requested output layer '{0}'")]
    MissingOutputLayer(String),

    #[error("Failed to build graph for {path}: {reason}")]
    GraphBuild { path: String, reason: String },

    #[error("Invalid shape for tensor '{name}': {reason}")]
    Shape { name: String, reason: String },

    #[error("Execution failed: {0}")]
    Execution(String),
}

/// Failures surfaced by a detection call or detector construction.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] FrameError),

    #[error("Detector is not initialized")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Pre-processing failed: {0}")]
    PreProcess(String),

    #[error("Post-processing failed: {0}")]
    PostProcess(String),
}
