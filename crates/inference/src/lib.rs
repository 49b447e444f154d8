pub mod annotate;
pub mod backend;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod labels;
pub mod logging;
pub mod processing;
pub mod tensor;

// Re-export commonly used types for convenience
pub use backend::{BackendProvider, InferenceBackend, Runtime};
pub use config::DetectorConfig;
pub use detector::{Detector, DetectorBuilder, PostProcessHook, PreProcessHook};
pub use engine::{EngineStatus, InferenceEngine};
pub use error::{DetectError, EngineError};
pub use labels::Labels;
pub use processing::{DecodeContext, DetectionBox, PostProcessor};
pub use tensor::{NamedBuffer, TensorBufferSet, TensorShape, packed_strides};
pub use preprocess::{ColorFormat, Frame, Roi};
