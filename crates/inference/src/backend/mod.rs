use crate::tensor::{TensorBufferSet, TensorShape};
use std::fmt;
use std::path::Path;

#[cfg(feature = "ort-backend")]
pub mod ort;

/// Compute target a model can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Runtime {
    #[default]
    Cpu,
    Gpu,
    GpuFloat16,
    Dsp,
    DspFixed8,
    Aip,
}

impl Runtime {
    pub const ALL: [Runtime; 6] = [
        Runtime::Cpu,
        Runtime::Gpu,
        Runtime::GpuFloat16,
        Runtime::Dsp,
        Runtime::DspFixed8,
        Runtime::Aip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Cpu => "cpu",
            Runtime::Gpu => "gpu",
            Runtime::GpuFloat16 => "gpu_float16",
            Runtime::Dsp => "dsp",
            Runtime::DspFixed8 => "dsp_fixed8",
            Runtime::Aip => "aip",
        }
    }

    /// Parse a runtime name, case-insensitively. Unknown names select `Cpu`.
    pub fn from_name(name: &str) -> Self {
        let normalized = name.trim().to_lowercase();
        match Self::ALL.iter().find(|r| r.as_str() == normalized) {
            Some(runtime) => *runtime,
            None => {
                tracing::warn!(runtime = %name, "Unknown runtime, using cpu");
                Runtime::Cpu
            }
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model loaded onto one runtime, ready to execute.
pub trait InferenceBackend {
    /// Input tensor names, primary input first.
    fn input_names(&self) -> Vec<String>;

    /// Output tensor names the backend will materialize.
    fn output_names(&self) -> Vec<String>;

    /// Static shape of a named input or output tensor.
    fn tensor_shape(&self, name: &str) -> Option<TensorShape>;

    /// Run one forward pass, reading every buffer in `inputs` and filling
    /// every buffer in `outputs`. Outputs are undefined on error.
    fn execute(
        &mut self,
        inputs: &TensorBufferSet,
        outputs: &mut TensorBufferSet,
    ) -> anyhow::Result<()>;
}

/// Builds backends from model files.
pub trait BackendProvider {
    type Backend: InferenceBackend;

    fn is_runtime_available(&self, runtime: Runtime) -> bool;

    /// Build an executable graph for `path` on `runtime`.
    ///
    /// An empty `output_layers` lets the backend expose all model outputs.
    fn load_model(
        &self,
        path: &Path,
        runtime: Runtime,
        output_layers: &[String],
    ) -> anyhow::Result<Self::Backend>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test runtime names parse case-insensitively
    #[test]
    fn test_runtime_from_name() {
        assert_eq!(Runtime::from_name("gpu"), Runtime::Gpu);
        assert_eq!(Runtime::from_name("GPU_FLOAT16"), Runtime::GpuFloat16);
        assert_eq!(Runtime::from_name(" dsp_fixed8 "), Runtime::DspFixed8);
        assert_eq!(Runtime::from_name("aip"), Runtime::Aip);
    }

    /// Test unknown runtime names fall back to cpu
    #[test]
    fn test_unknown_runtime_is_cpu() {
        assert_eq!(Runtime::from_name("tpu"), Runtime::Cpu);
        assert_eq!(Runtime::from_name(""), Runtime::Cpu);
    }

    /// Test display matches the parse names
    #[test]
    fn test_runtime_display_round_trip() {
        for runtime in Runtime::ALL {
            assert_eq!(Runtime::from_name(&runtime.to_string()), runtime);
        }
    }
}
