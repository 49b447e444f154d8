use super::{BackendProvider, InferenceBackend, Runtime};
use crate::tensor::{TensorBufferSet, TensorShape};
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider},
    session::{Session, SessionInputValue, builder::GraphOptimizationLevel},
    value::{TensorRef, ValueType},
};
use std::collections::HashMap;
use std::path::Path;

/// Loads ONNX models through ONNX Runtime.
#[derive(Debug, Clone)]
pub struct OrtProvider {
    pub intra_threads: usize,
    pub device_id: i32,
}

impl Default for OrtProvider {
    fn default() -> Self {
        Self {
            intra_threads: 4,
            device_id: 0,
        }
    }
}

pub struct OrtBackend {
    session: Session,
    inputs: Vec<String>,
    outputs: Vec<String>,
    shapes: HashMap<String, TensorShape>,
}

/// Resolve an ONNX Runtime shape into a static one. A dynamic leading
/// (batch) dimension is pinned to 1.
fn static_shape(name: &str, value_type: &ValueType) -> anyhow::Result<TensorShape> {
    let ValueType::Tensor { shape, .. } = value_type else {
        anyhow::bail!("Tensor '{}' is not a tensor value", name);
    };

    let mut dims = Vec::with_capacity(shape.len());
    for (axis, &dim) in shape.iter().enumerate() {
        match dim {
            d if d > 0 => dims.push(d as usize),
            _ if axis == 0 => dims.push(1),
            _ => anyhow::bail!("Tensor '{}' has dynamic dimension at axis {}", name, axis),
        }
    }

    Ok(TensorShape::new(dims))
}

impl BackendProvider for OrtProvider {
    type Backend = OrtBackend;

    fn is_runtime_available(&self, runtime: Runtime) -> bool {
        match runtime {
            Runtime::Cpu => true,
            Runtime::Gpu | Runtime::GpuFloat16 => {
                CUDAExecutionProvider::default().is_available().unwrap_or(false)
            }
            Runtime::Dsp | Runtime::DspFixed8 | Runtime::Aip => false,
        }
    }

    fn load_model(
        &self,
        path: &Path,
        runtime: Runtime,
        output_layers: &[String],
    ) -> anyhow::Result<OrtBackend> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads)?;

        match runtime {
            Runtime::Gpu | Runtime::GpuFloat16 => {
                tracing::info!(%runtime, "Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(self.device_id)
                    .build()
                    .error_on_failure()])?;
            }
            Runtime::Cpu => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
            }
            Runtime::Dsp | Runtime::DspFixed8 | Runtime::Aip => {
                anyhow::bail!("Runtime {} is not supported by ONNX Runtime", runtime);
            }
        }

        let session = builder.commit_from_file(path)?;

        let mut shapes = HashMap::new();
        let mut inputs = Vec::with_capacity(session.inputs.len());
        for input in &session.inputs {
            shapes.insert(input.name.clone(), static_shape(&input.name, &input.input_type)?);
            inputs.push(input.name.clone());
        }

        let mut outputs = Vec::new();
        for output in &session.outputs {
            if output_layers.is_empty() || output_layers.contains(&output.name) {
                shapes.insert(
                    output.name.clone(),
                    static_shape(&output.name, &output.output_type)?,
                );
                outputs.push(output.name.clone());
            }
        }

        if let Some(missing) = output_layers.iter().find(|l| !outputs.contains(l)) {
            anyhow::bail!("Model has no output named '{}'", missing);
        }

        tracing::info!(
            model = %path.display(),
            inputs = ?inputs,
            outputs = ?outputs,
            "Model loaded"
        );

        Ok(OrtBackend {
            session,
            inputs,
            outputs,
            shapes,
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn input_names(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn output_names(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn tensor_shape(&self, name: &str) -> Option<TensorShape> {
        self.shapes.get(name).cloned()
    }

    fn execute(
        &mut self,
        inputs: &TensorBufferSet,
        outputs: &mut TensorBufferSet,
    ) -> anyhow::Result<()> {
        let mut feed: Vec<(String, SessionInputValue<'_>)> = Vec::with_capacity(inputs.len());
        for buffer in inputs.iter() {
            let view = buffer.view()?;
            feed.push((
                buffer.name().to_string(),
                TensorRef::from_array_view(view)?.into(),
            ));
        }

        let results = self.session.run(feed)?;

        for buffer in outputs.iter_mut() {
            let array = results[buffer.name()].try_extract_array::<f32>()?;
            let expected = buffer.data().len();
            if array.len() != expected {
                anyhow::bail!(
                    "Output '{}' produced {} values, expected {}",
                    buffer.name(),
                    array.len(),
                    expected
                );
            }

            for (dst, src) in buffer.data_mut().iter_mut().zip(array.iter()) {
                *dst = *src;
            }
        }

        Ok(())
    }
}
