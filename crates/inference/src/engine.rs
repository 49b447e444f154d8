use crate::backend::{BackendProvider, InferenceBackend, Runtime};
use crate::error::EngineError;
use crate::tensor::{NamedBuffer, TensorBufferSet, TensorShape};
use common::span;
use std::collections::HashSet;
use std::path::Path;

/// Lifecycle phase of an [`InferenceEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Uninitialized,
    Initialized,
    Deinitialized,
}

struct Loaded<B> {
    backend: B,
    runtime: Runtime,
    inputs: TensorBufferSet,
    outputs: TensorBufferSet,
}

enum EngineState<B> {
    Uninitialized,
    Initialized(Loaded<B>),
    Deinitialized,
}

/// Owns a loaded backend and the packed buffers bound to its tensors.
///
/// Callers write the input buffers in place, call [`execute`](Self::execute),
/// then read the output buffers in place. Buffers are reused across calls, so
/// one engine must not be shared between concurrent detections.
pub struct InferenceEngine<P: BackendProvider> {
    provider: P,
    output_layers: Vec<String>,
    state: EngineState<P::Backend>,
}

impl<P: BackendProvider> InferenceEngine<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            output_layers: Vec::new(),
            state: EngineState::Uninitialized,
        }
    }

    /// Record which model outputs to materialize. Only valid before `init`.
    pub fn set_output_layers(&mut self, names: Vec<String>) -> Result<(), EngineError> {
        if self.is_initialized() {
            return Err(EngineError::AlreadyInitialized);
        }
        self.output_layers = names;
        Ok(())
    }

    pub fn output_layers(&self) -> &[String] {
        &self.output_layers
    }

    /// Load `model_path` and allocate one buffer per input and output tensor.
    ///
    /// A `preferred` runtime the provider cannot serve is replaced by
    /// [`Runtime::Cpu`].
    pub fn init(&mut self, model_path: &Path, preferred: Runtime) -> Result<(), EngineError> {
        let _s = span!("engine_init");

        if self.is_initialized() {
            return Err(EngineError::AlreadyInitialized);
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.output_layers.iter().find(|l| !seen.insert(l.as_str())) {
            return Err(EngineError::DuplicateOutputLayer(dup.clone()));
        }

        let runtime = if self.provider.is_runtime_available(preferred) {
            preferred
        } else {
            tracing::warn!(
                requested = %preferred,
                "Runtime unavailable, falling back to cpu"
            );
            Runtime::Cpu
        };

        let backend = self
            .provider
            .load_model(model_path, runtime, &self.output_layers)
            .map_err(|e| EngineError::GraphBuild {
                path: model_path.display().to_string(),
                reason: format!("{:#}", e),
            })?;

        let output_names = backend.output_names();
        if let Some(missing) = self
            .output_layers
            .iter()
            .find(|l| !output_names.contains(l))
        {
            return Err(EngineError::MissingOutputLayer(missing.clone()));
        }

        let inputs = allocate_buffers(&backend, backend.input_names())?;
        let outputs = allocate_buffers(&backend, output_names)?;

        tracing::info!(
            model = %model_path.display(),
            %runtime,
            inputs = inputs.len(),
            outputs = outputs.len(),
            "Inference engine initialized"
        );

        self.state = EngineState::Initialized(Loaded {
            backend,
            runtime,
            inputs,
            outputs,
        });

        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        match self.state {
            EngineState::Uninitialized => EngineStatus::Uninitialized,
            EngineState::Initialized(_) => EngineStatus::Initialized,
            EngineState::Deinitialized => EngineStatus::Deinitialized,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, EngineState::Initialized(_))
    }

    /// Runtime the model was actually built for.
    pub fn runtime(&self) -> Option<Runtime> {
        self.loaded().map(|l| l.runtime)
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.loaded()
            .map(|l| l.inputs.names().collect())
            .unwrap_or_default()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.loaded()
            .map(|l| l.outputs.names().collect())
            .unwrap_or_default()
    }

    /// Shape recorded at init, or an empty shape if unknown.
    pub fn input_shape(&self, name: &str) -> TensorShape {
        self.lookup_shape(name, |l| &l.inputs, "input")
    }

    /// Shape recorded at init, or an empty shape if unknown.
    pub fn output_shape(&self, name: &str) -> TensorShape {
        self.lookup_shape(name, |l| &l.outputs, "output")
    }

    pub fn input_tensor_mut(&mut self, name: &str) -> Option<&mut [f32]> {
        let Some(loaded) = self.loaded_mut() else {
            tracing::error!(tensor = name, "Input tensor requested before init");
            return None;
        };
        match loaded.inputs.get_mut(name) {
            Some(buffer) => Some(buffer.data_mut()),
            None => {
                tracing::error!(tensor = name, "Unknown input tensor");
                None
            }
        }
    }

    pub fn output_tensor(&self, name: &str) -> Option<&[f32]> {
        let Some(loaded) = self.loaded() else {
            tracing::error!(tensor = name, "Output tensor requested before init");
            return None;
        };
        match loaded.outputs.get(name) {
            Some(buffer) => Some(buffer.data()),
            None => {
                tracing::error!(tensor = name, "Unknown output tensor");
                None
            }
        }
    }

    pub fn outputs(&self) -> Option<&TensorBufferSet> {
        self.loaded().map(|l| &l.outputs)
    }

    /// Run one synchronous forward pass. Output contents are undefined on error.
    pub fn execute(&mut self) -> Result<(), EngineError> {
        let _s = span!("engine_execute");

        let Some(loaded) = self.loaded_mut() else {
            tracing::error!("Execute called before init");
            return Err(EngineError::NotInitialized);
        };

        loaded
            .backend
            .execute(&loaded.inputs, &mut loaded.outputs)
            .map_err(|e| {
                tracing::error!(error = %e, "Backend execution failed");
                EngineError::Execution(format!("{:#}", e))
            })
    }

    /// Release the backend and every buffer. Safe to call in any state.
    pub fn deinit(&mut self) {
        if let EngineState::Initialized(_) = self.state {
            tracing::info!("Inference engine released");
        }
        self.state = EngineState::Deinitialized;
    }

    fn loaded(&self) -> Option<&Loaded<P::Backend>> {
        match &self.state {
            EngineState::Initialized(loaded) => Some(loaded),
            _ => None,
        }
    }

    fn loaded_mut(&mut self) -> Option<&mut Loaded<P::Backend>> {
        match &mut self.state {
            EngineState::Initialized(loaded) => Some(loaded),
            _ => None,
        }
    }

    fn lookup_shape(
        &self,
        name: &str,
        side: impl Fn(&Loaded<P::Backend>) -> &TensorBufferSet,
        kind: &str,
    ) -> TensorShape {
        let Some(loaded) = self.loaded() else {
            tracing::error!(tensor = name, kind, "Shape requested before init");
            return TensorShape::empty();
        };
        match side(loaded).get(name) {
            Some(buffer) => buffer.shape().clone(),
            None => {
                tracing::error!(tensor = name, kind, "Unknown tensor");
                TensorShape::empty()
            }
        }
    }
}

fn allocate_buffers<B: InferenceBackend>(
    backend: &B,
    names: Vec<String>,
) -> Result<TensorBufferSet, EngineError> {
    let mut set = TensorBufferSet::new();
    for name in names {
        let shape = backend.tensor_shape(&name).ok_or_else(|| EngineError::Shape {
            name: name.clone(),
            reason: "backend reported no shape".to_string(),
        })?;
        if shape.rank() == 0 {
            return Err(EngineError::Shape {
                name,
                reason: "rank 0".to_string(),
            });
        }
        tracing::debug!(tensor = %name, shape = %shape, "Allocated tensor buffer");
        set.insert(NamedBuffer::zeroed(name, shape));
    }
    Ok(set)
}
