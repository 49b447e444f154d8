use ndarray::{ArrayViewD, IxDyn};
use std::fmt;

/// Dimension sizes of a tensor, outermost first (batch, height, width, channel).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TensorShape {
    dims: Vec<usize>,
}

impl TensorShape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// The shape returned for failed lookups.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Number of elements; zero for a rank-0 shape.
    pub fn element_count(&self) -> usize {
        if self.dims.is_empty() {
            0
        } else {
            self.dims.iter().product()
        }
    }
}

impl From<&[usize]> for TensorShape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

/// Row-major byte strides for a densely packed tensor.
///
/// The last dimension advances by `elem_size`, each earlier dimension by the
/// following stride times the following dimension.
pub fn packed_strides(dims: &[usize], elem_size: usize) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = elem_size;
    for (stride, &dim) in strides.iter_mut().zip(dims).rev() {
        *stride = acc;
        acc *= dim;
    }
    strides
}

/// One model tensor and the packed `f32` storage bound to it.
#[derive(Debug)]
pub struct NamedBuffer {
    name: String,
    shape: TensorShape,
    strides: Vec<usize>,
    data: Box<[f32]>,
}

impl NamedBuffer {
    /// Allocate a zeroed buffer sized for `shape`.
    pub fn zeroed(name: impl Into<String>, shape: TensorShape) -> Self {
        let strides = packed_strides(shape.dims(), std::mem::size_of::<f32>());
        let data = vec![0.0f32; shape.element_count()].into_boxed_slice();
        Self {
            name: name.into(),
            shape,
            strides,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    /// Byte strides, innermost equal to `size_of::<f32>()`.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Shaped read-only view over the buffer.
    pub fn view(&self) -> anyhow::Result<ArrayViewD<'_, f32>> {
        Ok(ArrayViewD::from_shape(IxDyn(self.shape.dims()), &self.data[..])?)
    }
}

/// Ordered collection of named buffers for one side (inputs or outputs) of a model.
#[derive(Debug, Default)]
pub struct TensorBufferSet {
    buffers: Vec<NamedBuffer>,
}

impl TensorBufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a buffer, replacing any existing buffer of the same name.
    pub fn insert(&mut self, buffer: NamedBuffer) {
        match self.buffers.iter_mut().find(|b| b.name == buffer.name) {
            Some(existing) => *existing = buffer,
            None => self.buffers.push(buffer),
        }
    }

    pub fn get(&self, name: &str) -> Option<&NamedBuffer> {
        self.buffers.iter().find(|b| b.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut NamedBuffer> {
        self.buffers.iter_mut().find(|b| b.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buffers.iter().map(|b| b.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedBuffer> {
        self.buffers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NamedBuffer> {
        self.buffers.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
