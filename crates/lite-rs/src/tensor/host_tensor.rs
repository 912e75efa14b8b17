//! Host-backed tensor bound into scopes and handed to kernels.

use super::{dtype::DType, shape::Shape, storage::StorageElement};
use anyhow::{anyhow, bail, ensure, Result};
use half::f16;

/// Typed payload of a host tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    I8(Vec<i8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    Bool(Vec<bool>),
}

macro_rules! each_payload {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            TensorData::F32($values) => $body,
            TensorData::F16($values) => $body,
            TensorData::I8($values) => $body,
            TensorData::I32($values) => $body,
            TensorData::I64($values) => $body,
            TensorData::Bool($values) => $body,
        }
    };
}

impl TensorData {
    /// Allocates a zero-filled payload of `len` elements.
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::F32 => TensorData::F32(vec![0.0; len]),
            DType::F16 => TensorData::F16(vec![f16::ZERO; len]),
            DType::I8 => TensorData::I8(vec![0; len]),
            DType::I32 => TensorData::I32(vec![0; len]),
            DType::I64 => TensorData::I64(vec![0; len]),
            DType::Bool => TensorData::Bool(vec![false; len]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::F16(_) => DType::F16,
            TensorData::I8(_) => DType::I8,
            TensorData::I32(_) => DType::I32,
            TensorData::I64(_) => DType::I64,
            TensorData::Bool(_) => DType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        each_payload!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize {
        each_payload!(self, values => values.capacity())
    }

    fn resize_zeroed(&mut self, len: usize) {
        match self {
            TensorData::F32(values) => values.resize(len, 0.0),
            TensorData::F16(values) => values.resize(len, f16::ZERO),
            TensorData::I8(values) => values.resize(len, 0),
            TensorData::I32(values) => values.resize(len, 0),
            TensorData::I64(values) => values.resize(len, 0),
            TensorData::Bool(values) => values.resize(len, false),
        }
    }

    fn to_f64_vec(&self) -> Vec<f64> {
        each_payload!(self, values => values.iter().map(|v| v.to_f64()).collect())
    }
}

/// Host tensor: a shape, a typed payload, and an initialized flag.
///
/// A tensor created with [`Tensor::new`] or emptied by [`Tensor::release`] is
/// uninitialized until a kernel or the caller resizes or fills it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: TensorData,
    initialized: bool,
}

impl Default for Tensor {
    fn default() -> Self {
        Tensor::new(DType::F32)
    }
}

impl Tensor {
    /// Creates an uninitialized tensor that will hold `dtype` elements.
    pub fn new(dtype: DType) -> Self {
        Tensor {
            shape: Shape::scalar(),
            data: TensorData::zeros(dtype, 0),
            initialized: false,
        }
    }

    /// Builds a tensor from typed values, validating the length against the shape.
    pub fn from_vec<T: StorageElement>(shape: impl Into<Shape>, values: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        if values.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {}",
                values.len(),
                shape
            );
        }
        Ok(Tensor {
            shape,
            data: T::wrap(values),
            initialized: true,
        })
    }

    pub fn from_data(shape: impl Into<Shape>, data: TensorData) -> Result<Self> {
        let shape = shape.into();
        ensure!(
            data.len() == shape.num_elements(),
            "payload of {} element(s) does not fill shape {}",
            data.len(),
            shape
        );
        Ok(Tensor {
            shape,
            data,
            initialized: true,
        })
    }

    pub fn from_f32(shape: impl Into<Shape>, values: Vec<f32>) -> Result<Self> {
        Tensor::from_vec(shape, values)
    }

    pub fn from_i32(shape: impl Into<Shape>, values: Vec<i32>) -> Result<Self> {
        Tensor::from_vec(shape, values)
    }

    pub fn from_i64(shape: impl Into<Shape>, values: Vec<i64>) -> Result<Self> {
        Tensor::from_vec(shape, values)
    }

    /// Rank-1 `i64` tensor holding a single value, the form used for array indices.
    pub fn scalar_i64(value: i64) -> Self {
        Tensor {
            shape: Shape::new([1]),
            data: TensorData::I64(vec![value]),
            initialized: true,
        }
    }

    /// Returns a zero-initialized tensor of the requested shape and dtype.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Self {
        let shape = shape.into();
        let data = TensorData::zeros(dtype, shape.num_elements());
        Tensor {
            shape,
            data,
            initialized: true,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Logical byte size of the current contents.
    pub fn byte_len(&self) -> usize {
        if self.initialized {
            self.len() * self.dtype().size_in_bytes()
        } else {
            0
        }
    }

    /// Bytes currently reserved by the payload allocation.
    pub fn capacity_bytes(&self) -> usize {
        self.data.capacity() * self.dtype().size_in_bytes()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Reshapes and retypes the tensor in place, reusing the allocation when
    /// the dtype is unchanged. Contents are unspecified afterwards except that
    /// newly grown elements are zero.
    pub fn resize(&mut self, shape: impl Into<Shape>, dtype: DType) {
        let shape = shape.into();
        let len = shape.num_elements();
        if self.data.dtype() != dtype {
            self.data = TensorData::zeros(dtype, len);
        } else {
            self.data.resize_zeroed(len);
        }
        self.shape = shape;
        self.initialized = true;
    }

    /// Changes the shape without touching the payload.
    pub fn reshape(&mut self, shape: impl Into<Shape>) -> Result<()> {
        let shape = shape.into();
        ensure!(
            shape.num_elements() == self.len(),
            "cannot reshape {} into {}",
            self.shape,
            shape
        );
        self.shape = shape;
        Ok(())
    }

    /// Replaces shape and payload with a deep copy of `other`.
    pub fn copy_from(&mut self, other: &Tensor) {
        self.shape = other.shape.clone();
        self.data.clone_from(&other.data);
        self.initialized = other.initialized;
    }

    /// Drops the payload allocation and returns the number of bytes freed.
    pub fn release(&mut self) -> usize {
        let freed = self.capacity_bytes();
        self.data = TensorData::zeros(self.dtype(), 0);
        self.initialized = false;
        freed
    }

    pub fn as_slice<T: StorageElement>(&self) -> Result<&[T]> {
        T::slice(&self.data)
            .ok_or_else(|| anyhow!("tensor holds {} but {} was requested", self.dtype(), T::DTYPE))
    }

    pub fn as_mut_slice<T: StorageElement>(&mut self) -> Result<&mut [T]> {
        let dtype = self.dtype();
        T::slice_mut(&mut self.data)
            .ok_or_else(|| anyhow!("tensor holds {} but {} was requested", dtype, T::DTYPE))
    }

    pub fn as_f32(&self) -> Result<&[f32]> {
        self.as_slice::<f32>()
    }

    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        self.as_mut_slice::<f32>()
    }

    pub fn as_i64(&self) -> Result<&[i64]> {
        self.as_slice::<i64>()
    }

    /// Converts every element to `f32`, whatever the stored dtype.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.data.to_f64_vec().into_iter().map(|v| v as f32).collect()
    }

    /// Returns a copy of this tensor converted to `dtype`.
    pub fn cast(&self, dtype: DType) -> Tensor {
        if dtype == self.dtype() {
            return self.clone();
        }
        let wide = self.data.to_f64_vec();
        let data = match dtype {
            DType::F32 => f32::wrap(wide.into_iter().map(f32::from_f64).collect()),
            DType::F16 => f16::wrap(wide.into_iter().map(<f16 as StorageElement>::from_f64).collect()),
            DType::I8 => i8::wrap(wide.into_iter().map(i8::from_f64).collect()),
            DType::I32 => i32::wrap(wide.into_iter().map(i32::from_f64).collect()),
            DType::I64 => i64::wrap(wide.into_iter().map(i64::from_f64).collect()),
            DType::Bool => bool::wrap(wide.into_iter().map(bool::from_f64).collect()),
        };
        Tensor {
            shape: self.shape.clone(),
            data,
            initialized: self.initialized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_rejects_length_mismatch() {
        assert!(Tensor::from_f32([2, 2], vec![1.0; 3]).is_err());
    }

    #[test]
    fn release_reports_freed_bytes_and_uninitializes() {
        let mut tensor = Tensor::zeros([4, 4], DType::F32);
        assert!(tensor.is_initialized());
        let freed = tensor.release();
        assert!(freed >= 64, "expected at least 64 bytes freed, got {freed}");
        assert!(!tensor.is_initialized());
        assert_eq!(tensor.byte_len(), 0);
    }

    #[test]
    fn cast_converts_between_float_and_int() {
        let tensor = Tensor::from_f32([3], vec![1.7, -2.2, 3.0]).unwrap();
        let ints = tensor.cast(DType::I32);
        assert_eq!(ints.as_slice::<i32>().unwrap(), &[1, -2, 3]);
        let halves = tensor.cast(DType::F16);
        assert_eq!(halves.dtype(), DType::F16);
        assert!((halves.to_f32_vec()[0] - 1.7).abs() < 1e-2);
    }

    #[test]
    fn typed_view_rejects_wrong_dtype() {
        let tensor = Tensor::from_i64([1], vec![4]).unwrap();
        assert!(tensor.as_f32().is_err());
        assert_eq!(tensor.as_i64().unwrap(), &[4]);
    }
}
