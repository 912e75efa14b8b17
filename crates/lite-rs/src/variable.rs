//! Shared variable handles stored in scopes and bound into kernel parameters.

use crate::tensor::Tensor;
use anyhow::{bail, Result};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Payload of a variable: a single tensor or an ordered tensor array.
#[derive(Debug, Clone, PartialEq)]
pub enum VarValue {
    Tensor(Tensor),
    TensorArray(Vec<Tensor>),
}

impl Default for VarValue {
    fn default() -> Self {
        VarValue::Tensor(Tensor::default())
    }
}

impl VarValue {
    pub fn tensor(&self) -> Result<&Tensor> {
        match self {
            VarValue::Tensor(tensor) => Ok(tensor),
            VarValue::TensorArray(_) => bail!("variable holds a tensor array, not a tensor"),
        }
    }

    pub fn tensor_mut(&mut self) -> Result<&mut Tensor> {
        match self {
            VarValue::Tensor(tensor) => Ok(tensor),
            VarValue::TensorArray(_) => bail!("variable holds a tensor array, not a tensor"),
        }
    }

    pub fn array(&self) -> Result<&[Tensor]> {
        match self {
            VarValue::TensorArray(items) => Ok(items),
            VarValue::Tensor(_) => bail!("variable holds a tensor, not a tensor array"),
        }
    }

    /// Borrows the tensor array, converting an uninitialized tensor slot on first use.
    pub fn array_mut(&mut self) -> Result<&mut Vec<Tensor>> {
        if matches!(self, VarValue::Tensor(tensor) if !tensor.is_initialized()) {
            *self = VarValue::TensorArray(Vec::new());
        }
        match self {
            VarValue::TensorArray(items) => Ok(items),
            VarValue::Tensor(_) => bail!("variable holds an initialized tensor, not a tensor array"),
        }
    }

    pub fn is_tensor_array(&self) -> bool {
        matches!(self, VarValue::TensorArray(_))
    }

    /// Bytes held by the payload's logical contents.
    pub fn byte_len(&self) -> usize {
        match self {
            VarValue::Tensor(tensor) => tensor.byte_len(),
            VarValue::TensorArray(items) => items.iter().map(Tensor::byte_len).sum(),
        }
    }
}

/// Reference-counted, lock-protected variable.
///
/// Cloning the handle shares the payload; use [`Variable::deep_clone`] for an
/// independent copy.
#[derive(Debug, Clone, Default)]
pub struct Variable(Arc<RwLock<VarValue>>);

impl Variable {
    pub fn new(value: VarValue) -> Self {
        Variable(Arc::new(RwLock::new(value)))
    }

    pub fn from_tensor(tensor: Tensor) -> Self {
        Variable::new(VarValue::Tensor(tensor))
    }

    pub fn tensor_array() -> Self {
        Variable::new(VarValue::TensorArray(Vec::new()))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, VarValue> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, VarValue> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when both handles point at the same payload.
    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn deep_clone(&self) -> Variable {
        Variable::new(self.read().clone())
    }

    /// Replaces the payload with `tensor`.
    pub fn set_tensor(&self, tensor: Tensor) {
        *self.write() = VarValue::Tensor(tensor);
    }

    /// Copies the current tensor out of the variable.
    pub fn tensor(&self) -> Result<Tensor> {
        Ok(self.read().tensor()?.clone())
    }

    pub fn with_tensor<R>(&self, f: impl FnOnce(&Tensor) -> R) -> Result<R> {
        let guard = self.read();
        Ok(f(guard.tensor()?))
    }

    pub fn with_tensor_mut<R>(&self, f: impl FnOnce(&mut Tensor) -> R) -> Result<R> {
        let mut guard = self.write();
        Ok(f(guard.tensor_mut()?))
    }
}
