//! Tensor-array kernels. Arrays grow on write and are cleared by the
//! predictor before each run.

use anyhow::{anyhow, ensure, Result};
use lite_rs::device::Context;
use lite_rs::kernel::{Kernel, KernelParam};
use lite_rs::tensor::{Tensor, TensorData};

/// Largest index `write_to_array` accepts. Writes past the end pad with empty
/// tensors, so the index bounds the padding a single run can allocate.
pub const MAX_ARRAY_INDEX: usize = 1 << 16;

fn read_index(param: &KernelParam) -> Result<usize> {
    let guard = param.input("I")?.read();
    let index = guard
        .tensor()?
        .as_i64()?
        .first()
        .copied()
        .ok_or_else(|| anyhow!("array index tensor is empty"))?;
    usize::try_from(index).map_err(|_| anyhow!("negative array index {index}"))
}

/// Stores a copy of `X` at position `I`, padding with empty tensors.
pub struct WriteToArrayKernel;

impl Kernel for WriteToArrayKernel {
    fn run(&mut self, param: &KernelParam, _ctx: &mut dyn Context) -> Result<()> {
        let index = read_index(param)?;
        ensure!(
            index <= MAX_ARRAY_INDEX,
            "array index {index} exceeds the limit of {MAX_ARRAY_INDEX}"
        );
        let value = param.input("X")?.tensor()?;
        let mut out = param.output("Out")?.write();
        let items = out.array_mut()?;
        if items.len() <= index {
            items
                .try_reserve(index + 1 - items.len())
                .map_err(|err| anyhow!("growing array to {} slots: {err}", index + 1))?;
            items.resize_with(index + 1, Tensor::default);
        }
        items[index] = value;
        Ok(())
    }
}

pub struct ReadFromArrayKernel;

impl Kernel for ReadFromArrayKernel {
    fn run(&mut self, param: &KernelParam, _ctx: &mut dyn Context) -> Result<()> {
        let index = read_index(param)?;
        let array = param.input("X")?.read();
        let items = array.array()?;
        let item = items
            .get(index)
            .ok_or_else(|| anyhow!("array index {index} out of range (len {})", items.len()))?;
        ensure!(item.is_initialized(), "array slot {index} was never written");
        let mut out = param.output("Out")?.write();
        out.tensor_mut()?.copy_from(item);
        Ok(())
    }
}

/// Writes the array length as an `i64` tensor of shape `[1]`.
pub struct ArrayLengthKernel;

impl Kernel for ArrayLengthKernel {
    fn run(&mut self, param: &KernelParam, _ctx: &mut dyn Context) -> Result<()> {
        let len = param.input("X")?.read().array()?.len() as i64;
        let mut out = param.output("Out")?.write();
        *out.tensor_mut()? = Tensor::from_data([1], TensorData::I64(vec![len]))?;
        Ok(())
    }
}
