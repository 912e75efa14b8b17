use super::for_each_row;
use anyhow::{ensure, Result};
use lite_rs::device::Context;
use lite_rs::kernel::{Kernel, KernelParam};
use lite_rs::tensor::DType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryActivation {
    Relu,
    Sigmoid,
}

impl UnaryActivation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "relu" => Some(UnaryActivation::Relu),
            "sigmoid" => Some(UnaryActivation::Sigmoid),
            _ => None,
        }
    }

    #[inline]
    pub fn apply(self, v: f32) -> f32 {
        match self {
            UnaryActivation::Relu => v.max(0.0),
            UnaryActivation::Sigmoid => 1.0 / (1.0 + (-v).exp()),
        }
    }
}

pub struct ActivationKernel {
    act: UnaryActivation,
}

impl ActivationKernel {
    pub fn new(act: UnaryActivation) -> Self {
        ActivationKernel { act }
    }
}

impl Kernel for ActivationKernel {
    fn run(&mut self, param: &KernelParam, ctx: &mut dyn Context) -> Result<()> {
        let x_var = param.input("X")?.read();
        let x = x_var.tensor()?;
        let xs = x.as_f32()?;
        let row_len = x.dims().last().copied().unwrap_or(1);
        let act = self.act;

        let mut out_var = param.output("Out")?.write();
        let out = out_var.tensor_mut()?;
        out.resize(x.shape().clone(), DType::F32);
        for_each_row(&*ctx, out.as_f32_mut()?, row_len, |row, dst| {
            let src = &xs[row * row_len..(row + 1) * row_len];
            for (d, &v) in dst.iter_mut().zip(src) {
                *d = act.apply(v);
            }
        });
        Ok(())
    }
}

/// Softmax along `axis` (default: the last dimension), max-subtracted.
pub struct SoftmaxKernel;

impl Kernel for SoftmaxKernel {
    fn run(&mut self, param: &KernelParam, ctx: &mut dyn Context) -> Result<()> {
        let x_var = param.input("X")?.read();
        let x = x_var.tensor()?;
        let rank = x.shape().rank().max(1) as i64;
        let axis = param.attr_i64("axis", -1);
        let axis = if axis < 0 { axis + rank } else { axis };
        ensure!((0..rank).contains(&axis), "softmax axis {axis} out of range for {}", x.shape());
        let axis = axis as usize;

        let dim = x.dims().get(axis).copied().unwrap_or(1);
        let inner = x.shape().flatten_range(axis + 1, x.shape().rank());
        let xs = x.as_f32()?;

        let mut out_var = param.output("Out")?.write();
        let out = out_var.tensor_mut()?;
        out.resize(x.shape().clone(), DType::F32);
        let block = dim * inner;
        for_each_row(&*ctx, out.as_f32_mut()?, block, |outer, dst| {
            let src = &xs[outer * block..(outer + 1) * block];
            for i in 0..inner {
                let max = (0..dim)
                    .map(|j| src[j * inner + i])
                    .fold(f32::NEG_INFINITY, f32::max);
                let mut sum = 0.0;
                for j in 0..dim {
                    let e = (src[j * inner + i] - max).exp();
                    dst[j * inner + i] = e;
                    sum += e;
                }
                for j in 0..dim {
                    dst[j * inner + i] /= sum;
                }
            }
        });
        Ok(())
    }
}
