use anyhow::{anyhow, ensure, Result};
use lite_rs::device::Context;
use lite_rs::kernel::{Kernel, KernelParam};
use lite_rs::tensor::DType;

/// Inputs are written into the feed target before the run; the kernel only
/// checks that one was.
pub struct FeedKernel;

impl Kernel for FeedKernel {
    fn run(&mut self, param: &KernelParam, _ctx: &mut dyn Context) -> Result<()> {
        let out = param.output("Out")?.read();
        ensure!(out.tensor()?.is_initialized(), "feed target has no value");
        Ok(())
    }
}

pub struct FetchKernel;

impl Kernel for FetchKernel {
    fn run(&mut self, param: &KernelParam, _ctx: &mut dyn Context) -> Result<()> {
        copy_x_to_out(param)
    }
}

pub struct AssignKernel;

impl Kernel for AssignKernel {
    fn run(&mut self, param: &KernelParam, _ctx: &mut dyn Context) -> Result<()> {
        copy_x_to_out(param)
    }
}

fn copy_x_to_out(param: &KernelParam) -> Result<()> {
    let x = param.input("X")?.read();
    let x = x.tensor()?;
    ensure!(x.is_initialized(), "`{}` reads an empty tensor", param.op_type);
    let mut out = param.output("Out")?.write();
    out.tensor_mut()?.copy_from(x);
    Ok(())
}

#[derive(Default)]
pub struct CastKernel {
    out_dtype: Option<DType>,
}

impl Kernel for CastKernel {
    fn prepare(&mut self, param: &KernelParam, _ctx: &mut dyn Context) -> Result<()> {
        let tag = param.attr_i64("out_dtype", -1);
        let dtype = u32::try_from(tag)
            .ok()
            .and_then(DType::from_tag)
            .ok_or_else(|| anyhow!("`out_dtype` {tag} is not a known element type"))?;
        self.out_dtype = Some(dtype);
        Ok(())
    }

    fn run(&mut self, param: &KernelParam, _ctx: &mut dyn Context) -> Result<()> {
        let dtype = self
            .out_dtype
            .ok_or_else(|| anyhow!("cast kernel ran before prepare"))?;
        let x = param.input("X")?.read();
        let cast = x.tensor()?.cast(dtype);
        let mut out = param.output("Out")?.write();
        *out.tensor_mut()? = cast;
        Ok(())
    }
}
