use super::activation::UnaryActivation;
use super::for_each_row;
use anyhow::{anyhow, bail, ensure, Result};
use lite_rs::device::{Context, MemoryBlock};
use lite_rs::kernel::{Kernel, KernelParam};
use lite_rs::tensor::{DType, Shape};

fn num_col_dims(param: &KernelParam, name: &str, rank: usize) -> Result<usize> {
    let cols = param.attr_i64(name, 1).max(1) as usize;
    ensure!(cols < rank, "`{name}`={cols} does not fit a rank-{rank} operand");
    Ok(cols)
}

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Columns of a `[k, n]` right-hand operand, stored contiguously in a block
/// taken from the context allocator. The block counts against the context's
/// memory limit until [`ColumnPanel::release`].
struct ColumnPanel {
    block: MemoryBlock,
    k: usize,
}

impl ColumnPanel {
    fn pack(ctx: &mut dyn Context, y: &[f32], k: usize, n: usize) -> Result<Self> {
        let len = k
            .checked_mul(n)
            .and_then(|elems| elems.checked_mul(F32_BYTES))
            .ok_or_else(|| anyhow!("operand of {k}x{n} elements overflows the address space"))?;
        let mut block = ctx.allocate(len)?;
        let packed = match block.as_host_mut() {
            Some(bytes) => {
                for (col, dst) in bytes.chunks_exact_mut(k * F32_BYTES).enumerate() {
                    for (p, slot) in dst.chunks_exact_mut(F32_BYTES).enumerate() {
                        slot.copy_from_slice(&y[p * n + col].to_ne_bytes());
                    }
                }
                true
            }
            None => false,
        };
        if !packed {
            ctx.free(block);
            bail!("{} context handed out non-host memory", ctx.target());
        }
        Ok(ColumnPanel { block, k })
    }

    fn column(&self, col: usize) -> impl Iterator<Item = f32> + '_ {
        let width = self.k * F32_BYTES;
        let bytes = self.block.as_host_slice().unwrap_or_default();
        bytes[col * width..(col + 1) * width]
            .chunks_exact(F32_BYTES)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn release(self, ctx: &mut dyn Context) {
        ctx.free(self.block);
    }
}

/// `out[m, n] = x[m, k] * y[k, n]`, row-parallel over `m`.
fn matmul(
    ctx: &mut dyn Context,
    x: &[f32],
    y: &[f32],
    out: &mut [f32],
    k: usize,
    n: usize,
) -> Result<()> {
    if out.is_empty() {
        return Ok(());
    }
    if k == 0 {
        out.fill(0.0);
        return Ok(());
    }
    let panel = ColumnPanel::pack(ctx, y, k, n)?;
    for_each_row(&*ctx, out, n, |row, dst| {
        let lhs = &x[row * k..(row + 1) * k];
        for (col, d) in dst.iter_mut().enumerate() {
            *d = lhs.iter().zip(panel.column(col)).map(|(a, b)| a * b).sum();
        }
    });
    panel.release(ctx);
    Ok(())
}

/// Matrix product after flattening `X` at `x_num_col_dims` and `Y` at
/// `y_num_col_dims`.
pub struct MulKernel;

impl Kernel for MulKernel {
    fn run(&mut self, param: &KernelParam, ctx: &mut dyn Context) -> Result<()> {
        let x_var = param.input("X")?.read();
        let y_var = param.input("Y")?.read();
        let x = x_var.tensor()?;
        let y = y_var.tensor()?;
        let x_cols = num_col_dims(param, "x_num_col_dims", x.shape().rank())?;
        let y_cols = num_col_dims(param, "y_num_col_dims", y.shape().rank())?;

        let m = x.shape().flatten_range(0, x_cols);
        let k = x.shape().flatten_range(x_cols, x.shape().rank());
        let ky = y.shape().flatten_range(0, y_cols);
        let n = y.shape().flatten_range(y_cols, y.shape().rank());
        ensure!(
            k == ky,
            "mul inner dims differ: X {} gives K={k}, Y {} gives K={ky}",
            x.shape(),
            y.shape()
        );

        let mut dims = x.dims()[..x_cols].to_vec();
        dims.extend_from_slice(&y.dims()[y_cols..]);
        let mut out_var = param.output("Out")?.write();
        let out = out_var.tensor_mut()?;
        out.resize(dims, DType::F32);
        debug_assert_eq!(out.len(), m * n);
        matmul(ctx, x.as_f32()?, y.as_f32()?, out.as_f32_mut()?, k, n)?;
        Ok(())
    }
}

/// Fully connected layer: `Input * W (+ Bias)`, optionally followed by relu.
pub struct FcKernel;

impl Kernel for FcKernel {
    fn prepare(&mut self, param: &KernelParam, _ctx: &mut dyn Context) -> Result<()> {
        match param.attr_str("activation_type", "") {
            "" | "relu" => Ok(()),
            other => bail!("unsupported fc activation `{other}`"),
        }
    }

    fn run(&mut self, param: &KernelParam, ctx: &mut dyn Context) -> Result<()> {
        let input_var = param.input("Input")?.read();
        let w_var = param.input("W")?.read();
        let input = input_var.tensor()?;
        let w = w_var.tensor()?;
        ensure!(w.shape().rank() == 2, "fc weight must be rank 2, got {}", w.shape());
        let cols = num_col_dims(param, "in_num_col_dims", input.shape().rank())?;
        let k = input.shape().flatten_range(cols, input.shape().rank());
        let (wk, n) = (w.dims()[0], w.dims()[1]);
        ensure!(
            k == wk,
            "fc input {} flattens to K={k} but weight is {}",
            input.shape(),
            w.shape()
        );

        let bias_guard = param.optional_input("Bias").map(|v| v.read());
        let bias = match &bias_guard {
            Some(guard) => {
                let bias = guard.tensor()?.as_f32()?;
                ensure!(bias.len() == n, "fc bias has {} elements, expected {n}", bias.len());
                Some(bias)
            }
            None => None,
        };
        let relu = param.attr_str("activation_type", "") == "relu";

        let mut dims = input.dims()[..cols].to_vec();
        dims.push(n);
        let mut out_var = param.output("Out")?.write();
        let out = out_var.tensor_mut()?;
        out.resize(dims, DType::F32);
        let out = out.as_f32_mut()?;
        matmul(ctx, input.as_f32()?, w.as_f32()?, out, k, n)?;
        if bias.is_some() || relu {
            for_each_row(&*ctx, out, n, |_, row| {
                if let Some(bias) = bias {
                    row.iter_mut().zip(bias).for_each(|(v, b)| *v += b);
                }
                if relu {
                    row.iter_mut().for_each(|v| *v = v.max(0.0));
                }
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
}

impl BinaryOp {
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
        }
    }
}

/// Per-dimension strides into `Y` for every dimension of `X`; zero where `Y`
/// is broadcast.
fn broadcast_strides(x: &Shape, y: &Shape, axis: i64) -> Result<Vec<usize>> {
    let (xd, yd) = (x.dims(), y.dims());
    ensure!(yd.len() <= xd.len(), "Y {y} has a higher rank than X {x}");
    let start = if axis < 0 {
        xd.len() - yd.len()
    } else {
        axis as usize
    };
    ensure!(start + yd.len() <= xd.len(), "axis {axis} places Y {y} outside X {x}");

    let mut strides = vec![0; xd.len()];
    let mut stride = 1;
    for (offset, &dim) in yd.iter().enumerate().rev() {
        let xdim = xd[start + offset];
        if dim == xdim {
            strides[start + offset] = stride;
        } else if dim != 1 {
            bail!("Y {y} does not broadcast into X {x} at axis {axis}");
        }
        stride *= dim;
    }
    Ok(strides)
}

/// Elementwise binary op with `Y` broadcast into `X`. The fused form applies
/// `act_type` to the result.
pub struct ElementwiseKernel {
    op: BinaryOp,
    act: Option<UnaryActivation>,
    fused: bool,
}

impl ElementwiseKernel {
    pub fn new(op: BinaryOp, act: Option<UnaryActivation>) -> Self {
        ElementwiseKernel { op, act, fused: false }
    }

    /// Activation is read from the `act_type` attribute in `prepare`.
    pub fn fused(op: BinaryOp) -> Self {
        ElementwiseKernel { op, act: None, fused: true }
    }
}

impl Kernel for ElementwiseKernel {
    fn prepare(&mut self, param: &KernelParam, _ctx: &mut dyn Context) -> Result<()> {
        if self.fused {
            let act = param.attr_str("act_type", "");
            self.act = Some(
                UnaryActivation::from_name(act)
                    .ok_or_else(|| anyhow!("unsupported fused activation `{act}`"))?,
            );
        }
        Ok(())
    }

    fn run(&mut self, param: &KernelParam, ctx: &mut dyn Context) -> Result<()> {
        let x_var = param.input("X")?.read();
        let y_var = param.input("Y")?.read();
        let x = x_var.tensor()?;
        let y = y_var.tensor()?;
        let strides = broadcast_strides(x.shape(), y.shape(), param.attr_i64("axis", -1))?;
        let (xs, ys) = (x.as_f32()?, y.as_f32()?);
        let dims = x.dims().to_vec();
        let row_len = dims.last().copied().unwrap_or(1);
        let (op, act) = (self.op, self.act);

        let mut out_var = param.output("Out")?.write();
        let out = out_var.tensor_mut()?;
        out.resize(x.shape().clone(), DType::F32);
        for_each_row(&*ctx, out.as_f32_mut()?, row_len, |row, dst| {
            let base = row * row_len;
            for (col, d) in dst.iter_mut().enumerate() {
                let mut flat = base + col;
                let mut y_idx = 0;
                for (dim, stride) in dims.iter().zip(&strides).rev() {
                    y_idx += (flat % dim) * stride;
                    flat /= dim;
                }
                let v = op.apply(xs[base + col], ys[y_idx]);
                *d = match act {
                    Some(act) => act.apply(v),
                    None => v,
                };
            }
        });
        Ok(())
    }
}

/// `scale * x + bias`, or `scale * (x + bias)` when `bias_after_scale` is false.
pub struct ScaleKernel;

impl Kernel for ScaleKernel {
    fn run(&mut self, param: &KernelParam, ctx: &mut dyn Context) -> Result<()> {
        let scale = param.attr_f32("scale", 1.0);
        let bias = param.attr_f32("bias", 0.0);
        let after = param.attr_bool("bias_after_scale", true);
        let x_var = param.input("X")?.read();
        let x = x_var.tensor()?;
        let xs = x.as_f32()?;
        let row_len = x.dims().last().copied().unwrap_or(1);

        let mut out_var = param.output("Out")?.write();
        let out = out_var.tensor_mut()?;
        out.resize(x.shape().clone(), DType::F32);
        for_each_row(&*ctx, out.as_f32_mut()?, row_len, |row, dst| {
            let src = &xs[row * row_len..(row + 1) * row_len];
            for (d, &v) in dst.iter_mut().zip(src) {
                *d = if after { v * scale + bias } else { (v + bias) * scale };
            }
        });
        Ok(())
    }
}
