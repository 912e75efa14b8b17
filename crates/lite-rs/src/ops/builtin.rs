//! Type and shape rules for the built-in operator set.

use super::{
    input_info, output_name, require_dtype, static_product, InferFn, OpDef, TypeEnv, VarInfo,
};
use crate::graph::{OpDesc, VarKind};
use crate::tensor::DType;
use anyhow::{anyhow, bail, ensure, Result};

pub(super) fn definitions() -> Vec<OpDef> {
    let def = |op_type: &'static str, version: u32, infer: InferFn| OpDef {
        op_type,
        version,
        infer,
        has_side_effects: false,
        source: file!(),
    };
    vec![
        OpDef {
            has_side_effects: true,
            ..def("feed", 1, infer_feed)
        },
        OpDef {
            has_side_effects: true,
            ..def("fetch", 1, infer_passthrough)
        },
        def("assign", 1, infer_passthrough),
        def("cast", 1, infer_cast),
        def("mul", 1, infer_mul),
        def("fc", 1, infer_fc),
        def("elementwise_add", 1, infer_elementwise),
        def("elementwise_sub", 1, infer_elementwise),
        def("elementwise_mul", 1, infer_elementwise),
        def("fusion_elementwise_add_activation", 1, infer_fused_elementwise),
        def("relu", 1, infer_float_unary),
        def("sigmoid", 1, infer_float_unary),
        def("softmax", 1, infer_float_unary),
        def("scale", 1, infer_float_unary),
        def("write_to_array", 1, infer_write_to_array),
        def("read_from_array", 1, infer_read_from_array),
        def("lod_array_length", 1, infer_array_length),
    ]
}

fn infer_feed(op: &OpDesc, env: &TypeEnv) -> Result<Vec<(String, VarInfo)>> {
    let out = output_name(op, "Out")?;
    let info = env
        .get(out)
        .ok_or_else(|| anyhow!("feed target `{out}` is not declared"))?;
    ensure!(
        info.dtype.is_some(),
        "feed target `{out}` declares no element type"
    );
    Ok(vec![(out.to_string(), info.clone())])
}

fn infer_passthrough(op: &OpDesc, env: &TypeEnv) -> Result<Vec<(String, VarInfo)>> {
    let (_, info) = input_info(op, env, "X")?;
    Ok(vec![(output_name(op, "Out")?.to_string(), info.clone())])
}

fn infer_float_unary(op: &OpDesc, env: &TypeEnv) -> Result<Vec<(String, VarInfo)>> {
    let (name, info) = input_info(op, env, "X")?;
    let dtype = require_dtype(name, info)?;
    ensure!(
        dtype.is_float(),
        "`{}` expects a float input, `{name}` is {dtype}",
        op.op_type
    );
    Ok(vec![(output_name(op, "Out")?.to_string(), info.clone())])
}

fn infer_cast(op: &OpDesc, env: &TypeEnv) -> Result<Vec<(String, VarInfo)>> {
    let (_, info) = input_info(op, env, "X")?;
    let tag = op
        .attr("out_dtype")
        .and_then(|a| a.as_i64())
        .ok_or_else(|| anyhow!("missing `out_dtype` attribute"))?;
    let out_dtype = u32::try_from(tag)
        .ok()
        .and_then(DType::from_tag)
        .ok_or_else(|| anyhow!("`out_dtype` {tag} is not a known element type"))?;
    Ok(vec![(
        output_name(op, "Out")?.to_string(),
        VarInfo::tensor(out_dtype, info.shape.clone()),
    )])
}

fn same_float_dtype(op: &OpDesc, x: (&str, &VarInfo), y: (&str, &VarInfo)) -> Result<DType> {
    let x_dtype = require_dtype(x.0, x.1)?;
    let y_dtype = require_dtype(y.0, y.1)?;
    ensure!(
        x_dtype == y_dtype,
        "operand element types differ: `{}` is {x_dtype}, `{}` is {y_dtype}",
        x.0,
        y.0
    );
    ensure!(
        x_dtype.is_float(),
        "`{}` expects float operands, got {x_dtype}",
        op.op_type
    );
    Ok(x_dtype)
}

/// Checks that `y` broadcasts into `x` starting at `axis` (`-1` aligns trailing dims).
fn check_broadcast(x: &[i64], y: &[i64], axis: i64) -> Result<()> {
    ensure!(
        y.len() <= x.len(),
        "Y rank {} exceeds X rank {}",
        y.len(),
        x.len()
    );
    let start = if axis < 0 {
        x.len() - y.len()
    } else {
        axis as usize
    };
    ensure!(
        start + y.len() <= x.len(),
        "axis {axis} places Y {y:?} outside X {x:?}"
    );
    for (offset, &yd) in y.iter().enumerate() {
        let xd = x[start + offset];
        if xd >= 0 && yd >= 0 && xd != yd && yd != 1 {
            bail!("Y {y:?} does not broadcast into X {x:?} at axis {axis}");
        }
    }
    Ok(())
}

fn infer_elementwise(op: &OpDesc, env: &TypeEnv) -> Result<Vec<(String, VarInfo)>> {
    let x = input_info(op, env, "X")?;
    let y = input_info(op, env, "Y")?;
    let dtype = same_float_dtype(op, x, y)?;
    if let (Some(xs), Some(ys)) = (&x.1.shape, &y.1.shape) {
        check_broadcast(xs, ys, op.attr_i64_or("axis", -1))?;
    }
    Ok(vec![(
        output_name(op, "Out")?.to_string(),
        VarInfo::tensor(dtype, x.1.shape.clone()),
    )])
}

fn infer_fused_elementwise(op: &OpDesc, env: &TypeEnv) -> Result<Vec<(String, VarInfo)>> {
    let act = op.attr_str_or("act_type", "");
    ensure!(
        matches!(act, "relu" | "sigmoid"),
        "unsupported fused activation `{act}`"
    );
    infer_elementwise(op, env)
}

fn infer_mul(op: &OpDesc, env: &TypeEnv) -> Result<Vec<(String, VarInfo)>> {
    let x = input_info(op, env, "X")?;
    let y = input_info(op, env, "Y")?;
    let dtype = same_float_dtype(op, x, y)?;
    let x_cols = op.attr_i64_or("x_num_col_dims", 1).max(1) as usize;
    let y_cols = op.attr_i64_or("y_num_col_dims", 1).max(1) as usize;
    let shape = match (&x.1.shape, &y.1.shape) {
        (Some(xs), Some(ys)) => {
            ensure!(
                xs.len() > x_cols && ys.len() > y_cols,
                "x_num_col_dims={x_cols} / y_num_col_dims={y_cols} do not fit X {xs:?} and Y {ys:?}"
            );
            if let (Some(kx), Some(ky)) = (static_product(&xs[x_cols..]), static_product(&ys[..y_cols])) {
                ensure!(kx == ky, "inner dims differ: X {xs:?} flattens to K={kx}, Y {ys:?} to K={ky}");
            }
            let mut out = xs[..x_cols].to_vec();
            out.extend_from_slice(&ys[y_cols..]);
            Some(out)
        }
        _ => None,
    };
    Ok(vec![(
        output_name(op, "Out")?.to_string(),
        VarInfo::tensor(dtype, shape),
    )])
}

fn infer_fc(op: &OpDesc, env: &TypeEnv) -> Result<Vec<(String, VarInfo)>> {
    let input = input_info(op, env, "Input")?;
    let weight = input_info(op, env, "W")?;
    let dtype = same_float_dtype(op, input, weight)?;
    if !op.input("Bias").is_empty() {
        let bias = input_info(op, env, "Bias")?;
        same_float_dtype(op, input, bias)?;
    }
    let act = op.attr_str_or("activation_type", "");
    ensure!(matches!(act, "" | "relu"), "unsupported fc activation `{act}`");
    let cols = op.attr_i64_or("in_num_col_dims", 1).max(1) as usize;
    let shape = match (&input.1.shape, &weight.1.shape) {
        (Some(xs), Some(ws)) => {
            ensure!(ws.len() == 2, "fc weight must be rank 2, got {ws:?}");
            ensure!(
                xs.len() > cols,
                "in_num_col_dims={cols} does not fit input {xs:?}"
            );
            if let Some(k) = static_product(&xs[cols..]) {
                ensure!(
                    ws[0] < 0 || k == ws[0],
                    "input {xs:?} flattens to K={k} but weight is {ws:?}"
                );
            }
            let mut out = xs[..cols].to_vec();
            out.push(ws[1]);
            Some(out)
        }
        _ => None,
    };
    Ok(vec![(
        output_name(op, "Out")?.to_string(),
        VarInfo::tensor(dtype, shape),
    )])
}

fn infer_write_to_array(op: &OpDesc, env: &TypeEnv) -> Result<Vec<(String, VarInfo)>> {
    let (_, x) = input_info(op, env, "X")?;
    let (index_name, index) = input_info(op, env, "I")?;
    ensure!(
        index.dtype == Some(DType::I64),
        "array index `{index_name}` must be i64"
    );
    Ok(vec![(
        output_name(op, "Out")?.to_string(),
        VarInfo {
            kind: VarKind::TensorArray,
            dtype: x.dtype,
            shape: x.shape.clone(),
        },
    )])
}

fn infer_read_from_array(op: &OpDesc, env: &TypeEnv) -> Result<Vec<(String, VarInfo)>> {
    let (array_name, array) = input_info(op, env, "X")?;
    ensure!(
        array.kind == VarKind::TensorArray,
        "`{array_name}` is not a tensor array"
    );
    let (index_name, index) = input_info(op, env, "I")?;
    ensure!(
        index.dtype == Some(DType::I64),
        "array index `{index_name}` must be i64"
    );
    Ok(vec![(
        output_name(op, "Out")?.to_string(),
        VarInfo {
            kind: VarKind::LodTensor,
            dtype: array.dtype,
            shape: array.shape.clone(),
        },
    )])
}

fn infer_array_length(op: &OpDesc, env: &TypeEnv) -> Result<Vec<(String, VarInfo)>> {
    let (array_name, array) = input_info(op, env, "X")?;
    ensure!(
        array.kind == VarKind::TensorArray,
        "`{array_name}` is not a tensor array"
    );
    Ok(vec![(
        output_name(op, "Out")?.to_string(),
        VarInfo::tensor(DType::I64, Some(vec![1])),
    )])
}
