use std::collections::BTreeMap;
use std::sync::Arc;

use lite_rs::device::{Context, DeviceError, ParamKey, ParamValue, TargetConfig};
use lite_rs::graph::Attribute;
use lite_rs::kernel::{Kernel, KernelParam, KernelRegistry};
use lite_rs::place::{Place, TargetType};
use lite_rs::tensor::{DType, Tensor};
use lite_rs::variable::Variable;
use lite_rs_backend_ref_cpu::kernels::{
    register_all, ActivationKernel, ArrayLengthKernel, BinaryOp, CastKernel, ElementwiseKernel,
    FcKernel, MulKernel, ReadFromArrayKernel, ScaleKernel, SoftmaxKernel, UnaryActivation,
    WriteToArrayKernel, MAX_ARRAY_INDEX,
};
use lite_rs_backend_ref_cpu::{HostConfig, HostContext, HostDevice};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn context(threads: i32) -> HostContext {
    let mut ctx = HostContext::new(Arc::new(HostDevice::new(TargetType::Host))).unwrap();
    ctx.set_param(ParamKey::ContextWorkThreadNum, ParamValue::I32(threads))
        .unwrap();
    ctx
}

fn f32_var(dims: &[usize], values: Vec<f32>) -> Variable {
    Variable::from_tensor(Tensor::from_f32(dims.to_vec(), values).unwrap())
}

struct ParamBuilder(KernelParam);

impl ParamBuilder {
    fn new(op_type: &str) -> Self {
        ParamBuilder(KernelParam {
            op_type: op_type.to_string(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            attrs: BTreeMap::new(),
        })
    }

    fn input(mut self, slot: &str, var: &Variable) -> Self {
        self.0.inputs.insert(slot.to_string(), vec![var.clone()]);
        self
    }

    fn output(mut self, slot: &str, var: &Variable) -> Self {
        self.0.outputs.insert(slot.to_string(), vec![var.clone()]);
        self
    }

    fn attr(mut self, name: &str, value: impl Into<Attribute>) -> Self {
        self.0.attrs.insert(name.to_string(), value.into());
        self
    }
}

fn run(kernel: &mut dyn Kernel, param: &KernelParam, ctx: &mut HostContext) {
    kernel.prepare(param, ctx).unwrap();
    kernel.run(param, ctx).unwrap();
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() < 1e-5, "element {i}: {a} vs {e}");
    }
}

#[test]
fn register_all_is_idempotent() {
    let registry = KernelRegistry::new();
    let added = register_all(&registry);
    assert!(added > 0);
    assert_eq!(register_all(&registry), 0);
    let feeds = registry.kernels_for("feed");
    assert_eq!(feeds.len(), 1);
    let adds = registry.kernels_for("elementwise_add");
    assert!(adds.iter().any(|k| k.place == Place::host_float()));
    assert!(adds.iter().all(|k| k.source.ends_with("mod.rs")));
}

#[test]
fn mul_flattens_operands() {
    let mut ctx = context(1);
    let x = f32_var(&[2, 1, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let y = f32_var(&[3, 2], vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    let out = Variable::default();
    let param = ParamBuilder::new("mul")
        .input("X", &x)
        .input("Y", &y)
        .output("Out", &out)
        .attr("x_num_col_dims", 1)
        .0;
    run(&mut MulKernel, &param, &mut ctx);
    let result = out.tensor().unwrap();
    assert_eq!(result.dims(), &[2, 2]);
    assert_close(result.as_f32().unwrap(), &[4.0, 5.0, 10.0, 11.0]);
}

#[test]
fn matmul_is_identical_across_thread_counts() {
    let mut rng = StdRng::seed_from_u64(7);
    let (m, k, n) = (33, 17, 9);
    let xs: Vec<f32> = (0..m * k).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let ws: Vec<f32> = (0..k * n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let bias: Vec<f32> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let mut results = Vec::new();
    for threads in [1, 4] {
        let mut ctx = context(threads);
        let x = f32_var(&[m, k], xs.clone());
        let w = f32_var(&[k, n], ws.clone());
        let b = f32_var(&[n], bias.clone());
        let out = Variable::default();
        let param = ParamBuilder::new("fc")
            .input("Input", &x)
            .input("W", &w)
            .input("Bias", &b)
            .output("Out", &out)
            .attr("activation_type", "relu")
            .0;
        run(&mut FcKernel, &param, &mut ctx);
        results.push(out.tensor().unwrap());
    }
    assert_eq!(results[0], results[1]);
    assert!(results[0].as_f32().unwrap().iter().all(|v| *v >= 0.0));
}

#[test]
fn fc_rejects_unknown_activation_on_prepare() {
    let mut ctx = context(1);
    let param = ParamBuilder::new("fc").attr("activation_type", "gelu").0;
    assert!(FcKernel.prepare(&param, &mut ctx).is_err());
}

#[test]
fn elementwise_broadcasts_along_axis() {
    let mut ctx = context(1);
    let x = f32_var(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let row = f32_var(&[3], vec![10.0, 20.0, 30.0]);
    let out = Variable::default();
    let param = ParamBuilder::new("elementwise_add")
        .input("X", &x)
        .input("Y", &row)
        .output("Out", &out)
        .0;
    run(&mut ElementwiseKernel::new(BinaryOp::Add, None), &param, &mut ctx);
    assert_close(
        out.tensor().unwrap().as_f32().unwrap(),
        &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0],
    );

    let col = f32_var(&[2], vec![2.0, -1.0]);
    let param = ParamBuilder::new("elementwise_mul")
        .input("X", &x)
        .input("Y", &col)
        .output("Out", &out)
        .attr("axis", 0)
        .0;
    run(&mut ElementwiseKernel::new(BinaryOp::Mul, None), &param, &mut ctx);
    assert_close(
        out.tensor().unwrap().as_f32().unwrap(),
        &[2.0, 4.0, 6.0, -4.0, -5.0, -6.0],
    );
}

#[test]
fn fused_add_applies_activation() {
    let mut ctx = context(1);
    let x = f32_var(&[4], vec![-3.0, -1.0, 1.0, 3.0]);
    let y = f32_var(&[4], vec![1.0, 1.0, 1.0, 1.0]);
    let out = Variable::default();
    let param = ParamBuilder::new("fusion_elementwise_add_activation")
        .input("X", &x)
        .input("Y", &y)
        .output("Out", &out)
        .attr("act_type", "relu")
        .0;
    run(&mut ElementwiseKernel::fused(BinaryOp::Add), &param, &mut ctx);
    assert_close(out.tensor().unwrap().as_f32().unwrap(), &[0.0, 0.0, 2.0, 4.0]);

    let bad = ParamBuilder::new("fusion_elementwise_add_activation")
        .attr("act_type", "tanh")
        .0;
    assert!(ElementwiseKernel::fused(BinaryOp::Add)
        .prepare(&bad, &mut ctx)
        .is_err());
}

#[test]
fn scale_honours_bias_order() {
    let mut ctx = context(1);
    let x = f32_var(&[2], vec![1.0, 2.0]);
    let out = Variable::default();
    let after = ParamBuilder::new("scale")
        .input("X", &x)
        .output("Out", &out)
        .attr("scale", 2.0f32)
        .attr("bias", 1.0f32)
        .0;
    run(&mut ScaleKernel, &after, &mut ctx);
    assert_close(out.tensor().unwrap().as_f32().unwrap(), &[3.0, 5.0]);

    let before = ParamBuilder::new("scale")
        .input("X", &x)
        .output("Out", &out)
        .attr("scale", 2.0f32)
        .attr("bias", 1.0f32)
        .attr("bias_after_scale", false)
        .0;
    run(&mut ScaleKernel, &before, &mut ctx);
    assert_close(out.tensor().unwrap().as_f32().unwrap(), &[4.0, 6.0]);
}

#[test]
fn softmax_rows_sum_to_one() {
    let mut ctx = context(2);
    let x = f32_var(&[2, 3], vec![1.0, 2.0, 3.0, 1000.0, 1000.0, 1000.0]);
    let out = Variable::default();
    let param = ParamBuilder::new("softmax")
        .input("X", &x)
        .output("Out", &out)
        .0;
    run(&mut SoftmaxKernel, &param, &mut ctx);
    let values = out.tensor().unwrap().to_f32_vec();
    for row in values.chunks(3) {
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
    assert_close(&values[3..], &[1.0 / 3.0; 3]);
    assert!(values[2] > values[1] && values[1] > values[0]);

    let param = ParamBuilder::new("softmax")
        .input("X", &x)
        .output("Out", &out)
        .attr("axis", 0)
        .0;
    run(&mut SoftmaxKernel, &param, &mut ctx);
    let values = out.tensor().unwrap().to_f32_vec();
    for col in 0..3 {
        assert!((values[col] + values[3 + col] - 1.0).abs() < 1e-5);
    }
}

#[test]
fn sigmoid_and_cast() {
    let mut ctx = context(1);
    let x = f32_var(&[3], vec![0.0, 2.5, -2.5]);
    let out = Variable::default();
    let param = ParamBuilder::new("sigmoid")
        .input("X", &x)
        .output("Out", &out)
        .0;
    run(&mut ActivationKernel::new(UnaryActivation::Sigmoid), &param, &mut ctx);
    let values = out.tensor().unwrap().to_f32_vec();
    assert_close(&values[..1], &[0.5]);
    assert!((values[1] + values[2] - 1.0).abs() < 1e-5);

    let cast_out = Variable::default();
    let param = ParamBuilder::new("cast")
        .input("X", &x)
        .output("Out", &cast_out)
        .attr("out_dtype", i64::from(DType::I32.tag()))
        .0;
    run(&mut CastKernel::default(), &param, &mut ctx);
    let cast = cast_out.tensor().unwrap();
    assert_eq!(cast.dtype(), DType::I32);
    assert_eq!(cast.as_slice::<i32>().unwrap(), &[0, 2, -2]);
}

#[test]
fn tensor_array_write_read_and_length() {
    let mut ctx = context(1);
    let array = Variable::tensor_array();
    let index = Variable::from_tensor(Tensor::from_i64([1], vec![2]).unwrap());
    let value = f32_var(&[2], vec![7.0, 8.0]);
    let write = ParamBuilder::new("write_to_array")
        .input("X", &value)
        .input("I", &index)
        .output("Out", &array)
        .0;
    run(&mut WriteToArrayKernel, &write, &mut ctx);
    assert_eq!(array.read().array().unwrap().len(), 3);

    let length = Variable::default();
    let len_param = ParamBuilder::new("lod_array_length")
        .input("X", &array)
        .output("Out", &length)
        .0;
    run(&mut ArrayLengthKernel, &len_param, &mut ctx);
    let len = length.tensor().unwrap();
    assert_eq!(len.dims(), &[1]);
    assert_eq!(len.as_i64().unwrap(), &[3]);

    let read_out = Variable::default();
    let read = ParamBuilder::new("read_from_array")
        .input("X", &array)
        .input("I", &index)
        .output("Out", &read_out)
        .0;
    run(&mut ReadFromArrayKernel, &read, &mut ctx);
    assert_eq!(read_out.tensor().unwrap().to_f32_vec(), vec![7.0, 8.0]);

    // Slot 0 was padded, never written.
    index.set_tensor(Tensor::from_i64([1], vec![0]).unwrap());
    assert!(ReadFromArrayKernel.run(&read, &mut ctx).is_err());
    index.set_tensor(Tensor::from_i64([1], vec![5]).unwrap());
    assert!(ReadFromArrayKernel.run(&read, &mut ctx).is_err());
}

#[test]
fn oversized_array_index_is_an_error() {
    let mut ctx = context(1);
    let array = Variable::tensor_array();
    let value = f32_var(&[1], vec![1.0]);
    let index = Variable::from_tensor(Tensor::from_i64([1], vec![i64::MAX]).unwrap());
    let write = ParamBuilder::new("write_to_array")
        .input("X", &value)
        .input("I", &index)
        .output("Out", &array)
        .0;
    let err = WriteToArrayKernel.run(&write, &mut ctx).unwrap_err();
    assert!(err.to_string().contains("exceeds"), "{err}");
    assert!(array.read().array().unwrap().is_empty());

    index.set_tensor(Tensor::from_i64([1], vec![MAX_ARRAY_INDEX as i64 + 1]).unwrap());
    assert!(WriteToArrayKernel.run(&write, &mut ctx).is_err());
    index.set_tensor(Tensor::from_i64([1], vec![MAX_ARRAY_INDEX as i64]).unwrap());
    WriteToArrayKernel.run(&write, &mut ctx).unwrap();
    assert_eq!(array.read().array().unwrap().len(), MAX_ARRAY_INDEX + 1);
}

#[test]
fn matmul_workspace_is_charged_to_the_context() {
    let mut ctx = context(2);
    let x = f32_var(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let y = f32_var(&[3, 2], vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    let out = Variable::default();
    let param = ParamBuilder::new("mul")
        .input("X", &x)
        .input("Y", &y)
        .output("Out", &out)
        .0;
    run(&mut MulKernel, &param, &mut ctx);
    assert_eq!(out.tensor().unwrap().to_f32_vec(), vec![4.0, 5.0, 10.0, 11.0]);
    assert_eq!(ctx.allocated_bytes(), 0);

    // The packed [3, 2] operand needs 24 bytes.
    let config: TargetConfig = Arc::new(HostConfig {
        memory_limit: Some(16),
    });
    ctx.configure(&config).unwrap();
    let err = MulKernel.run(&param, &mut ctx).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeviceError>(),
        Some(DeviceError::OutOfMemory {
            requested: 24,
            available: 16
        })
    ));
    assert_eq!(ctx.allocated_bytes(), 0);
}
