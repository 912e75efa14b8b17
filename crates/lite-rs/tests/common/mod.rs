#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use lite_rs::graph::{OpDesc, ProgramDesc, ProgramDescBuilder};
use lite_rs::{DType, Place, Predictor, Tensor, Variable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const IN: usize = 4;
pub const HIDDEN: usize = 8;
pub const OUT: usize = 3;

/// `softmax(relu(x * w1 + b1) * w2 + b2)`, written as unfused ops.
pub fn mlp_program() -> ProgramDesc {
    let mut b = ProgramDescBuilder::new();
    b.feed("x", DType::F32, &[-1, IN as i64]);
    b.persistable("w1", DType::F32, &[IN as i64, HIDDEN as i64]);
    b.persistable("b1", DType::F32, &[HIDDEN as i64]);
    b.persistable("w2", DType::F32, &[HIDDEN as i64, OUT as i64]);
    b.persistable("b2", DType::F32, &[OUT as i64]);
    b.binary("mul", "x", "w1", "h0");
    b.binary("elementwise_add", "h0", "b1", "h1");
    b.unary("relu", "h1", "h2", &[]);
    b.binary("mul", "h2", "w2", "o0");
    b.binary("elementwise_add", "o0", "b2", "o1");
    b.op(OpDesc::new("softmax")
        .with_input("X", &["o1"])
        .with_output("Out", &["prob"])
        .with_attr("axis", -1i32));
    b.fetch("prob");
    b.finish()
}

pub struct MlpParams {
    pub w1: Vec<f32>,
    pub b1: Vec<f32>,
    pub w2: Vec<f32>,
    pub b2: Vec<f32>,
}

impl MlpParams {
    pub fn random(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut values = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect() };
        MlpParams {
            w1: values(IN * HIDDEN),
            b1: values(HIDDEN),
            w2: values(HIDDEN * OUT),
            b2: values(OUT),
        }
    }

    pub fn tensors(&self) -> Vec<(&'static str, Tensor)> {
        vec![
            ("w1", Tensor::from_f32([IN, HIDDEN], self.w1.clone()).unwrap()),
            ("b1", Tensor::from_f32([HIDDEN], self.b1.clone()).unwrap()),
            ("w2", Tensor::from_f32([HIDDEN, OUT], self.w2.clone()).unwrap()),
            ("b2", Tensor::from_f32([OUT], self.b2.clone()).unwrap()),
        ]
    }

    /// Plain-loop evaluation of the MLP for a `[batch, IN]` input.
    pub fn reference(&self, x: &[f32]) -> Vec<f32> {
        let batch = x.len() / IN;
        let mut out = Vec::with_capacity(batch * OUT);
        for row in x.chunks(IN) {
            let hidden: Vec<f32> = (0..HIDDEN)
                .map(|j| {
                    let acc: f32 = (0..IN).map(|p| row[p] * self.w1[p * HIDDEN + j]).sum();
                    (acc + self.b1[j]).max(0.0)
                })
                .collect();
            let logits: Vec<f32> = (0..OUT)
                .map(|j| {
                    let acc: f32 = (0..HIDDEN).map(|p| hidden[p] * self.w2[p * OUT + j]).sum();
                    acc + self.b2[j]
                })
                .collect();
            let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            out.extend(exps.iter().map(|e| e / sum));
        }
        out
    }
}

pub fn random_input(seed: u64, batch: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..batch * IN).map(|_| rng.gen_range(-2.0..2.0)).collect()
}

/// Predictor built from [`mlp_program`] with `params` in its root scope.
pub fn build_mlp(params: &MlpParams, passes: &[&str]) -> Predictor {
    lite_rs_backend_ref_cpu::register_cpu_backend();
    let mut predictor = Predictor::new();
    for (name, tensor) in params.tensors() {
        predictor
            .scope()
            .insert_local(name, Variable::from_tensor(tensor));
    }
    let passes: Vec<String> = passes.iter().map(|p| p.to_string()).collect();
    predictor
        .build_from_desc(mlp_program(), &[Place::host_float()], &passes)
        .unwrap();
    predictor
}

pub fn set_input(predictor: &Predictor, x: &[f32]) {
    let tensor = Tensor::from_f32([x.len() / IN, IN], x.to_vec()).unwrap();
    predictor.get_input(0).unwrap().set_tensor(tensor);
}

pub fn run_once(predictor: &mut Predictor, x: &[f32]) -> Vec<f32> {
    set_input(predictor, x);
    predictor.run().unwrap();
    predictor.get_output(0).unwrap().tensor().unwrap().to_f32_vec()
}

pub fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() < 1e-5, "element {i}: {a} vs {e}");
    }
}

pub fn op_types(predictor: &Predictor) -> Vec<String> {
    predictor
        .program_desc()
        .and_then(|desc| desc.main_block())
        .map(|block| block.ops.iter().map(|op| op.op_type.clone()).collect())
        .unwrap_or_default()
}

/// Fresh directory under the system temp dir.
pub fn temp_dir(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "lite_rs_{tag}_{}_{nanos}_{n}",
        std::process::id()
    ))
}
