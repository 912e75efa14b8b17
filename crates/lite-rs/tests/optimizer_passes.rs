mod common;

use common::{
    assert_close, build_mlp, op_types, random_input, run_once, MlpParams, HIDDEN, IN,
};
use lite_rs::graph::{ProgramDesc, ProgramDescBuilder};
use lite_rs::optimizer::pipeline::known_pass_names;
use lite_rs::optimizer::PipelineOptimizer;
use lite_rs::{DType, Place, Predictor, Tensor, Variable};

fn build(desc: ProgramDesc, params: &[(&str, Tensor)], passes: &[&str]) -> Predictor {
    lite_rs_backend_ref_cpu::register_cpu_backend();
    let mut predictor = Predictor::new();
    for (name, tensor) in params {
        predictor
            .scope()
            .insert_local(name, Variable::from_tensor(tensor.clone()));
    }
    let passes: Vec<String> = passes.iter().map(|p| p.to_string()).collect();
    predictor
        .build_from_desc(desc, &[Place::host_float()], &passes)
        .unwrap();
    predictor
}

#[test]
fn default_pipeline_fuses_the_mlp() {
    let params = MlpParams::random(51);
    let mut fused = build_mlp(&params, &[]);
    assert_eq!(op_types(&fused), ["feed", "fc", "fc", "softmax", "fetch"]);
    let first_fc = &fused.program_desc().unwrap().main_block().unwrap().ops[1];
    assert_eq!(first_fc.attr_str_or("activation_type", ""), "relu");

    let mut plain = build_mlp(&params, &["memory_optimize_pass"]);
    assert_eq!(
        op_types(&plain),
        [
            "feed",
            "mul",
            "elementwise_add",
            "relu",
            "mul",
            "elementwise_add",
            "softmax",
            "fetch"
        ]
    );

    let x = random_input(52, 4);
    assert_close(&run_once(&mut fused, &x), &run_once(&mut plain, &x));
}

#[test]
fn observed_intermediates_block_fusion() {
    let params = MlpParams::random(53);
    let tensors = params.tensors();
    let mut b = ProgramDescBuilder::new();
    b.feed("x", DType::F32, &[-1, IN as i64]);
    b.persistable("w1", DType::F32, &[IN as i64, HIDDEN as i64]);
    b.persistable("b1", DType::F32, &[HIDDEN as i64]);
    b.binary("mul", "x", "w1", "h0");
    b.binary("elementwise_add", "h0", "b1", "h1");
    b.unary("relu", "h1", "h2", &[]);
    b.fetch("h2");
    b.fetch("h0");

    let mut predictor = build(b.finish(), &tensors[..2], &[]);
    assert_eq!(
        op_types(&predictor),
        ["feed", "mul", "fusion_elementwise_add_activation", "fetch", "fetch"]
    );
    assert_eq!(predictor.get_output_names(), &["h2".to_string(), "h0".to_string()]);

    let x = random_input(54, 2);
    let h2 = run_once(&mut predictor, &x);
    let h0 = predictor.get_output(1).unwrap().tensor().unwrap().to_f32_vec();
    let expected_h2: Vec<f32> = h0
        .chunks(HIDDEN)
        .flat_map(|row| {
            row.iter()
                .zip(&params.b1)
                .map(|(v, b)| (v + b).max(0.0))
                .collect::<Vec<_>>()
        })
        .collect();
    assert_close(&h2, &expected_h2);
}

#[test]
fn sigmoid_add_fuses_only_when_requested() {
    let mut b = ProgramDescBuilder::new();
    b.feed("a", DType::F32, &[2, 2]);
    b.feed("c", DType::F32, &[2]);
    b.binary("elementwise_add", "a", "c", "s");
    b.unary("sigmoid", "s", "y", &[]);
    b.fetch("y");
    let desc = b.finish();

    let fused = build(desc.clone(), &[], &["elementwise_activation_fuse_pass"]);
    assert_eq!(
        op_types(&fused),
        ["feed", "feed", "fusion_elementwise_add_activation", "fetch"]
    );
    let unfused = build(desc, &[], &["fc_fuse_pass"]);
    assert_eq!(
        op_types(&unfused),
        ["feed", "feed", "elementwise_add", "sigmoid", "fetch"]
    );

    for mut predictor in [fused, unfused] {
        predictor
            .get_input_by_name("a")
            .unwrap()
            .set_tensor(Tensor::from_f32([2, 2], vec![0.0, 1.0, -1.0, 2.0]).unwrap());
        predictor
            .get_input_by_name("c")
            .unwrap()
            .set_tensor(Tensor::from_f32([2], vec![0.0, -1.0]).unwrap());
        predictor.run().unwrap();
        let y = predictor.get_outputs().unwrap()[0].to_f32_vec();
        let sig = |v: f32| 1.0 / (1.0 + (-v).exp());
        assert_close(&y, &[sig(0.0), sig(0.0), sig(-1.0), sig(1.0)]);
    }
}

#[test]
fn identity_scale_and_dead_ops_are_removed() {
    let mut b = ProgramDescBuilder::new();
    b.feed("x", DType::F32, &[3]);
    b.unary("scale", "x", "s", &[("scale", 1.0f32.into()), ("bias", 0.0f32.into())]);
    b.unary("relu", "s", "y", &[]);
    b.unary("sigmoid", "x", "unused", &[]);
    b.fetch("y");
    let mut predictor = build(b.finish(), &[], &[]);
    assert_eq!(op_types(&predictor), ["feed", "relu", "fetch"]);
    let relu = &predictor.program_desc().unwrap().main_block().unwrap().ops[1];
    assert_eq!(relu.input("X"), &["x".to_string()]);

    predictor
        .get_input(0)
        .unwrap()
        .set_tensor(Tensor::from_f32([3], vec![-1.0, 0.0, 2.0]).unwrap());
    predictor.run().unwrap();
    assert_eq!(predictor.get_outputs().unwrap()[0].to_f32_vec(), vec![0.0, 0.0, 2.0]);
}

#[test]
fn fetched_scale_output_is_kept() {
    let mut b = ProgramDescBuilder::new();
    b.feed("x", DType::F32, &[3]);
    b.unary("scale", "x", "s", &[]);
    b.fetch("s");
    let predictor = build(b.finish(), &[], &[]);
    assert_eq!(op_types(&predictor), ["feed", "scale", "fetch"]);
}

#[test]
fn builds_are_deterministic() {
    let params = MlpParams::random(55);
    let signatures: Vec<Vec<String>> = (0..3)
        .map(|_| {
            let mut predictor = build_mlp(&params, &[]);
            predictor.gen_runtime_program().unwrap();
            predictor.runtime_program().unwrap().signature()
        })
        .collect();
    assert!(signatures.windows(2).all(|w| w[0] == w[1]));
    assert!(signatures[0][1].starts_with("fc@fc/def/"));
}

#[test]
fn pass_lists_are_ordered_by_stage() {
    let pipeline =
        PipelineOptimizer::with_passes(&["elementwise_activation_fuse_pass", "dead_op_elimination_pass"])
            .unwrap();
    assert_eq!(
        pipeline.pass_names(),
        [
            "dead_op_elimination_pass",
            "type_inference_pass",
            "place_inference_pass",
            "static_kernel_pick_pass",
            "elementwise_activation_fuse_pass",
            "memory_optimize_pass"
        ]
    );
    let known = known_pass_names();
    assert_eq!(known.len(), 8);
    assert!(known.contains(&"fc_fuse_pass"));
}
