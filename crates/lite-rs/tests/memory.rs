mod common;

use common::{assert_close, build_mlp, random_input, run_once, MlpParams};
use lite_rs::graph::{OpDesc, ProgramDescBuilder};
use lite_rs::program::MemoryPlan;
use lite_rs::{DType, Place, Predictor, Tensor};

/// `x → scale → scale → scale → scale → y`: a chain whose intermediates can
/// alternate between two buffers.
fn scale_chain() -> lite_rs::graph::ProgramDesc {
    let mut b = ProgramDescBuilder::new();
    b.feed("x", DType::F32, &[-1]);
    let names = ["x", "t0", "t1", "t2", "y"];
    for pair in names.windows(2) {
        b.unary("scale", pair[0], pair[1], &[("scale", 2.0f32.into())]);
    }
    b.fetch("y");
    b.finish()
}

fn build_chain() -> Predictor {
    lite_rs_backend_ref_cpu::register_cpu_backend();
    let mut predictor = Predictor::new();
    predictor
        .build_from_desc(scale_chain(), &[Place::host_float()], &[])
        .unwrap();
    predictor
}

#[test]
fn chain_intermediates_share_slots() {
    let predictor = build_chain();
    let block = predictor.program_desc().unwrap().main_block().unwrap();
    let plan = MemoryPlan::for_block(block);
    let (t0, t1, t2) = (
        plan.slot_of("t0").unwrap(),
        plan.slot_of("t1").unwrap(),
        plan.slot_of("t2").unwrap(),
    );
    assert_eq!(t0, t2);
    assert_ne!(t0, t1);
    assert!(plan.slot_of("x").is_none());
    assert!(plan.slot_of("y").is_none());
}

#[test]
fn shared_slots_compute_correct_results() {
    let mut predictor = build_chain();
    predictor
        .get_input(0)
        .unwrap()
        .set_tensor(Tensor::from_f32([3], vec![1.0, -2.0, 0.5]).unwrap());
    predictor.run().unwrap();
    let out = predictor.get_output(0).unwrap().tensor().unwrap();
    assert_close(&out.to_f32_vec(), &[16.0, -32.0, 8.0]);
}

#[test]
fn shrinking_releases_buffers_and_keeps_results() {
    let params = MlpParams::random(31);
    let mut predictor = build_mlp(&params, &[]);
    assert!(!predictor.try_shrink_memory());

    let x = random_input(32, 6);
    let first = run_once(&mut predictor, &x);
    assert!(predictor.try_shrink_memory());
    assert!(!predictor.try_shrink_memory());

    let second = run_once(&mut predictor, &x);
    assert_close(&second, &first);
    assert_close(&second, &params.reference(&x));
}

#[test]
fn tensor_arrays_are_cleared_between_runs() {
    lite_rs_backend_ref_cpu::register_cpu_backend();
    let mut b = ProgramDescBuilder::new();
    b.feed("x", DType::F32, &[2]);
    b.feed("i", DType::I64, &[1]);
    b.tensor_array("arr", DType::F32);
    b.op(OpDesc::new("write_to_array")
        .with_input("X", &["x"])
        .with_input("I", &["i"])
        .with_output("Out", &["arr"]));
    b.op(OpDesc::new("read_from_array")
        .with_input("X", &["arr"])
        .with_input("I", &["i"])
        .with_output("Out", &["back"]));
    b.op(OpDesc::new("lod_array_length")
        .with_input("X", &["arr"])
        .with_output("Out", &["len"]));
    b.fetch("back");
    b.fetch("len");

    let mut predictor = Predictor::new();
    predictor
        .build_from_desc(b.finish(), &[Place::host_float()], &[])
        .unwrap();
    assert!(predictor.runtime_program().is_none());
    predictor.gen_runtime_program().unwrap();
    assert!(predictor.runtime_program().unwrap().has_tensor_arrays());

    let x = predictor.get_input_by_name("x").unwrap();
    let i = predictor.get_input_by_name("i").unwrap();
    for (index, value) in [(2i64, 5.0f32), (0, 6.0)] {
        x.set_tensor(Tensor::from_f32([2], vec![value, -value]).unwrap());
        i.set_tensor(Tensor::from_i64([1], vec![index]).unwrap());
        predictor.run().unwrap();
        let outputs = predictor.get_outputs().unwrap();
        assert_eq!(outputs[0].to_f32_vec(), vec![value, -value]);
        // Only this run's write is visible.
        assert_eq!(outputs[1].as_i64().unwrap(), &[index + 1]);
    }
}

#[test]
fn in_place_ops_read_the_previous_value() {
    lite_rs_backend_ref_cpu::register_cpu_backend();
    let mut b = ProgramDescBuilder::new();
    b.feed("x", DType::F32, &[-1]);
    b.unary("scale", "x", "t", &[("scale", 2.0f32.into())]);
    b.unary(
        "scale",
        "t",
        "t",
        &[("scale", 3.0f32.into()), ("bias", 1.0f32.into())],
    );
    b.unary("scale", "t", "y", &[("scale", (-1.0f32).into())]);
    b.fetch("y");

    let mut predictor = Predictor::new();
    predictor
        .build_from_desc(b.finish(), &[Place::host_float()], &[])
        .unwrap();
    for values in [vec![1.0, -2.0, 0.5], vec![4.0]] {
        let expected: Vec<f32> = values.iter().map(|v| -(v * 6.0 + 1.0)).collect();
        predictor
            .get_input(0)
            .unwrap()
            .set_tensor(Tensor::from_f32([values.len()], values).unwrap());
        predictor.run().unwrap();
        let out = predictor.get_output(0).unwrap().tensor().unwrap();
        assert_close(&out.to_f32_vec(), &expected);
    }

    assert!(predictor.try_shrink_memory());
    predictor
        .get_input(0)
        .unwrap()
        .set_tensor(Tensor::from_f32([1], vec![0.0]).unwrap());
    predictor.run().unwrap();
    let out = predictor.get_output(0).unwrap().tensor().unwrap();
    assert_close(&out.to_f32_vec(), &[-1.0]);
}
