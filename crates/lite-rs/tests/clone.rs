mod common;

use common::{assert_close, build_mlp, random_input, run_once, MlpParams, HIDDEN};
use lite_rs::predictor::PredictorState;
use lite_rs::{PredictorError, Tensor};

#[test]
fn clone_runs_the_same_program() {
    let params = MlpParams::random(21);
    let mut original = build_mlp(&params, &[]);
    let x = random_input(22, 4);
    let expected = run_once(&mut original, &x);

    let mut clone = original.clone().unwrap();
    assert_eq!(clone.state(), PredictorState::Generated);
    assert!(clone.shares_root_with(&original));
    assert_eq!(clone.get_input_names(), original.get_input_names());
    assert_eq!(
        clone.runtime_program().unwrap().signature(),
        original.runtime_program().unwrap().signature()
    );
    assert_close(&run_once(&mut clone, &x), &expected);
}

#[test]
fn clone_has_its_own_inputs_and_outputs() {
    let params = MlpParams::random(23);
    let mut original = build_mlp(&params, &[]);
    let mut clone = original.clone().unwrap();

    let xa = random_input(24, 1);
    let xb = random_input(25, 3);
    let out_a = run_once(&mut original, &xa);
    let out_b = run_once(&mut clone, &xb);
    assert_close(&out_a, &params.reference(&xa));
    assert_close(&out_b, &params.reference(&xb));

    // Running the clone left the original's output alone.
    let still_a = original.get_output(0).unwrap().tensor().unwrap();
    assert_close(&still_a.to_f32_vec(), &out_a);
    assert!(!original
        .get_input(0)
        .unwrap()
        .ptr_eq(&clone.get_input(0).unwrap()));
}

#[test]
fn clone_with_vars_detaches_named_weights() {
    let params = MlpParams::random(26);
    let mut original = build_mlp(&params, &[]);
    let mut clone = original.clone_with_vars(&["b1"]).unwrap();

    let b1 = clone.get_mutable_tensor("b1").unwrap();
    b1.set_tensor(Tensor::from_f32([HIDDEN], vec![100.0; HIDDEN]).unwrap());
    assert!(matches!(
        original.get_mutable_tensor("b1"),
        Err(PredictorError::ReadOnlyVariable(_))
    ));

    let x = random_input(27, 2);
    let original_out = run_once(&mut original, &x);
    assert_close(&original_out, &params.reference(&x));

    let patched = MlpParams {
        b1: vec![100.0; HIDDEN],
        ..MlpParams::random(26)
    };
    assert_close(&run_once(&mut clone, &x), &patched.reference(&x));

    // Private copies carry over to clones of the clone.
    let mut grandchild = clone.clone().unwrap();
    assert!(grandchild.get_mutable_tensor("b1").is_ok());
    assert_close(&run_once(&mut grandchild, &x), &patched.reference(&x));
}

#[test]
fn clone_with_vars_rejects_bad_names() {
    let predictor = build_mlp(&MlpParams::random(28), &[]);
    assert!(matches!(
        predictor.clone_with_vars(&["b1", "no_such_var"]),
        Err(PredictorError::UnknownVariable(name)) if name == "no_such_var"
    ));
    assert!(matches!(
        predictor.clone_with_vars(&["x"]),
        Err(PredictorError::NotPersistable(name)) if name == "x"
    ));
}

#[test]
fn clone_before_build_fails() {
    let predictor = lite_rs::Predictor::new();
    assert!(matches!(
        predictor.clone(),
        Err(PredictorError::Build(lite_rs::BuildError::NotConfigured))
    ));
}
