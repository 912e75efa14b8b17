mod common;

use std::fs;

use common::{assert_close, build_mlp, op_types, random_input, run_once, temp_dir, MlpParams};
use lite_rs::model_io::{
    self, ModelIoError, ModelType, TailoringInfo, KERNELS_LIST, OPS_LIST, OPS_SOURCE_LIST,
    PARAMS_FILE,
};
use lite_rs::predictor::ModelSource;
use lite_rs::{Predictor, PredictorConfig, PredictorError};

#[test]
fn saved_model_rebuilds_to_the_same_outputs() {
    let params = MlpParams::random(41);
    let mut original = build_mlp(&params, &[]);
    let x = random_input(42, 3);
    let expected = run_once(&mut original, &x);

    for model_type in [ModelType::Json, ModelType::Bincode] {
        let dir = temp_dir("save_roundtrip");
        original.save_model(&dir, model_type, false).unwrap();
        assert!(dir.join(model_type.program_file()).is_file());
        assert!(dir.join(PARAMS_FILE).is_file());
        assert!(!dir.join(OPS_LIST).exists());

        let config = PredictorConfig::from_dir(&dir).model_type(model_type);
        let mut reloaded = Predictor::from_config(&config).unwrap();
        assert_eq!(op_types(&reloaded), op_types(&original));
        assert_close(&run_once(&mut reloaded, &x), &expected);
        fs::remove_dir_all(&dir).unwrap();
    }
}

#[test]
fn buffers_and_files_load_like_directories() {
    let params = MlpParams::random(43);
    let mut original = build_mlp(&params, &[]);
    let x = random_input(44, 2);
    let expected = run_once(&mut original, &x);

    let dir = temp_dir("buffers");
    original.save_model(&dir, ModelType::Json, false).unwrap();
    let program_path = dir.join(ModelType::Json.program_file());
    let params_path = dir.join(PARAMS_FILE);

    let files = PredictorConfig::new(ModelSource::Files {
        program: program_path.clone(),
        params: Some(params_path.clone()),
    });
    let mut from_files = Predictor::from_config(&files).unwrap();
    assert_close(&run_once(&mut from_files, &x), &expected);

    let buffer = PredictorConfig::new(ModelSource::Buffer {
        program: fs::read(&program_path).unwrap(),
        params: Some(fs::read(&params_path).unwrap()),
    });
    let mut from_buffer = Predictor::from_config(&buffer).unwrap();
    assert_close(&run_once(&mut from_buffer, &x), &expected);

    let loaded = model_io::load_from_dir(&dir, ModelType::Json).unwrap();
    let mut names: Vec<&str> = loaded.params.iter().map(|(n, _)| n.as_str()).collect();
    names.sort();
    assert_eq!(names, ["b1", "b2", "w1", "w2"]);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn record_info_writes_tailoring_lists() {
    let original = build_mlp(&MlpParams::random(45), &[]);
    let dir = temp_dir("tailoring");
    original.save_model(&dir, ModelType::Json, true).unwrap();

    let ops = fs::read_to_string(dir.join(OPS_LIST)).unwrap();
    assert!(ops.lines().any(|l| l == "fc"));
    assert!(ops.lines().any(|l| l == "softmax"));
    assert!(!ops.lines().any(|l| l == "mul"));
    assert!(fs::read_to_string(dir.join(OPS_SOURCE_LIST))
        .unwrap()
        .lines()
        .any(|l| l.ends_with("builtin.rs")));

    let kernels = fs::read_to_string(dir.join(KERNELS_LIST)).unwrap();
    assert!(kernels.lines().any(|l| l == "fc/def/host/float/nchw"));

    let info = TailoringInfo::read_from(&dir).unwrap();
    assert!(info.ops.contains("feed"));
    assert!(info.kernel_sources.iter().all(|s| s.ends_with("mod.rs")));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn corrupted_params_are_reported() {
    let original = build_mlp(&MlpParams::random(46), &[]);
    let dir = temp_dir("corrupt");
    original.save_model(&dir, ModelType::Bincode, false).unwrap();
    let params_path = dir.join(PARAMS_FILE);
    let mut bytes = fs::read(&params_path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    fs::write(&params_path, &bytes).unwrap();

    let config = PredictorConfig::from_dir(&dir).model_type(ModelType::Bincode);
    let err = Predictor::from_config(&config).err().unwrap();
    assert!(matches!(
        err,
        PredictorError::ModelIo(ModelIoError::DigestMismatch)
    ));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_directory_is_an_io_error() {
    let config = PredictorConfig::from_dir(temp_dir("missing"));
    let err = Predictor::from_config(&config).err().unwrap();
    assert!(matches!(err, PredictorError::ModelIo(ModelIoError::Io { .. })));
}

#[test]
fn json_config_file_drives_a_build() {
    let params = MlpParams::random(47);
    let mut original = build_mlp(&params, &[]);
    let x = random_input(48, 1);
    let expected = run_once(&mut original, &x);

    let dir = temp_dir("config_file");
    original.save_model(&dir, ModelType::Json, false).unwrap();
    let config_path = dir.join("predictor.json");
    let config = serde_json::json!({
        "model": { "dir": dir },
        "valid_places": [ { "target": "host", "precision": "float", "layout": "nchw" } ],
        "passes": ["fc_fuse_pass"],
        "threads": 2
    });
    fs::write(&config_path, serde_json::to_vec(&config).unwrap()).unwrap();

    let config = PredictorConfig::from_json_file(&config_path).unwrap();
    assert_eq!(config.threads, Some(2));
    let mut predictor = Predictor::from_config(&config).unwrap();
    assert_close(&run_once(&mut predictor, &x), &expected);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn bincode_length_prefixes_are_bounded_by_the_buffer() {
    let desc = common::mlp_program();
    let mut bytes = ModelType::Bincode.encode(&desc).unwrap();
    assert_eq!(ModelType::Bincode.decode(&bytes).unwrap(), desc);

    // The leading u64 is the length of the format version string.
    for claimed in [u64::MAX / 2, bytes.len() as u64 + 1] {
        bytes[..8].copy_from_slice(&claimed.to_le_bytes());
        match ModelType::Bincode.decode(&bytes) {
            Err(ModelIoError::Bincode(err)) => {
                assert!(matches!(*err, bincode::ErrorKind::SizeLimit), "{err}")
            }
            other => panic!("expected a size limit error, got {other:?}"),
        }
    }
}
