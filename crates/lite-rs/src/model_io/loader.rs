use super::{decode_params, ModelIoError, ModelType, PARAMS_FILE};
use crate::graph::ProgramDesc;
use crate::tensor::Tensor;
use std::fs;
use std::path::Path;

/// A program descriptor with the parameter values stored alongside it.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub desc: ProgramDesc,
    pub params: Vec<(String, Tensor)>,
}

fn read(path: &Path) -> Result<Vec<u8>, ModelIoError> {
    fs::read(path).map_err(|err| ModelIoError::io(path, err))
}

/// Loads `model.json`/`model.bin` and `params.bin` from `dir`. A missing
/// parameter file means the program has no stored parameters.
pub fn load_from_dir(dir: &Path, model_type: ModelType) -> Result<LoadedModel, ModelIoError> {
    let program = read(&dir.join(model_type.program_file()))?;
    let params_path = dir.join(PARAMS_FILE);
    let params = if params_path.exists() {
        Some(read(&params_path)?)
    } else {
        None
    };
    load_from_buffers(&program, params.as_deref(), model_type)
}

pub fn load_from_files(
    program: &Path,
    params: Option<&Path>,
    model_type: ModelType,
) -> Result<LoadedModel, ModelIoError> {
    let program = read(program)?;
    let params = params.map(read).transpose()?;
    load_from_buffers(&program, params.as_deref(), model_type)
}

pub fn load_from_buffers(
    program: &[u8],
    params: Option<&[u8]>,
    model_type: ModelType,
) -> Result<LoadedModel, ModelIoError> {
    let desc = model_type.decode(program)?;
    let params = match params {
        Some(bytes) => decode_params(bytes)?,
        None => Vec::new(),
    };
    Ok(LoadedModel { desc, params })
}
