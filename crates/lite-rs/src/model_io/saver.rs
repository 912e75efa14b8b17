use super::{encode_params, ModelIoError, ModelType, TailoringInfo, PARAMS_FILE};
use crate::graph::ProgramDesc;
use crate::tensor::Tensor;
use std::fs;
use std::path::Path;

/// Writes the program and its parameters into `dir`, creating it if needed.
/// Tailoring lists are written when `tailoring` is given.
pub fn save_model<'a, I>(
    dir: &Path,
    model_type: ModelType,
    desc: &ProgramDesc,
    params: I,
    tailoring: Option<&TailoringInfo>,
) -> Result<(), ModelIoError>
where
    I: IntoIterator<Item = (&'a str, &'a Tensor)>,
{
    fs::create_dir_all(dir).map_err(|err| ModelIoError::io(dir, err))?;

    let program_path = dir.join(model_type.program_file());
    let program = model_type.encode(desc)?;
    fs::write(&program_path, program).map_err(|err| ModelIoError::io(&program_path, err))?;

    let params_path = dir.join(PARAMS_FILE);
    let params = encode_params(params)?;
    fs::write(&params_path, params).map_err(|err| ModelIoError::io(&params_path, err))?;

    if let Some(info) = tailoring {
        info.write_to(dir)?;
    }
    log::debug!("saved {model_type:?} model to {}", dir.display());
    Ok(())
}
