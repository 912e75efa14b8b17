//! Model persistence: the optimized program descriptor, the parameter file,
//! and the tailoring lists written next to them.

mod loader;
mod params;
mod saver;
mod tailoring;

pub use loader::{load_from_buffers, load_from_dir, load_from_files, LoadedModel};
pub use params::{decode_params, encode_params, PARAMS_MAGIC, PARAMS_VERSION};
pub use saver::save_model;
pub use tailoring::{
    TailoringInfo, KERNELS_LIST, KERNELS_SOURCE_LIST, OPS_LIST, OPS_SOURCE_LIST,
};

use crate::graph::{ProgramDesc, PROGRAM_FORMAT_VERSION};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const PARAMS_FILE: &str = "params.bin";

/// Encoding of the program descriptor file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Json,
    Bincode,
}

/// Same encoding as `bincode::deserialize`, but no length prefix may claim
/// more bytes than the buffer holds.
fn decode_bincode(bytes: &[u8]) -> bincode::Result<ProgramDesc> {
    let limit = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    bincode::options()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(limit)
        .deserialize(bytes)
}

impl ModelType {
    pub fn program_file(self) -> &'static str {
        match self {
            ModelType::Json => "model.json",
            ModelType::Bincode => "model.bin",
        }
    }

    pub fn encode(self, desc: &ProgramDesc) -> Result<Vec<u8>, ModelIoError> {
        match self {
            ModelType::Json => Ok(serde_json::to_vec_pretty(desc)?),
            ModelType::Bincode => Ok(bincode::serialize(desc)?),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<ProgramDesc, ModelIoError> {
        let desc: ProgramDesc = match self {
            ModelType::Json => serde_json::from_slice(bytes)?,
            ModelType::Bincode => decode_bincode(bytes)?,
        };
        if desc.format_version != PROGRAM_FORMAT_VERSION {
            return Err(ModelIoError::FormatVersion {
                expected: PROGRAM_FORMAT_VERSION.to_string(),
                found: desc.format_version,
            });
        }
        Ok(desc)
    }
}

#[derive(Debug, Error)]
pub enum ModelIoError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("parameter file has an invalid magic header")]
    BadMagic,
    #[error("unsupported parameter file version {0}")]
    UnsupportedVersion(u32),
    #[error("parameter file digest mismatch")]
    DigestMismatch,
    #[error("program format `{found}` is not `{expected}`")]
    FormatVersion { expected: String, found: String },
    #[error("malformed tensor record: {0}")]
    MalformedTensor(String),
}

impl ModelIoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModelIoError::Io {
            path: path.into(),
            source,
        }
    }
}
