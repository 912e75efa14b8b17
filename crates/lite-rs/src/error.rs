//! Error types for building and running programs.

use crate::device::DeviceError;
use crate::graph::GraphError;
use crate::model_io::ModelIoError;
use crate::tensor::DType;
use thiserror::Error;

/// Failure while turning a program descriptor into a runnable plan.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("malformed program: {0}")]
    Graph(#[from] GraphError),
    #[error("valid place list is empty")]
    NoValidPlaces,
    #[error("predictor has no program; build it first")]
    NotConfigured,
    #[error("unknown optimizer pass `{0}`")]
    UnknownPass(String),
    #[error("type inference failed for op `{op_type}` (block {block}, op {index}): {message}")]
    TypeInference {
        block: usize,
        index: usize,
        op_type: String,
        message: String,
    },
    #[error(
        "no kernel for op `{op_type}` (block {block}, op {index}) matches the valid places [{requested}]; registered: [{registered}]"
    )]
    NoKernel {
        block: usize,
        index: usize,
        op_type: String,
        requested: String,
        registered: String,
    },
    #[error("persistable variable `{0}` has no value in the root scope")]
    MissingParameter(String),
    #[error("kernel `{0}` bound by the program is not registered")]
    KernelNotRegistered(String),
    #[error("op `{op_type}` references variable `{name}`, which is not in the execution scope")]
    UnboundVariable { op_type: String, name: String },
    #[error("preparing kernel for op `{op_type}` failed: {source}")]
    KernelPrepare {
        op_type: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("device setup failed: {0}")]
    Device(#[from] DeviceError),
    #[error("model loading failed: {0}")]
    ModelIo(#[from] ModelIoError),
    #[error("optimizer pass `{pass}` broke an invariant: {message}")]
    Internal { pass: String, message: String },
}

/// Input tensor that does not match what the program was built for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputValidationError {
    #[error("input `{name}` has not been set")]
    NotSet { name: String },
    #[error("input `{name}` expects element type {expected}, got {actual}")]
    PrecisionMismatch {
        name: String,
        expected: DType,
        actual: DType,
    },
    #[error("input `{name}` expects shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        actual: Vec<usize>,
    },
}

/// Failure during a single execution of a runtime program.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("invalid input: {0}")]
    InputValidation(#[from] InputValidationError),
    #[error("instruction {index} (`{op_type}`) failed: {source}")]
    Kernel {
        index: usize,
        op_type: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("instruction {index} (`{op_type}`) hit a device error: {source}")]
    Device {
        index: usize,
        op_type: String,
        #[source]
        source: DeviceError,
    },
}

impl RunError {
    /// Wraps a kernel failure, surfacing device errors as their own variant.
    pub fn from_kernel(index: usize, op_type: &str, err: anyhow::Error) -> Self {
        match err.downcast::<DeviceError>() {
            Ok(source) => RunError::Device {
                index,
                op_type: op_type.to_string(),
                source,
            },
            Err(source) => RunError::Kernel {
                index,
                op_type: op_type.to_string(),
                source,
            },
        }
    }

    /// Op type of the failing instruction, when the failure came from one.
    pub fn op_type(&self) -> Option<&str> {
        match self {
            RunError::Kernel { op_type, .. } | RunError::Device { op_type, .. } => Some(op_type),
            _ => None,
        }
    }
}
