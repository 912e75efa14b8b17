use std::fmt;
use thiserror::Error;

/// Status code of a device protocol call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    OutOfMemory,
    InvalidParameter,
    FeatureNotSupported,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Success => "success",
            Status::OutOfMemory => "out of memory",
            Status::InvalidParameter => "invalid parameter",
            Status::FeatureNotSupported => "feature not supported",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("out of memory: requested {requested} bytes with {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),
}

impl DeviceError {
    pub fn status(&self) -> Status {
        match self {
            DeviceError::OutOfMemory { .. } => Status::OutOfMemory,
            DeviceError::InvalidParameter(_) => Status::InvalidParameter,
            DeviceError::FeatureNotSupported(_) => Status::FeatureNotSupported,
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Collapses a protocol result into its status code.
pub fn status_of<T>(result: &DeviceResult<T>) -> Status {
    match result {
        Ok(_) => Status::Success,
        Err(err) => err.status(),
    }
}
