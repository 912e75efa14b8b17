//! Execution places: the (target, precision, layout) triple kernels are keyed by.

use crate::tensor::DType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Host,
    X86,
    Arm,
    OpenCl,
    Metal,
    Xpu,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionType {
    Float,
    Fp16,
    Int8,
    Int32,
    Int64,
    Bool,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLayout {
    Nchw,
    Nhwc,
    Any,
}

impl PrecisionType {
    /// Precision a tensor of `dtype` is processed at.
    pub fn from_dtype(dtype: DType) -> Self {
        match dtype {
            DType::F32 => PrecisionType::Float,
            DType::F16 => PrecisionType::Fp16,
            DType::I8 => PrecisionType::Int8,
            DType::I32 => PrecisionType::Int32,
            DType::I64 => PrecisionType::Int64,
            DType::Bool => PrecisionType::Bool,
        }
    }
}

/// Hardware target, numeric precision, and memory layout of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Place {
    pub target: TargetType,
    pub precision: PrecisionType,
    pub layout: DataLayout,
}

impl Place {
    pub const fn new(target: TargetType, precision: PrecisionType, layout: DataLayout) -> Self {
        Place {
            target,
            precision,
            layout,
        }
    }

    /// `(Host, Float, Nchw)`, the baseline place every host kernel set covers.
    pub const fn host_float() -> Self {
        Place::new(TargetType::Host, PrecisionType::Float, DataLayout::Nchw)
    }

    /// `(target, Any, Any)`, used by data-movement kernels.
    pub const fn any_of(target: TargetType) -> Self {
        Place::new(target, PrecisionType::Any, DataLayout::Any)
    }

    /// Component-wise equality, `Any` on either side matching everything.
    pub fn is_compatible(&self, other: &Place) -> bool {
        fn component<T: PartialEq>(a: T, b: T, any: T) -> bool {
            a == b || a == any || b == any
        }
        component(self.target, other.target, TargetType::Any)
            && component(self.precision, other.precision, PrecisionType::Any)
            && component(self.layout, other.layout, DataLayout::Any)
    }

    pub fn is_exact(&self, other: &Place) -> bool {
        self == other
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetType::Host => "host",
            TargetType::X86 => "x86",
            TargetType::Arm => "arm",
            TargetType::OpenCl => "opencl",
            TargetType::Metal => "metal",
            TargetType::Xpu => "xpu",
            TargetType::Any => "any",
        })
    }
}

impl fmt::Display for PrecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrecisionType::Float => "float",
            PrecisionType::Fp16 => "fp16",
            PrecisionType::Int8 => "int8",
            PrecisionType::Int32 => "int32",
            PrecisionType::Int64 => "int64",
            PrecisionType::Bool => "bool",
            PrecisionType::Any => "any",
        })
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataLayout::Nchw => "nchw",
            DataLayout::Nhwc => "nhwc",
            DataLayout::Any => "any",
        })
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.target, self.precision, self.layout)
    }
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(TargetType::Host),
            "x86" => Ok(TargetType::X86),
            "arm" => Ok(TargetType::Arm),
            "opencl" => Ok(TargetType::OpenCl),
            "metal" => Ok(TargetType::Metal),
            "xpu" => Ok(TargetType::Xpu),
            "any" => Ok(TargetType::Any),
            other => Err(format!("unknown target `{other}`")),
        }
    }
}

impl FromStr for PrecisionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float" | "fp32" => Ok(PrecisionType::Float),
            "fp16" => Ok(PrecisionType::Fp16),
            "int8" => Ok(PrecisionType::Int8),
            "int32" => Ok(PrecisionType::Int32),
            "int64" => Ok(PrecisionType::Int64),
            "bool" => Ok(PrecisionType::Bool),
            "any" => Ok(PrecisionType::Any),
            other => Err(format!("unknown precision `{other}`")),
        }
    }
}

impl FromStr for DataLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nchw" => Ok(DataLayout::Nchw),
            "nhwc" => Ok(DataLayout::Nhwc),
            "any" => Ok(DataLayout::Any),
            other => Err(format!("unknown layout `{other}`")),
        }
    }
}

/// Parses `target/precision/layout`, the same form [`Place`] displays as.
impl FromStr for Place {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [target, precision, layout] => Ok(Place::new(
                target.parse()?,
                precision.parse()?,
                layout.parse()?,
            )),
            _ => Err(format!("place `{s}` is not of the form target/precision/layout")),
        }
    }
}
