//! Enumerates the scalar element types a tensor payload can hold.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type shared by host tensors, variable descriptors, and kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit IEEE-754 float.
    F32,
    /// 16-bit IEEE-754 half float.
    F16,
    /// 8-bit signed integer, used by quantized weights.
    I8,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer, used for indices and lengths.
    I64,
    /// Boolean mask element.
    Bool,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 => 2,
            DType::I8 | DType::Bool => 1,
            DType::I64 => 8,
        }
    }

    /// Stable tag used by the parameter file format and the `cast` attributes.
    pub fn tag(self) -> u32 {
        match self {
            DType::F32 => 0,
            DType::F16 => 1,
            DType::I8 => 2,
            DType::I32 => 3,
            DType::I64 => 4,
            DType::Bool => 5,
        }
    }

    /// Reconstructs a `DType` from its serialized tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(DType::F32),
            1 => Some(DType::F16),
            2 => Some(DType::I8),
            3 => Some(DType::I32),
            4 => Some(DType::I64),
            5 => Some(DType::Bool),
            _ => None,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::I8 => "i8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::Bool => "bool",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::DType;

    #[test]
    fn tags_are_stable() {
        for dtype in [DType::F32, DType::F16, DType::I8, DType::I32, DType::I64, DType::Bool] {
            assert_eq!(DType::from_tag(dtype.tag()), Some(dtype));
        }
        assert_eq!(DType::from_tag(99), None);
    }
}
