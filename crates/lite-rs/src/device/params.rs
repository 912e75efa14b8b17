//! Typed parameter protocol shared by devices and contexts.

use super::error::{DeviceError, DeviceResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling policy for worker threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    /// Bind to big cores.
    High,
    /// Bind to little cores.
    Low,
    /// Use every core.
    Full,
    /// Leave thread placement to the OS.
    #[default]
    NoBind,
}

impl PowerMode {
    pub fn code(self) -> i32 {
        match self {
            PowerMode::High => 0,
            PowerMode::Low => 1,
            PowerMode::Full => 2,
            PowerMode::NoBind => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(PowerMode::High),
            1 => Some(PowerMode::Low),
            2 => Some(PowerMode::Full),
            3 => Some(PowerMode::NoBind),
            _ => None,
        }
    }
}

/// CPU micro-architecture identifiers reported through [`ParamKey::DeviceArch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuArch {
    Unknown,
    CortexA35,
    CortexA53,
    CortexA55,
    CortexA57,
    CortexA72,
    CortexA73,
    CortexA75,
    CortexA76,
    CortexA77,
    CortexA78,
    CortexX1,
    CortexX2,
    CortexA510,
    CortexA710,
    Kryo485Gold,
    Kryo485Silver,
    Apple,
    X86,
}

impl CpuArch {
    pub fn code(self) -> i32 {
        match self {
            CpuArch::Unknown => -1,
            CpuArch::CortexA35 => 35,
            CpuArch::CortexA53 => 53,
            CpuArch::CortexA55 => 55,
            CpuArch::CortexA57 => 57,
            CpuArch::CortexA72 => 72,
            CpuArch::CortexA73 => 73,
            CpuArch::CortexA75 => 75,
            CpuArch::CortexA76 => 76,
            CpuArch::CortexA77 => 77,
            CpuArch::CortexA78 => 78,
            CpuArch::CortexX1 => 79,
            CpuArch::CortexX2 => 80,
            CpuArch::CortexA510 => 81,
            CpuArch::CortexA710 => 82,
            CpuArch::Kryo485Gold => 400,
            CpuArch::Kryo485Silver => 401,
            CpuArch::Apple => 1000,
            CpuArch::X86 => 2000,
        }
    }
}

/// Value type a parameter key carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    I32,
    I64,
    F32,
    F64,
    Size,
    Ptr,
}

/// Layer that answers a parameter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOwner {
    Device,
    Context,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    DeviceMaxThreadNum,
    DevicePowerMode,
    DeviceArch,
    DeviceSupportArmFp16,
    DeviceSupportArmBf16,
    DeviceSupportArmDotprod,
    DeviceSupportArmSve2,
    DeviceSupportArmSve2I8mm,
    DeviceSupportArmSve2F32mm,
    ContextWorkThreadNum,
    /// Power mode of one context. Starts at the device's mode.
    ContextPowerMode,
    ContextEnableArmFp16,
    ContextEnableArmBf16,
    ContextEnableArmDotprod,
    ContextEnableArmSve2,
    ContextEnableArmSve2I8mm,
    ContextEnableArmSve2F32mm,
    ContextWorkspaceData,
    ContextWorkspaceSize,
}

impl ParamKey {
    pub fn value_type(self) -> ParamType {
        use ParamKey::*;
        match self {
            DeviceMaxThreadNum
            | DevicePowerMode
            | DeviceArch
            | ContextWorkThreadNum
            | ContextPowerMode => ParamType::I32,
            DeviceSupportArmFp16
            | DeviceSupportArmBf16
            | DeviceSupportArmDotprod
            | DeviceSupportArmSve2
            | DeviceSupportArmSve2I8mm
            | DeviceSupportArmSve2F32mm
            | ContextEnableArmFp16
            | ContextEnableArmBf16
            | ContextEnableArmDotprod
            | ContextEnableArmSve2
            | ContextEnableArmSve2I8mm
            | ContextEnableArmSve2F32mm => ParamType::Bool,
            ContextWorkspaceData => ParamType::Ptr,
            ContextWorkspaceSize => ParamType::Size,
        }
    }

    pub fn owner(self) -> ParamOwner {
        use ParamKey::*;
        match self {
            DeviceMaxThreadNum
            | DevicePowerMode
            | DeviceArch
            | DeviceSupportArmFp16
            | DeviceSupportArmBf16
            | DeviceSupportArmDotprod
            | DeviceSupportArmSve2
            | DeviceSupportArmSve2I8mm
            | DeviceSupportArmSve2F32mm => ParamOwner::Device,
            _ => ParamOwner::Context,
        }
    }

    pub fn access(self) -> Access {
        use ParamKey::*;
        match self {
            DeviceArch
            | DeviceSupportArmFp16
            | DeviceSupportArmBf16
            | DeviceSupportArmDotprod
            | DeviceSupportArmSve2
            | DeviceSupportArmSve2I8mm
            | DeviceSupportArmSve2F32mm => Access::ReadOnly,
            _ => Access::ReadWrite,
        }
    }

    /// Validates a read of this key against the answering layer.
    pub fn check_get(self, owner: ParamOwner) -> DeviceResult<()> {
        if self.owner() != owner {
            return Err(DeviceError::InvalidParameter(format!(
                "{self} belongs to the {:?} layer, not the {owner:?} layer",
                self.owner()
            )));
        }
        Ok(())
    }

    /// Validates a write of `value` to this key against the answering layer.
    pub fn check_set(self, owner: ParamOwner, value: &ParamValue) -> DeviceResult<()> {
        self.check_get(owner)?;
        if self.access() == Access::ReadOnly {
            return Err(DeviceError::InvalidParameter(format!("{self} is read-only")));
        }
        if value.param_type() != self.value_type() {
            return Err(DeviceError::InvalidParameter(format!(
                "{self} expects a {:?} value, got {:?}",
                self.value_type(),
                value.param_type()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ParamKey::*;
        f.write_str(match self {
            DeviceMaxThreadNum => "DEVICE_MAX_THREAD_NUM",
            DevicePowerMode => "DEVICE_POWER_MODE",
            DeviceArch => "DEVICE_ARCH",
            DeviceSupportArmFp16 => "DEVICE_SUPPORT_ARM_FP16",
            DeviceSupportArmBf16 => "DEVICE_SUPPORT_ARM_BF16",
            DeviceSupportArmDotprod => "DEVICE_SUPPORT_ARM_DOTPROD",
            DeviceSupportArmSve2 => "DEVICE_SUPPORT_ARM_SVE2",
            DeviceSupportArmSve2I8mm => "DEVICE_SUPPORT_ARM_SVE2_I8MM",
            DeviceSupportArmSve2F32mm => "DEVICE_SUPPORT_ARM_SVE2_F32MM",
            ContextWorkThreadNum => "CONTEXT_WORK_THREAD_NUM",
            ContextPowerMode => "CONTEXT_POWER_MODE",
            ContextEnableArmFp16 => "CONTEXT_ENABLE_ARM_FP16",
            ContextEnableArmBf16 => "CONTEXT_ENABLE_ARM_BF16",
            ContextEnableArmDotprod => "CONTEXT_ENABLE_ARM_DOTPROD",
            ContextEnableArmSve2 => "CONTEXT_ENABLE_ARM_SVE2",
            ContextEnableArmSve2I8mm => "CONTEXT_ENABLE_ARM_SVE2_I8MM",
            ContextEnableArmSve2F32mm => "CONTEXT_ENABLE_ARM_SVE2_F32MM",
            ContextWorkspaceData => "CONTEXT_WORKSPACE_DATA",
            ContextWorkspaceSize => "CONTEXT_WORKSPACE_SIZE",
        })
    }
}

/// Tagged parameter value. Pointers are carried as addresses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Size(usize),
    Ptr(usize),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Bool(_) => ParamType::Bool,
            ParamValue::I32(_) => ParamType::I32,
            ParamValue::I64(_) => ParamType::I64,
            ParamValue::F32(_) => ParamType::F32,
            ParamValue::F64(_) => ParamType::F64,
            ParamValue::Size(_) => ParamType::Size,
            ParamValue::Ptr(_) => ParamType::Ptr,
        }
    }

    pub fn as_bool(&self) -> DeviceResult<bool> {
        match self {
            ParamValue::Bool(v) => Ok(*v),
            other => Err(type_mismatch(ParamType::Bool, other)),
        }
    }

    pub fn as_i32(&self) -> DeviceResult<i32> {
        match self {
            ParamValue::I32(v) => Ok(*v),
            other => Err(type_mismatch(ParamType::I32, other)),
        }
    }

    pub fn as_size(&self) -> DeviceResult<usize> {
        match self {
            ParamValue::Size(v) => Ok(*v),
            other => Err(type_mismatch(ParamType::Size, other)),
        }
    }

    pub fn as_ptr(&self) -> DeviceResult<usize> {
        match self {
            ParamValue::Ptr(v) => Ok(*v),
            other => Err(type_mismatch(ParamType::Ptr, other)),
        }
    }
}

fn type_mismatch(expected: ParamType, got: &ParamValue) -> DeviceError {
    DeviceError::InvalidParameter(format!(
        "expected a {expected:?} value, got {:?}",
        got.param_type()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_flags_reject_writes() {
        let err = ParamKey::DeviceSupportArmFp16
            .check_set(ParamOwner::Device, &ParamValue::Bool(true))
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidParameter(_)));
    }

    #[test]
    fn writes_are_type_checked() {
        assert!(ParamKey::ContextWorkThreadNum
            .check_set(ParamOwner::Context, &ParamValue::I32(2))
            .is_ok());
        assert!(ParamKey::ContextWorkThreadNum
            .check_set(ParamOwner::Context, &ParamValue::Size(2))
            .is_err());
    }

    #[test]
    fn keys_are_owned_by_one_layer() {
        assert!(ParamKey::DevicePowerMode.check_get(ParamOwner::Context).is_err());
        assert!(ParamKey::ContextPowerMode.check_get(ParamOwner::Device).is_err());
        assert!(ParamKey::ContextPowerMode
            .check_set(ParamOwner::Context, &ParamValue::I32(PowerMode::Low.code()))
            .is_ok());
        assert!(ParamKey::ContextWorkspaceSize.check_get(ParamOwner::Context).is_ok());
    }

    #[test]
    fn power_mode_codes_round_trip() {
        for mode in [PowerMode::High, PowerMode::Low, PowerMode::Full, PowerMode::NoBind] {
            assert_eq!(PowerMode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(PowerMode::from_code(9), None);
    }
}
