//! Host device and context.
//!
//! A [`HostContext`] owns a rayon pool sized from the requested work thread
//! count, capped by the device's max thread count and by the context's power
//! mode, which starts at the device's.
//! Allocations are plain host memory, optionally bounded by a limit supplied
//! through [`HostConfig`].

use lite_rs::device::{
    Capabilities, Context, Device, DeviceError, DeviceResult, MemoryBlock, ParamKey, ParamOwner,
    ParamValue, PowerMode, TargetConfig,
};
use lite_rs::place::TargetType;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

const DEFAULT_ALIGNMENT: usize = 64;

/// Target configuration understood by host contexts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostConfig {
    /// Upper bound for bytes outstanding through `allocate`.
    pub memory_limit: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct DeviceState {
    max_threads: usize,
    power_mode: PowerMode,
}

pub struct HostDevice {
    target: TargetType,
    name: String,
    caps: Capabilities,
    state: Mutex<DeviceState>,
}

fn to_i32(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn positive(key: ParamKey, value: i32) -> DeviceResult<usize> {
    usize::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| DeviceError::InvalidParameter(format!("{key} must be positive, got {value}")))
}

fn parse_power_mode(code: i32) -> DeviceResult<PowerMode> {
    PowerMode::from_code(code)
        .ok_or_else(|| DeviceError::InvalidParameter(format!("unknown power mode {code}")))
}

impl HostDevice {
    pub fn new(target: TargetType) -> Self {
        Self::with_capabilities(target, *Capabilities::host())
    }

    /// Device reporting `caps` instead of the detected host capabilities.
    pub fn with_capabilities(target: TargetType, caps: Capabilities) -> Self {
        HostDevice {
            target,
            name: format!("host-cpu-{target}"),
            caps,
            state: Mutex::new(DeviceState {
                max_threads: caps.cores.max(1),
                power_mode: PowerMode::default(),
            }),
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn state(&self) -> DeviceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn power_mode(&self) -> PowerMode {
        self.state().power_mode
    }

    /// Threads a context may use when it asks for `requested`.
    pub fn effective_threads(&self, requested: usize) -> usize {
        self.threads_in_mode(requested, self.power_mode())
    }

    /// Like [`HostDevice::effective_threads`], with `mode` in place of the
    /// device's power mode.
    pub fn threads_in_mode(&self, requested: usize, mode: PowerMode) -> usize {
        let cores = self.caps.cores.max(1);
        let mode_cap = match mode {
            PowerMode::High | PowerMode::Low => (cores / 2).max(1),
            PowerMode::Full | PowerMode::NoBind => cores,
        };
        requested.max(1).min(self.state().max_threads).min(mode_cap)
    }
}

impl Device for HostDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> TargetType {
        self.target
    }

    fn get_param(&self, key: ParamKey) -> DeviceResult<ParamValue> {
        key.check_get(ParamOwner::Device)?;
        let state = self.state();
        let caps = &self.caps;
        let value = match key {
            ParamKey::DeviceMaxThreadNum => ParamValue::I32(to_i32(state.max_threads)),
            ParamKey::DevicePowerMode => ParamValue::I32(state.power_mode.code()),
            ParamKey::DeviceArch => ParamValue::I32(caps.arch.code()),
            ParamKey::DeviceSupportArmFp16 => ParamValue::Bool(caps.arm_fp16),
            ParamKey::DeviceSupportArmBf16 => ParamValue::Bool(caps.arm_bf16),
            ParamKey::DeviceSupportArmDotprod => ParamValue::Bool(caps.arm_dotprod),
            ParamKey::DeviceSupportArmSve2 => ParamValue::Bool(caps.arm_sve2),
            ParamKey::DeviceSupportArmSve2I8mm => ParamValue::Bool(caps.arm_sve2_i8mm),
            ParamKey::DeviceSupportArmSve2F32mm => ParamValue::Bool(caps.arm_sve2_f32mm),
            other => {
                return Err(DeviceError::InvalidParameter(format!(
                    "{other} is not a device parameter"
                )))
            }
        };
        Ok(value)
    }

    fn set_param(&self, key: ParamKey, value: ParamValue) -> DeviceResult<()> {
        key.check_set(ParamOwner::Device, &value)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match key {
            ParamKey::DeviceMaxThreadNum => {
                state.max_threads = positive(key, value.as_i32()?)?;
            }
            ParamKey::DevicePowerMode => {
                state.power_mode = parse_power_mode(value.as_i32()?)?;
            }
            other => {
                return Err(DeviceError::InvalidParameter(format!(
                    "{other} cannot be set on a device"
                )))
            }
        }
        Ok(())
    }

    fn create_context(self: Arc<Self>) -> DeviceResult<Box<dyn Context>> {
        Ok(Box::new(HostContext::new(self)?))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct EnabledSets {
    arm_fp16: bool,
    arm_bf16: bool,
    arm_dotprod: bool,
    arm_sve2: bool,
    arm_sve2_i8mm: bool,
    arm_sve2_f32mm: bool,
}

pub struct HostContext {
    device: Arc<HostDevice>,
    caps: Capabilities,
    requested_threads: usize,
    power_mode: PowerMode,
    threads: usize,
    pool: Option<rayon::ThreadPool>,
    enabled: EnabledSets,
    workspace_data: usize,
    workspace_size: usize,
    allocated: usize,
    memory_limit: Option<usize>,
}

impl HostContext {
    pub fn new(device: Arc<HostDevice>) -> DeviceResult<Self> {
        let caps = device.caps;
        let power_mode = device.power_mode();
        let mut ctx = HostContext {
            device,
            caps,
            requested_threads: 1,
            power_mode,
            threads: 1,
            pool: None,
            enabled: EnabledSets::default(),
            workspace_data: 0,
            workspace_size: 0,
            allocated: 0,
            memory_limit: None,
        };
        ctx.rebuild_pool()?;
        Ok(ctx)
    }

    /// Worker threads kernels of this context run on.
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }

    fn rebuild_pool(&mut self) -> DeviceResult<()> {
        let threads = self
            .device
            .threads_in_mode(self.requested_threads, self.power_mode);
        if threads == self.threads && (threads == 1) == self.pool.is_none() {
            return Ok(());
        }
        self.pool = if threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("lite-rs-host-{i}"))
                .build()
                .map_err(|err| DeviceError::FeatureNotSupported(format!("thread pool: {err}")))?;
            Some(pool)
        } else {
            None
        };
        self.threads = threads;
        log::debug!("host context uses {threads} worker thread(s)");
        Ok(())
    }

    fn enable(&mut self, key: ParamKey, on: bool) -> DeviceResult<()> {
        let caps = &self.caps;
        let (supported, slot) = match key {
            ParamKey::ContextEnableArmFp16 => (caps.arm_fp16, &mut self.enabled.arm_fp16),
            ParamKey::ContextEnableArmBf16 => (caps.arm_bf16, &mut self.enabled.arm_bf16),
            ParamKey::ContextEnableArmDotprod => (caps.arm_dotprod, &mut self.enabled.arm_dotprod),
            ParamKey::ContextEnableArmSve2 => (caps.arm_sve2, &mut self.enabled.arm_sve2),
            ParamKey::ContextEnableArmSve2I8mm => {
                (caps.arm_sve2_i8mm, &mut self.enabled.arm_sve2_i8mm)
            }
            ParamKey::ContextEnableArmSve2F32mm => {
                (caps.arm_sve2_f32mm, &mut self.enabled.arm_sve2_f32mm)
            }
            other => {
                return Err(DeviceError::InvalidParameter(format!(
                    "{other} is not an instruction-set switch"
                )))
            }
        };
        if on && !supported {
            return Err(DeviceError::FeatureNotSupported(format!(
                "{key}: the host CPU lacks this extension"
            )));
        }
        *slot = on;
        Ok(())
    }

    fn enabled(&self, key: ParamKey) -> bool {
        match key {
            ParamKey::ContextEnableArmFp16 => self.enabled.arm_fp16,
            ParamKey::ContextEnableArmBf16 => self.enabled.arm_bf16,
            ParamKey::ContextEnableArmDotprod => self.enabled.arm_dotprod,
            ParamKey::ContextEnableArmSve2 => self.enabled.arm_sve2,
            ParamKey::ContextEnableArmSve2I8mm => self.enabled.arm_sve2_i8mm,
            ParamKey::ContextEnableArmSve2F32mm => self.enabled.arm_sve2_f32mm,
            _ => false,
        }
    }
}

impl Context for HostContext {
    fn target(&self) -> TargetType {
        self.device.target
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn get_param(&self, key: ParamKey) -> DeviceResult<ParamValue> {
        key.check_get(ParamOwner::Context)?;
        let value = match key {
            ParamKey::ContextWorkThreadNum => ParamValue::I32(to_i32(self.threads)),
            ParamKey::ContextPowerMode => ParamValue::I32(self.power_mode.code()),
            ParamKey::ContextWorkspaceData => ParamValue::Ptr(self.workspace_data),
            ParamKey::ContextWorkspaceSize => ParamValue::Size(self.workspace_size),
            other => ParamValue::Bool(self.enabled(other)),
        };
        Ok(value)
    }

    fn set_param(&mut self, key: ParamKey, value: ParamValue) -> DeviceResult<()> {
        key.check_set(ParamOwner::Context, &value)?;
        match key {
            ParamKey::ContextWorkThreadNum => {
                self.requested_threads = positive(key, value.as_i32()?)?;
                self.rebuild_pool()
            }
            ParamKey::ContextPowerMode => {
                self.power_mode = parse_power_mode(value.as_i32()?)?;
                self.rebuild_pool()
            }
            ParamKey::ContextWorkspaceData => {
                self.workspace_data = value.as_ptr()?;
                Ok(())
            }
            ParamKey::ContextWorkspaceSize => {
                self.workspace_size = value.as_size()?;
                Ok(())
            }
            other => self.enable(other, value.as_bool()?),
        }
    }

    fn allocate(&mut self, size: usize) -> DeviceResult<MemoryBlock> {
        self.allocate_aligned(size, DEFAULT_ALIGNMENT)
    }

    fn allocate_aligned(&mut self, size: usize, alignment: usize) -> DeviceResult<MemoryBlock> {
        if let Some(limit) = self.memory_limit {
            let available = limit.saturating_sub(self.allocated);
            if size > available {
                return Err(DeviceError::OutOfMemory {
                    requested: size,
                    available,
                });
            }
        }
        let block = MemoryBlock::host(size, alignment)?;
        self.allocated += block.len();
        Ok(block)
    }

    fn free(&mut self, block: MemoryBlock) {
        self.allocated = self.allocated.saturating_sub(block.len());
    }

    fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    fn configure(&mut self, config: &TargetConfig) -> DeviceResult<()> {
        let config = config.downcast_ref::<HostConfig>().ok_or_else(|| {
            DeviceError::InvalidParameter("host contexts expect a HostConfig".to_string())
        })?;
        self.memory_limit = config.memory_limit;
        Ok(())
    }

    fn thread_pool(&self) -> Option<&rayon::ThreadPool> {
        self.pool.as_ref()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_mode_halves_the_thread_cap() {
        let mut caps = Capabilities::none(8);
        caps.arm_fp16 = true;
        let device = HostDevice::with_capabilities(TargetType::Host, caps);
        assert_eq!(device.effective_threads(16), 8);
        device
            .set_param(ParamKey::DevicePowerMode, ParamValue::I32(PowerMode::High.code()))
            .unwrap();
        assert_eq!(device.effective_threads(16), 4);
        device
            .set_param(ParamKey::DeviceMaxThreadNum, ParamValue::I32(2))
            .unwrap();
        assert_eq!(device.effective_threads(16), 2);
        assert_eq!(device.effective_threads(0), 1);
    }

    #[test]
    fn context_power_mode_leaves_the_device_alone() {
        let device = Arc::new(HostDevice::with_capabilities(
            TargetType::Host,
            Capabilities::none(8),
        ));
        let mut ctx = HostContext::new(Arc::clone(&device)).unwrap();
        ctx.set_param(ParamKey::ContextWorkThreadNum, ParamValue::I32(8))
            .unwrap();
        assert_eq!(ctx.threads(), 8);

        ctx.set_param(ParamKey::ContextPowerMode, ParamValue::I32(PowerMode::Low.code()))
            .unwrap();
        assert_eq!(ctx.threads(), 4);
        assert_eq!(device.power_mode(), PowerMode::default());
        assert_eq!(device.effective_threads(8), 8);

        let other = HostContext::new(Arc::clone(&device)).unwrap();
        assert_eq!(
            other.get_param(ParamKey::ContextPowerMode).unwrap(),
            ParamValue::I32(PowerMode::default().code())
        );
        assert!(ctx
            .set_param(ParamKey::ContextPowerMode, ParamValue::I32(42))
            .is_err());
    }

    #[test]
    fn enabling_a_missing_extension_is_unsupported() {
        let device = Arc::new(HostDevice::with_capabilities(
            TargetType::Host,
            Capabilities::none(2),
        ));
        let mut ctx = HostContext::new(device).unwrap();
        let err = ctx
            .set_param(ParamKey::ContextEnableArmDotprod, ParamValue::Bool(true))
            .unwrap_err();
        assert!(matches!(err, DeviceError::FeatureNotSupported(_)));
        ctx.set_param(ParamKey::ContextEnableArmDotprod, ParamValue::Bool(false))
            .unwrap();
    }
}
