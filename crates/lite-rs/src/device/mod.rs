//! Device abstraction layer.
//!
//! A [`Device`] describes one hardware target and answers device-level
//! parameters. A [`Context`] is an execution environment created from a device
//! (thread pool, workspace, stream) that kernels run against. Contexts hold an
//! `Arc` to their device, so a context never outlives the device it came from.

pub mod capability;
pub mod error;
pub mod memory;
pub mod params;
pub mod registry;

pub use capability::Capabilities;
pub use error::{status_of, DeviceError, DeviceResult, Status};
pub use memory::MemoryBlock;
pub use params::{Access, CpuArch, ParamKey, ParamOwner, ParamType, ParamValue, PowerMode};

use crate::place::TargetType;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque per-target configuration applied to contexts on creation.
///
/// Each backend downcasts to the configuration type it understands.
pub type TargetConfig = Arc<dyn Any + Send + Sync>;

/// Backend-native queue or stream handed to a context.
#[derive(Clone)]
pub struct StreamHandle(pub Arc<dyn Any + Send + Sync>);

impl StreamHandle {
    pub fn new<T: Any + Send + Sync>(stream: T) -> Self {
        StreamHandle(Arc::new(stream))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamHandle(..)")
    }
}

pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    fn target(&self) -> TargetType;

    fn get_param(&self, key: ParamKey) -> DeviceResult<ParamValue>;

    fn set_param(&self, key: ParamKey, value: ParamValue) -> DeviceResult<()>;

    /// Creates a fresh execution context bound to this device.
    fn create_context(self: Arc<Self>) -> DeviceResult<Box<dyn Context>>;
}

pub trait Context: Send {
    fn target(&self) -> TargetType;

    /// Hardware capabilities, detected once and copied at context creation.
    fn capabilities(&self) -> &Capabilities;

    fn get_param(&self, key: ParamKey) -> DeviceResult<ParamValue>;

    fn set_param(&mut self, key: ParamKey, value: ParamValue) -> DeviceResult<()>;

    fn allocate(&mut self, size: usize) -> DeviceResult<MemoryBlock>;

    fn allocate_aligned(&mut self, size: usize, alignment: usize) -> DeviceResult<MemoryBlock>;

    fn free(&mut self, block: MemoryBlock);

    /// Bytes currently outstanding through [`Context::allocate`].
    fn allocated_bytes(&self) -> usize;

    /// Applies an opaque target configuration.
    fn configure(&mut self, config: &TargetConfig) -> DeviceResult<()> {
        let _ = config;
        Err(DeviceError::FeatureNotSupported(format!(
            "{} contexts take no target configuration",
            self.target()
        )))
    }

    fn set_stream(&mut self, stream: StreamHandle) -> DeviceResult<()> {
        let _ = stream;
        Err(DeviceError::FeatureNotSupported(format!(
            "{} contexts have no streams",
            self.target()
        )))
    }

    /// Worker pool kernels parallelize on, if the context has one.
    fn thread_pool(&self) -> Option<&rayon::ThreadPool> {
        None
    }

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
