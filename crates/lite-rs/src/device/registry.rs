//! Device registry keyed by target.
//!
//! Backends register a constructor per [`TargetType`]. The first
//! [`open_device`] call for a target constructs the device and caches it;
//! later calls share the same instance until [`close_device`] drops it.

use super::error::{DeviceError, DeviceResult};
use super::Device;
use crate::place::TargetType;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

pub type DeviceConstructor = Box<dyn Fn() -> DeviceResult<Arc<dyn Device>> + Send + Sync>;

struct DeviceRegistry {
    constructors: RwLock<HashMap<TargetType, DeviceConstructor>>,
    opened: Mutex<HashMap<TargetType, Arc<dyn Device>>>,
}

impl DeviceRegistry {
    fn new() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
            opened: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, target: TargetType, constructor: DeviceConstructor) {
        self.constructors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, constructor);
    }

    fn open(&self, target: TargetType) -> DeviceResult<Arc<dyn Device>> {
        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(device) = opened.get(&target) {
            return Ok(Arc::clone(device));
        }
        let constructors = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let constructor = constructors.get(&target).ok_or_else(|| {
            DeviceError::FeatureNotSupported(format!("no device registered for target {target}"))
        })?;
        let device = constructor()?;
        log::debug!("opened device `{}` for target {target}", device.name());
        opened.insert(target, Arc::clone(&device));
        Ok(device)
    }

    fn close(&self, target: TargetType) -> bool {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&target)
            .is_some()
    }

    fn targets(&self) -> Vec<TargetType> {
        let mut targets: Vec<TargetType> = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        targets.sort();
        targets
    }

    fn has(&self, target: TargetType) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&target)
    }
}

static GLOBAL_REGISTRY: OnceLock<DeviceRegistry> = OnceLock::new();

fn global_registry() -> &'static DeviceRegistry {
    GLOBAL_REGISTRY.get_or_init(DeviceRegistry::new)
}

/// Registers the constructor used to open devices of `target`.
///
/// Re-registering replaces the constructor; an already opened device stays
/// cached until [`close_device`].
pub fn register_device<F>(target: TargetType, constructor: F)
where
    F: Fn() -> DeviceResult<Arc<dyn Device>> + Send + Sync + 'static,
{
    global_registry().register(target, Box::new(constructor));
}

/// Returns the shared device for `target`, constructing it on first use.
pub fn open_device(target: TargetType) -> DeviceResult<Arc<dyn Device>> {
    crate::registry::ensure_backends_registered();
    global_registry().open(target)
}

/// Drops the cached device. Contexts created from it keep it alive until they
/// are dropped. Returns whether a device was open.
pub fn close_device(target: TargetType) -> bool {
    global_registry().close(target)
}

pub fn registered_targets() -> Vec<TargetType> {
    crate::registry::ensure_backends_registered();
    global_registry().targets()
}

pub fn has_device(target: TargetType) -> bool {
    crate::registry::ensure_backends_registered();
    global_registry().has(target)
}
