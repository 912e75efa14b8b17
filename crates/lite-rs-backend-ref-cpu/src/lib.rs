//! Reference host backend for lite-rs: a CPU device, its contexts, and
//! kernels for every built-in op.

pub mod device;
pub mod kernels;

pub use device::{HostConfig, HostContext, HostDevice};

use lite_rs::device::registry::register_device;
use lite_rs::device::Device;
use lite_rs::kernel::KernelRegistry;
use lite_rs::place::TargetType;
use std::sync::{Arc, Once};

/// Targets the host device answers for on this build.
pub fn host_targets() -> Vec<TargetType> {
    let mut targets = vec![TargetType::Host];
    if cfg!(target_arch = "x86_64") {
        targets.push(TargetType::X86);
    }
    if cfg!(target_arch = "aarch64") {
        targets.push(TargetType::Arm);
    }
    targets
}

static REGISTER: Once = Once::new();

/// Register the host devices and kernels with the global registries.
///
/// Runs automatically through the backend registrar slice the first time a
/// device is opened or a predictor is built; calling it again is a no-op.
pub fn register_cpu_backend() {
    REGISTER.call_once(|| {
        for target in host_targets() {
            register_device(target, move || {
                Ok(Arc::new(HostDevice::new(target)) as Arc<dyn Device>)
            });
        }
        let registry = KernelRegistry::global();
        let added = kernels::register_all(&registry);
        log::debug!("registered {added} host kernel(s)");
    });
}

#[linkme::distributed_slice(lite_rs::registry::BACKEND_REGISTRARS)]
static REGISTER_CPU_BACKEND: fn() = register_cpu_backend;
