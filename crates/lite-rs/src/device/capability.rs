//! Hardware capability detection, cached once per process.

use super::params::CpuArch;
use std::sync::OnceLock;

/// Instruction-set extensions and core count of the host CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub arch: CpuArch,
    pub cores: usize,
    pub arm_fp16: bool,
    pub arm_bf16: bool,
    pub arm_dotprod: bool,
    pub arm_sve2: bool,
    pub arm_sve2_i8mm: bool,
    pub arm_sve2_f32mm: bool,
    pub x86_avx2: bool,
    pub x86_fma: bool,
    pub x86_avx512f: bool,
}

static HOST_CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();

impl Capabilities {
    /// Capabilities with every extension off, for targets that do not report any.
    pub fn none(cores: usize) -> Self {
        Capabilities {
            arch: CpuArch::Unknown,
            cores,
            arm_fp16: false,
            arm_bf16: false,
            arm_dotprod: false,
            arm_sve2: false,
            arm_sve2_i8mm: false,
            arm_sve2_f32mm: false,
            x86_avx2: false,
            x86_fma: false,
            x86_avx512f: false,
        }
    }

    /// Detected host capabilities. Probing happens on the first call only.
    pub fn host() -> &'static Capabilities {
        HOST_CAPABILITIES.get_or_init(|| {
            let caps = detect();
            log::debug!("detected host capabilities: {caps:?}");
            caps
        })
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(target_arch = "x86_64")]
fn detect() -> Capabilities {
    Capabilities {
        arch: CpuArch::X86,
        x86_avx2: is_x86_feature_detected!("avx2"),
        x86_fma: is_x86_feature_detected!("fma"),
        x86_avx512f: is_x86_feature_detected!("avx512f"),
        ..Capabilities::none(available_cores())
    }
}

#[cfg(target_arch = "aarch64")]
fn detect() -> Capabilities {
    use std::arch::is_aarch64_feature_detected;
    let sve2 = is_aarch64_feature_detected!("sve2");
    Capabilities {
        arch: if cfg!(target_vendor = "apple") {
            CpuArch::Apple
        } else {
            CpuArch::Unknown
        },
        arm_fp16: is_aarch64_feature_detected!("fp16"),
        arm_bf16: is_aarch64_feature_detected!("bf16"),
        arm_dotprod: is_aarch64_feature_detected!("dotprod"),
        arm_sve2: sve2,
        arm_sve2_i8mm: sve2 && is_aarch64_feature_detected!("i8mm"),
        arm_sve2_f32mm: sve2 && is_aarch64_feature_detected!("f32mm"),
        ..Capabilities::none(available_cores())
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect() -> Capabilities {
    Capabilities::none(available_cores())
}
