//! Host kernels for the built-in op set.
//!
//! Compute kernels work on `f32` payloads and are registered for
//! `(Host, Float, Nchw)` plus the native architecture target. Data movement
//! kernels accept any precision and layout.

mod activation;
mod io;
mod math;
mod tensor_array;

pub use activation::{ActivationKernel, SoftmaxKernel, UnaryActivation};
pub use io::{AssignKernel, CastKernel, FeedKernel, FetchKernel};
pub use math::{BinaryOp, ElementwiseKernel, FcKernel, MulKernel, ScaleKernel};
pub use tensor_array::{
    ArrayLengthKernel, ReadFromArrayKernel, WriteToArrayKernel, MAX_ARRAY_INDEX,
};

use lite_rs::device::Context;
use lite_rs::kernel::{Kernel, KernelRegistration, KernelRegistry};
use lite_rs::place::{DataLayout, Place, PrecisionType, TargetType};
use rayon::prelude::*;

/// Places compute kernels are registered for: the generic host place first,
/// then the native architecture target when there is one.
fn float_places() -> Vec<Place> {
    let mut places = vec![Place::host_float()];
    if cfg!(target_arch = "x86_64") {
        places.push(Place::new(TargetType::X86, PrecisionType::Float, DataLayout::Nchw));
    }
    if cfg!(target_arch = "aarch64") {
        places.push(Place::new(TargetType::Arm, PrecisionType::Float, DataLayout::Nchw));
    }
    places
}

fn any_place() -> Place {
    Place::new(TargetType::Host, PrecisionType::Any, DataLayout::Any)
}

fn add<F>(registry: &KernelRegistry, op_type: &str, place: Place, factory: F) -> usize
where
    F: Fn() -> Box<dyn Kernel> + Send + Sync + 'static,
{
    let registration = KernelRegistration::new(op_type, place, factory).source(file!());
    usize::from(registry.register(registration))
}

/// Registers every host kernel in `registry`. Returns how many were new.
pub fn register_all(registry: &KernelRegistry) -> usize {
    let mut added = 0;
    let any = any_place();
    added += add(registry, "feed", any, || Box::new(FeedKernel));
    added += add(registry, "fetch", any, || Box::new(FetchKernel));
    added += add(registry, "assign", any, || Box::new(AssignKernel));
    added += add(registry, "cast", any, || Box::<CastKernel>::default());
    added += add(registry, "write_to_array", any, || Box::new(WriteToArrayKernel));
    added += add(registry, "read_from_array", any, || Box::new(ReadFromArrayKernel));
    added += add(registry, "lod_array_length", any, || Box::new(ArrayLengthKernel));

    for place in float_places() {
        added += add(registry, "mul", place, || Box::new(MulKernel));
        added += add(registry, "fc", place, || Box::new(FcKernel));
        added += add(registry, "scale", place, || Box::new(ScaleKernel));
        added += add(registry, "softmax", place, || Box::new(SoftmaxKernel));
        added += add(registry, "elementwise_add", place, || {
            Box::new(ElementwiseKernel::new(BinaryOp::Add, None))
        });
        added += add(registry, "elementwise_sub", place, || {
            Box::new(ElementwiseKernel::new(BinaryOp::Sub, None))
        });
        added += add(registry, "elementwise_mul", place, || {
            Box::new(ElementwiseKernel::new(BinaryOp::Mul, None))
        });
        added += add(registry, "fusion_elementwise_add_activation", place, || {
            Box::new(ElementwiseKernel::fused(BinaryOp::Add))
        });
        added += add(registry, "relu", place, || {
            Box::new(ActivationKernel::new(UnaryActivation::Relu))
        });
        added += add(registry, "sigmoid", place, || {
            Box::new(ActivationKernel::new(UnaryActivation::Sigmoid))
        });
    }
    added
}

/// Runs `f` over `row_len`-sized chunks of `out`, on the context pool when
/// it has one.
pub(crate) fn for_each_row<F>(ctx: &dyn Context, out: &mut [f32], row_len: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    if row_len == 0 || out.is_empty() {
        return;
    }
    match ctx.thread_pool() {
        Some(pool) => pool.install(|| {
            out.par_chunks_mut(row_len)
                .enumerate()
                .for_each(|(i, row)| f(i, row))
        }),
        None => out
            .chunks_mut(row_len)
            .enumerate()
            .for_each(|(i, row)| f(i, row)),
    }
}
