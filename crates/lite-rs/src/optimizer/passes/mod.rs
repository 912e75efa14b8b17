//! Built-in optimizer passes.

mod dead_op_elimination;
mod elementwise_activation_fuse;
mod fc_fuse;
mod identity_scale_eliminate;
mod kernel_pick;
mod memory_optimize;
mod place_inference;
mod type_inference;

pub use dead_op_elimination::DeadOpEliminationPass;
pub use elementwise_activation_fuse::ElementwiseActivationFusePass;
pub use fc_fuse::FcFusePass;
pub use identity_scale_eliminate::IdentityScaleEliminatePass;
pub use kernel_pick::{pick_kernel, StaticKernelPickPass};
pub use memory_optimize::MemoryOptimizePass;
pub use place_inference::PlaceInferencePass;
pub use type_inference::TypeInferencePass;

use crate::graph::BlockDesc;

/// True when `name` is persistable or read by a `fetch`, i.e. observable
/// outside the op chain that produces it.
pub(crate) fn is_observed(block: &BlockDesc, name: &str) -> bool {
    block.var(name).map(|v| v.persistable).unwrap_or(false)
        || block
            .ops
            .iter()
            .any(|op| op.op_type == "fetch" && op.input_names().any(|n| n == name))
}

/// Index of the only op reading `name`, if exactly one does and the variable
/// is not observable outside the chain.
pub(crate) fn sole_consumer(block: &BlockDesc, name: &str) -> Option<usize> {
    if is_observed(block, name) {
        return None;
    }
    match block.consumers(name).as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}
