use std::sync::Arc;

use crate::kernel::{KernelRegistration, KernelRegistry};
use crate::ops::OpRegistry;
use crate::place::Place;
use crate::program::MemoryPlan;

/// State shared by the passes of one optimizer run.
pub struct OptimizeContext<'a> {
    valid_places: &'a [Place],
    kernels: &'a KernelRegistry,
    ops: &'a OpRegistry,
    /// Compatible kernels per `[block][op]`, filled by place inference.
    pub(crate) candidates: Vec<Vec<Vec<Arc<KernelRegistration>>>>,
    pub(crate) memory_plan: Option<MemoryPlan>,
}

impl<'a> OptimizeContext<'a> {
    pub fn new(valid_places: &'a [Place], kernels: &'a KernelRegistry, ops: &'a OpRegistry) -> Self {
        Self {
            valid_places,
            kernels,
            ops,
            candidates: Vec::new(),
            memory_plan: None,
        }
    }

    /// Candidate places in preference order.
    pub fn valid_places(&self) -> &[Place] {
        self.valid_places
    }

    pub fn kernels(&self) -> &KernelRegistry {
        self.kernels
    }

    pub fn ops(&self) -> &OpRegistry {
        self.ops
    }

    /// Registered kernels for `op_type` compatible with at least one valid place.
    pub fn compatible_kernels(&self, op_type: &str) -> Vec<Arc<KernelRegistration>> {
        self.kernels
            .kernels_for(op_type)
            .into_iter()
            .filter(|k| self.valid_places.iter().any(|p| k.place.is_compatible(p)))
            .collect()
    }

    pub fn memory_plan(&self) -> Option<&MemoryPlan> {
        self.memory_plan.as_ref()
    }
}
