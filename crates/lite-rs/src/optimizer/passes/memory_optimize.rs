use crate::error::BuildError;
use crate::graph::ProgramDesc;
use crate::optimizer::{OptimizeContext, PassResult, PassStage, ProgramPass};
use crate::program::MemoryPlan;

/// Computes the reuse plan for the main block from liveness.
#[derive(Default)]
pub struct MemoryOptimizePass;

impl MemoryOptimizePass {
    const NAME: &'static str = "memory_optimize_pass";
}

impl ProgramPass for MemoryOptimizePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stage(&self) -> PassStage {
        PassStage::Memory
    }

    fn run(
        &self,
        program: &mut ProgramDesc,
        cx: &mut OptimizeContext<'_>,
    ) -> Result<PassResult, BuildError> {
        let plan = program
            .main_block()
            .map(MemoryPlan::for_block)
            .unwrap_or_default();
        log::debug!(
            "memory plan: {} slot(s) for {} intermediate(s), {} shared",
            plan.slots.len(),
            plan.assignments.len(),
            plan.shared_var_count()
        );
        cx.memory_plan = Some(plan);
        Ok(PassResult::default())
    }
}
