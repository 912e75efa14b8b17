use std::sync::Arc;

use crate::error::BuildError;
use crate::graph::ProgramDesc;
use crate::kernel::KernelRegistration;
use crate::optimizer::{OptimizeContext, PassResult, PassStage, ProgramPass};
use crate::place::Place;

/// Binds every op to exactly one kernel.
///
/// For each valid place in preference order, kernels registered for exactly
/// that place win, highest priority first and earliest registration on ties.
/// Failing an exact match, the first registered kernel compatible with any
/// valid place is taken. An op with no compatible kernel fails the build.
#[derive(Default)]
pub struct StaticKernelPickPass;

impl StaticKernelPickPass {
    const NAME: &'static str = "static_kernel_pick_pass";
}

/// Applies the selection rule to an op's compatible kernels.
pub fn pick_kernel(
    candidates: &[Arc<KernelRegistration>],
    valid_places: &[Place],
) -> Option<Arc<KernelRegistration>> {
    for place in valid_places {
        let mut best: Option<&Arc<KernelRegistration>> = None;
        for kernel in candidates.iter().filter(|k| k.place.is_exact(place)) {
            if best.map_or(true, |b| kernel.priority > b.priority) {
                best = Some(kernel);
            }
        }
        if let Some(kernel) = best {
            return Some(Arc::clone(kernel));
        }
    }
    candidates
        .iter()
        .find(|k| valid_places.iter().any(|p| k.place.is_compatible(p)))
        .cloned()
}

fn join_places<'a>(places: impl Iterator<Item = &'a Place>) -> String {
    let joined: Vec<String> = places.map(Place::to_string).collect();
    if joined.is_empty() {
        "none".to_string()
    } else {
        joined.join(", ")
    }
}

impl ProgramPass for StaticKernelPickPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stage(&self) -> PassStage {
        PassStage::KernelPick
    }

    fn run(
        &self,
        program: &mut ProgramDesc,
        cx: &mut OptimizeContext<'_>,
    ) -> Result<PassResult, BuildError> {
        let shape_matches = cx.candidates.len() == program.blocks.len()
            && cx
                .candidates
                .iter()
                .zip(&program.blocks)
                .all(|(c, b)| c.len() == b.ops.len());
        if !shape_matches {
            return Err(BuildError::Internal {
                pass: Self::NAME.to_string(),
                message: "kernel candidates do not line up with the program ops".to_string(),
            });
        }

        let mut bound = 0usize;
        for (block_idx, block) in program.blocks.iter_mut().enumerate() {
            for (index, op) in block.ops.iter_mut().enumerate() {
                let candidates = &cx.candidates[block_idx][index];
                let Some(kernel) = pick_kernel(candidates, cx.valid_places()) else {
                    let registered = cx.kernels().kernels_for(&op.op_type);
                    return Err(BuildError::NoKernel {
                        block: block_idx,
                        index,
                        op_type: op.op_type.clone(),
                        requested: join_places(cx.valid_places().iter()),
                        registered: join_places(registered.iter().map(|k| &k.place)),
                    });
                };
                let binding = kernel.binding();
                if op.binding.as_ref() != Some(&binding) {
                    op.binding = Some(binding);
                    bound += 1;
                }
            }
        }
        cx.candidates.clear();
        Ok(PassResult::rewrites(bound))
    }
}
