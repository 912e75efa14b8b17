//! Program optimizer: a staged pipeline of passes over the program descriptor.
//!
//! Mandatory stages (type inference, place inference, kernel pick, memory
//! reuse) always run. Optional canonicalize and fusion passes run by default
//! or as selected by name. The optimizer works on a copy of its input, so a
//! failed build leaves nothing half-rewritten behind.

mod context;
pub mod passes;
pub mod pipeline;

pub use context::OptimizeContext;
pub use pipeline::{PipelineBuilder, PipelineOptimizer, Step};

use crate::error::BuildError;
use crate::graph::ProgramDesc;
use crate::kernel::KernelRegistry;
use crate::ops::OpRegistry;
use crate::place::Place;
use crate::program::MemoryPlan;

/// Result returned by a [`ProgramPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the program.
    pub changed: bool,
    /// Fixed-point iterations executed while applying the pass.
    pub iterations: usize,
    /// Rewrites (fusions, bindings, eliminations) applied by the pass.
    pub rewrites_applied: usize,
    /// Ops removed from the program.
    pub erased_ops: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_ops: self.erased_ops + other.erased_ops,
        }
    }

    pub fn rewrites(count: usize) -> PassResult {
        PassResult {
            changed: count > 0,
            rewrites_applied: count,
            ..PassResult::default()
        }
    }
}

/// Where in the pipeline a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PassStage {
    Canonicalize,
    TypeInference,
    PlaceInference,
    KernelPick,
    Fusion,
    Memory,
}

pub trait ProgramPass: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> PassStage;

    fn run(
        &self,
        program: &mut ProgramDesc,
        cx: &mut OptimizeContext<'_>,
    ) -> Result<PassResult, BuildError>;
}

/// Optimizer output: the rewritten program with every op bound to a kernel.
#[derive(Debug, Clone)]
pub struct OptimizedProgram {
    pub desc: ProgramDesc,
    pub memory_plan: MemoryPlan,
    pub stats: PassResult,
}

/// Runs the pipeline selected by `passes` (empty = default) over a copy of `desc`.
pub fn optimize(
    desc: &ProgramDesc,
    valid_places: &[Place],
    passes: &[String],
    kernels: &KernelRegistry,
) -> Result<OptimizedProgram, BuildError> {
    if valid_places.is_empty() {
        return Err(BuildError::NoValidPlaces);
    }
    let optimizer = if passes.is_empty() {
        PipelineOptimizer::new()
    } else {
        PipelineOptimizer::with_passes(passes)?
    };
    let mut cx = OptimizeContext::new(valid_places, kernels, OpRegistry::global());
    optimizer.optimize(desc, &mut cx)
}
