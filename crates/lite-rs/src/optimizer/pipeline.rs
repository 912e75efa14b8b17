use std::sync::Arc;

use crate::error::BuildError;
use crate::graph::ProgramDesc;
use crate::optimizer::passes::{
    DeadOpEliminationPass, ElementwiseActivationFusePass, FcFusePass,
    IdentityScaleEliminatePass, MemoryOptimizePass, PlaceInferencePass, StaticKernelPickPass,
    TypeInferencePass,
};
use crate::optimizer::{
    OptimizeContext, OptimizedProgram, PassResult, PassStage, ProgramPass,
};

pub enum Step {
    Pass(Arc<dyn ProgramPass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn ProgramPass>) {
        self.steps.push(Step::Pass(pass));
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        if inner.steps.is_empty() {
            return;
        }
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Optional passes in default order.
fn optional_passes() -> Vec<Arc<dyn ProgramPass>> {
    vec![
        Arc::new(IdentityScaleEliminatePass),
        Arc::new(DeadOpEliminationPass),
        Arc::new(FcFusePass),
        Arc::new(ElementwiseActivationFusePass),
    ]
}

fn mandatory_passes() -> Vec<Arc<dyn ProgramPass>> {
    vec![
        Arc::new(TypeInferencePass),
        Arc::new(PlaceInferencePass),
        Arc::new(StaticKernelPickPass),
        Arc::new(MemoryOptimizePass),
    ]
}

/// Names accepted in a pass list, mandatory passes included.
pub fn known_pass_names() -> Vec<&'static str> {
    mandatory_passes()
        .iter()
        .chain(optional_passes().iter())
        .map(|p| p.name())
        .collect()
}

pub struct PipelineOptimizer {
    steps: Vec<Step>,
    log_stats: bool,
}

impl Default for PipelineOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOptimizer {
    /// Default pipeline: every optional pass enabled.
    pub fn new() -> Self {
        Self::from_selection(optional_passes())
    }

    /// Pipeline running exactly the optional passes named in `names`, in that
    /// order within their stage. Mandatory pass names are accepted and ignored.
    pub fn with_passes<S: AsRef<str>>(names: &[S]) -> Result<Self, BuildError> {
        let optional = optional_passes();
        let mandatory: Vec<&'static str> = mandatory_passes().iter().map(|p| p.name()).collect();
        let mut selected: Vec<Arc<dyn ProgramPass>> = Vec::new();
        for name in names {
            let name = name.as_ref();
            if let Some(pass) = optional.iter().find(|p| p.name() == name) {
                if !selected.iter().any(|p| p.name() == name) {
                    selected.push(Arc::clone(pass));
                }
            } else if !mandatory.contains(&name) {
                return Err(BuildError::UnknownPass(name.to_string()));
            }
        }
        Ok(Self::from_selection(selected))
    }

    fn from_selection(selected: Vec<Arc<dyn ProgramPass>>) -> Self {
        let in_stage = |stage: PassStage| -> Vec<Arc<dyn ProgramPass>> {
            selected
                .iter()
                .filter(|p| p.stage() == stage)
                .cloned()
                .collect()
        };

        let mut builder = PipelineBuilder::new();
        let canonicalize = in_stage(PassStage::Canonicalize);
        builder.fixed_point(crate::env::optimizer_max_iters(), |p| {
            for pass in canonicalize {
                p.pass(pass);
            }
        });
        builder.pass(Arc::new(TypeInferencePass));
        builder.pass(Arc::new(PlaceInferencePass));
        builder.pass(Arc::new(StaticKernelPickPass));
        for pass in in_stage(PassStage::Fusion) {
            builder.pass(pass);
        }
        builder.pass(Arc::new(MemoryOptimizePass));

        Self {
            steps: builder.finish(),
            log_stats: crate::env::pass_stats_enabled(),
        }
    }

    /// Names of the passes this pipeline runs, in execution order.
    pub fn pass_names(&self) -> Vec<&'static str> {
        fn collect(steps: &[Step], out: &mut Vec<&'static str>) {
            for step in steps {
                match step {
                    Step::Pass(pass) => out.push(pass.name()),
                    Step::FixedPoint { steps, .. } => collect(steps, out),
                }
            }
        }
        let mut names = Vec::new();
        collect(&self.steps, &mut names);
        names
    }

    pub fn optimize(
        &self,
        desc: &ProgramDesc,
        cx: &mut OptimizeContext<'_>,
    ) -> Result<OptimizedProgram, BuildError> {
        desc.validate()?;
        let mut program = desc.clone();
        let mut stats = PassResult::default();
        run_steps(&self.steps, &mut program, cx, &mut stats, self.log_stats)?;
        let memory_plan = cx.memory_plan.take().ok_or_else(|| BuildError::Internal {
            pass: "memory_optimize_pass".to_string(),
            message: "no memory plan was produced".to_string(),
        })?;
        Ok(OptimizedProgram {
            desc: program,
            memory_plan,
            stats,
        })
    }
}

fn run_steps(
    steps: &[Step],
    program: &mut ProgramDesc,
    cx: &mut OptimizeContext<'_>,
    totals: &mut PassResult,
    log_stats: bool,
) -> Result<bool, BuildError> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let stats = pass.run(program, cx)?;
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
                log_pass_stats(pass.name(), program, stats, log_stats);
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                while iter < *max_iters {
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(steps, program, cx, &mut local, log_stats)?;
                    local.iterations += 1;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    Ok(changed_any)
}

fn log_pass_stats(name: &str, program: &ProgramDesc, stats: PassResult, log_stats: bool) {
    let ops: usize = program.blocks.iter().map(|b| b.ops.len()).sum();
    let level = if log_stats {
        log::Level::Info
    } else {
        log::Level::Debug
    };
    log::log!(
        level,
        "pass {name}: changed={} rewrites={} erased={} ops={ops}",
        stats.changed,
        stats.rewrites_applied,
        stats.erased_ops
    );
}
