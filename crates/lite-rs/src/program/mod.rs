//! Executable form of an optimized program.
//!
//! A [`RuntimeProgram`] owns one kernel instance per op of a block, the
//! parameter blocks those kernels are bound to, and one context per target
//! the block touches. Variables live in the execution scope handed in at
//! construction; intermediates that share a reuse slot are bound to the same
//! [`Variable`] handle.

pub mod memory;

pub use memory::{LiveRange, MemoryPlan, ReuseSlot};

use crate::device::registry::open_device;
use crate::device::{Context, ParamKey, ParamValue, PowerMode, StreamHandle, TargetConfig};
use crate::error::{BuildError, RunError};
use crate::graph::{OpDesc, ProgramDesc, VarKind};
use crate::kernel::{Kernel, KernelBinding, KernelParam, KernelRegistry};
use crate::place::TargetType;
use crate::scope::Scope;
use crate::tensor::{DType, Tensor};
use crate::variable::{VarValue, Variable};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Device-side settings applied to every context a program creates.
#[derive(Debug, Clone, Default)]
pub struct DeviceSetup {
    pub threads: Option<usize>,
    pub power_mode: Option<PowerMode>,
    pub target_configs: HashMap<TargetType, TargetConfig>,
    pub streams: HashMap<TargetType, StreamHandle>,
}

/// One op paired with the kernel instance selected for it.
pub struct Instruction {
    op: OpDesc,
    binding: KernelBinding,
    param: KernelParam,
    kernel: Box<dyn Kernel>,
    context: usize,
    staged: Vec<StagedInput>,
}

impl Instruction {
    pub fn op(&self) -> &OpDesc {
        &self.op
    }

    pub fn binding(&self) -> &KernelBinding {
        &self.binding
    }

    pub fn param(&self) -> &KernelParam {
        &self.param
    }
}

pub struct RuntimeProgram {
    instructions: Vec<Instruction>,
    contexts: Vec<Box<dyn Context>>,
    exec_scope: Arc<Scope>,
    memory_plan: Arc<MemoryPlan>,
    slot_vars: Vec<Variable>,
    tensor_arrays: Vec<Variable>,
}

fn runtime_target(target: TargetType) -> TargetType {
    match target {
        TargetType::Any => TargetType::Host,
        other => other,
    }
}

fn create_context(
    target: TargetType,
    setup: &DeviceSetup,
) -> Result<Box<dyn Context>, BuildError> {
    let mut ctx = open_device(target)?.create_context()?;
    if let Some(mode) = setup.power_mode {
        ctx.set_param(ParamKey::ContextPowerMode, ParamValue::I32(mode.code()))?;
    }
    if let Some(threads) = setup.threads.or_else(crate::env::default_threads) {
        let threads = i32::try_from(threads).unwrap_or(i32::MAX);
        ctx.set_param(ParamKey::ContextWorkThreadNum, ParamValue::I32(threads))?;
    }
    if let Some(config) = setup.target_configs.get(&target) {
        ctx.configure(config)?;
    }
    if let Some(stream) = setup.streams.get(&target) {
        ctx.set_stream(stream.clone())?;
    }
    Ok(ctx)
}

fn bind_args<'a>(
    scope: &Scope,
    op: &OpDesc,
    args: impl Iterator<Item = (&'a String, &'a Vec<String>)>,
) -> Result<BTreeMap<String, Vec<Variable>>, BuildError> {
    let mut bound = BTreeMap::new();
    for (slot, names) in args {
        let mut vars = Vec::with_capacity(names.len());
        for name in names {
            let var = scope
                .find_var(name)
                .ok_or_else(|| BuildError::UnboundVariable {
                    op_type: op.op_type.clone(),
                    name: name.clone(),
                })?;
            vars.push(var);
        }
        bound.insert(slot.clone(), vars);
    }
    Ok(bound)
}

/// An input that resolves to the same payload as one of the op's outputs.
/// The kernel reads `staged`, refreshed from `source` before every run, so it
/// never locks one variable for reading and writing at once.
struct StagedInput {
    source: Variable,
    staged: Variable,
}

impl StagedInput {
    fn refresh(&self) {
        let source = self.source.read();
        let mut staged = self.staged.write();
        match (&*source, &mut *staged) {
            (VarValue::Tensor(from), VarValue::Tensor(to)) => to.copy_from(from),
            (from, to) => *to = from.clone(),
        }
    }
}

/// Rebinds inputs that alias an output to private staging variables.
fn stage_aliased_inputs(op: &OpDesc, param: &mut KernelParam) -> Vec<StagedInput> {
    let outputs: Vec<Variable> = param.outputs.values().flatten().cloned().collect();
    let mut staged: Vec<StagedInput> = Vec::new();
    for inputs in param.inputs.values_mut() {
        for input in inputs.iter_mut() {
            if !outputs.iter().any(|out| out.ptr_eq(input)) {
                continue;
            }
            let existing = staged.iter().find(|s| s.source.ptr_eq(input));
            let replacement = match existing {
                Some(existing) => existing.staged.clone(),
                None => {
                    let entry = StagedInput {
                        source: input.clone(),
                        staged: Variable::default(),
                    };
                    let handle = entry.staged.clone();
                    staged.push(entry);
                    handle
                }
            };
            *input = replacement;
        }
    }
    if !staged.is_empty() {
        log::debug!(
            "op `{}` updates {} variable(s) in place; inputs are staged",
            op.op_type,
            staged.len()
        );
    }
    staged
}

impl RuntimeProgram {
    /// Binds `desc.blocks[block_idx]` to `exec_scope` and instantiates a
    /// kernel for every op from its recorded binding.
    pub fn new(
        desc: &ProgramDesc,
        block_idx: usize,
        exec_scope: Arc<Scope>,
        memory_plan: Arc<MemoryPlan>,
        kernels: &KernelRegistry,
        setup: &DeviceSetup,
    ) -> Result<Self, BuildError> {
        let block = desc.blocks.get(block_idx).ok_or_else(|| BuildError::Internal {
            pass: "runtime_program".to_string(),
            message: format!("block {block_idx} does not exist"),
        })?;

        let mut slot_vars = Vec::with_capacity(memory_plan.slots.len());
        for slot in &memory_plan.slots {
            let var = Variable::from_tensor(Tensor::new(slot.dtype.unwrap_or(DType::F32)));
            for member in &slot.members {
                exec_scope.insert_local(member, var.clone());
            }
            slot_vars.push(var);
        }

        let mut tensor_arrays = Vec::new();
        for var in &block.vars {
            if var.persistable {
                if exec_scope.find_var(&var.name).is_none() {
                    return Err(BuildError::MissingParameter(var.name.clone()));
                }
                continue;
            }
            if memory_plan.slot_of(&var.name).is_some() {
                continue;
            }
            let handle = exec_scope.local_var_with(&var.name, var.kind);
            if var.kind == VarKind::TensorArray {
                tensor_arrays.push(handle);
            }
        }

        let mut contexts: Vec<Box<dyn Context>> = Vec::new();
        let mut context_index: BTreeMap<TargetType, usize> = BTreeMap::new();
        let mut instructions = Vec::with_capacity(block.ops.len());
        for op in &block.ops {
            let binding = op.binding.clone().ok_or_else(|| BuildError::Internal {
                pass: "static_kernel_pick_pass".to_string(),
                message: format!("op `{}` reached runtime without a kernel", op.op_type),
            })?;
            let registration = kernels
                .find(&binding)
                .ok_or_else(|| BuildError::KernelNotRegistered(binding.key()))?;

            let target = runtime_target(binding.place.target);
            let context = match context_index.get(&target) {
                Some(&index) => index,
                None => {
                    contexts.push(create_context(target, setup)?);
                    context_index.insert(target, contexts.len() - 1);
                    contexts.len() - 1
                }
            };

            let mut param = KernelParam {
                op_type: op.op_type.clone(),
                inputs: bind_args(&exec_scope, op, op.inputs.iter())?,
                outputs: bind_args(&exec_scope, op, op.outputs.iter())?,
                attrs: op.attrs.clone(),
            };
            let staged = stage_aliased_inputs(op, &mut param);

            let mut kernel = registration.create();
            kernel
                .prepare(&param, &mut *contexts[context])
                .map_err(|source| BuildError::KernelPrepare {
                    op_type: op.op_type.clone(),
                    source,
                })?;
            instructions.push(Instruction {
                op: op.clone(),
                binding,
                param,
                kernel,
                context,
                staged,
            });
        }

        log::debug!(
            "generated runtime program: {} instruction(s), {} context(s), {} reuse slot(s)",
            instructions.len(),
            contexts.len(),
            slot_vars.len()
        );
        Ok(RuntimeProgram {
            instructions,
            contexts,
            exec_scope,
            memory_plan,
            slot_vars,
            tensor_arrays,
        })
    }

    /// Executes every instruction in order, stopping at the first failure.
    pub fn run(&mut self) -> Result<(), RunError> {
        for (index, inst) in self.instructions.iter_mut().enumerate() {
            for staged in &inst.staged {
                staged.refresh();
            }
            let ctx = &mut *self.contexts[inst.context];
            inst.kernel
                .run(&inst.param, ctx)
                .map_err(|err| RunError::from_kernel(index, &inst.op.op_type, err))?;
        }
        Ok(())
    }

    pub fn has_tensor_arrays(&self) -> bool {
        !self.tensor_arrays.is_empty()
    }

    pub fn clear_tensor_arrays(&self) {
        for var in &self.tensor_arrays {
            *var.write() = VarValue::TensorArray(Vec::new());
        }
    }

    /// Releases the storage behind every reuse slot and every staged input
    /// and returns the freed bytes. The next run reallocates on demand.
    pub fn try_shrink_memory(&mut self) -> usize {
        let mut freed = 0;
        let staged = self
            .instructions
            .iter()
            .flat_map(|inst| inst.staged.iter().map(|s| &s.staged));
        for var in self.slot_vars.iter().chain(staged) {
            if let VarValue::Tensor(tensor) = &mut *var.write() {
                freed += tensor.release();
            }
        }
        freed
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// `op_type@binding-key` per instruction.
    pub fn signature(&self) -> Vec<String> {
        self.instructions
            .iter()
            .map(|inst| format!("{}@{}", inst.op.op_type, inst.binding.key()))
            .collect()
    }

    pub fn memory_plan(&self) -> &Arc<MemoryPlan> {
        &self.memory_plan
    }

    pub fn exec_scope(&self) -> &Arc<Scope> {
        &self.exec_scope
    }

    /// Context created for `target`, if any instruction runs there.
    pub fn context(&self, target: TargetType) -> Option<&dyn Context> {
        self.contexts
            .iter()
            .find(|ctx| ctx.target() == runtime_target(target))
            .map(|ctx| &**ctx)
    }
}
