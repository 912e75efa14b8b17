//! Predictor: builds a program for a set of places and runs it.
//!
//! A predictor owns an execution scope whose parent is a root scope holding
//! the persistable weights. Clones share the root scope, the optimized
//! program, and the memory plan, and get their own execution scope, contexts,
//! and runtime program.

mod config;

pub use config::{ModelSource, PredictorConfig};

use crate::device::{PowerMode, StreamHandle, TargetConfig};
use crate::error::{BuildError, InputValidationError, RunError};
use crate::graph::{fetch_output_name, BlockDesc, ProgramDesc};
use crate::kernel::KernelRegistry;
use crate::model_io::{self, LoadedModel, ModelIoError, ModelType, TailoringInfo};
use crate::ops::OpRegistry;
use crate::optimizer;
use crate::place::{Place, PrecisionType, TargetType};
use crate::program::{DeviceSetup, MemoryPlan, RuntimeProgram};
use crate::registry::ensure_backends_registered;
use crate::scope::Scope;
use crate::tensor::{DType, Tensor};
use crate::variable::Variable;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorState {
    /// No program attached.
    Created,
    /// Program optimized; no runtime program yet.
    Configured,
    /// Runtime program generated.
    Generated,
    /// At least one run completed.
    Running,
}

#[derive(Debug, Error)]
pub enum PredictorError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    ModelIo(#[from] ModelIoError),
    #[error("variable `{0}` is not declared by the program")]
    UnknownVariable(String),
    #[error("variable `{0}` is not persistable")]
    NotPersistable(String),
    #[error("variable `{0}` is a shared persistable; clone it with clone_with_vars to modify it")]
    ReadOnlyVariable(String),
    #[error("{kind} index {index} is out of range ({len} available)")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },
    #[error("variable `{name}`: {source}")]
    Variable {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Build-time contract of one program input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub name: String,
    pub dtype: Option<DType>,
    pub shape: Option<Vec<i64>>,
}

/// Products of a build, shared by reference between clones.
#[derive(Debug)]
struct Compiled {
    desc: ProgramDesc,
    memory_plan: Arc<MemoryPlan>,
    valid_places: Vec<Place>,
    inputs: Vec<InputSpec>,
    output_names: Vec<String>,
    input_names: Vec<String>,
}

pub struct Predictor {
    root_scope: Arc<Scope>,
    exec_scope: Arc<Scope>,
    kernels: Arc<KernelRegistry>,
    compiled: Option<Arc<Compiled>>,
    program: Option<RuntimeProgram>,
    device: DeviceSetup,
    private_vars: BTreeSet<String>,
    state: PredictorState,
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new()
    }
}

/// Names of the first `slot` argument of every `op_type` op, ordered by `col`.
fn io_names(block: &BlockDesc, op_type: &str, slot: &str, output: bool) -> Vec<String> {
    let mut found: Vec<(i64, String)> = block
        .ops
        .iter()
        .filter(|op| op.op_type == op_type)
        .filter_map(|op| {
            let names = if output { op.output(slot) } else { op.input(slot) };
            names.first().map(|n| (op.attr_i64_or("col", 0), n.clone()))
        })
        .collect();
    found.sort_by_key(|(col, _)| *col);
    found.into_iter().map(|(_, name)| name).collect()
}

fn check_op_versions(desc: &ProgramDesc, ops: &OpRegistry) {
    for (op_type, &version) in &desc.op_versions {
        match ops.get(op_type) {
            Some(def) if def.version != version => log::warn!(
                "op `{op_type}` was saved at version {version}, registry has version {}",
                def.version
            ),
            Some(_) => {}
            None => log::warn!("op `{op_type}` (version {version}) has no registered definition"),
        }
    }
}

/// Stores every F32 weight whose consumers all run on fp16 kernels as F16 in
/// `root`. Declared dtypes stay F32. Returns the names converted.
fn convert_fp16_weights(block: &BlockDesc, root: &Scope) -> Vec<String> {
    let mut consumers: HashMap<&str, bool> = HashMap::new();
    for op in &block.ops {
        let fp16 = op
            .binding
            .as_ref()
            .is_some_and(|b| b.place.precision == PrecisionType::Fp16);
        for name in op.input_names() {
            let all_fp16 = consumers.entry(name).or_insert(true);
            *all_fp16 &= fp16;
        }
    }

    let mut converted = Vec::new();
    for (name, all_fp16) in consumers {
        let persistable = block.var(name).is_some_and(|v| v.persistable);
        if !all_fp16 || !persistable {
            continue;
        }
        let Some(var) = root.find_var(name) else {
            continue;
        };
        let half = match var.read().tensor() {
            Ok(tensor) if tensor.dtype() == DType::F32 => tensor.cast(DType::F16),
            _ => continue,
        };
        var.set_tensor(half);
        converted.push(name.to_string());
    }
    converted.sort();
    converted
}

fn has_value(var: &Variable) -> bool {
    var.read().tensor().map(Tensor::is_initialized).unwrap_or(false)
}

impl Predictor {
    /// Empty predictor with a fresh root scope, using the global kernel registry.
    pub fn new() -> Self {
        Self::with_root_scope(Scope::new_root())
    }

    /// Predictor whose persistables resolve through `root_scope`.
    pub fn with_root_scope(root_scope: Arc<Scope>) -> Self {
        let exec_scope = Scope::new_child(&root_scope);
        Predictor {
            root_scope,
            exec_scope,
            kernels: KernelRegistry::global(),
            compiled: None,
            program: None,
            device: DeviceSetup::default(),
            private_vars: BTreeSet::new(),
            state: PredictorState::Created,
        }
    }

    /// Builds against `kernels` instead of the global registry.
    pub fn with_kernels(mut self, kernels: Arc<KernelRegistry>) -> Self {
        self.kernels = kernels;
        self
    }

    /// Loads the model named by `config` and builds it.
    pub fn from_config(config: &PredictorConfig) -> Result<Self, PredictorError> {
        let mut predictor = Predictor::new();
        predictor.build(config)?;
        Ok(predictor)
    }

    pub fn build(&mut self, config: &PredictorConfig) -> Result<(), PredictorError> {
        let LoadedModel { desc, params } = match &config.model {
            ModelSource::Dir(dir) => model_io::load_from_dir(dir, config.model_type)?,
            ModelSource::Files { program, params } => {
                model_io::load_from_files(program, params.as_deref(), config.model_type)?
            }
            ModelSource::Buffer { program, params } => {
                model_io::load_from_buffers(program, params.as_deref(), config.model_type)?
            }
        };
        let previous = (
            Arc::clone(&self.kernels),
            self.device.threads,
            self.device.power_mode,
        );
        if let Some(kernels) = &config.kernels {
            self.kernels = Arc::clone(kernels);
        }
        self.device.threads = config.threads;
        self.device.power_mode = config.power_mode;
        if let Err(err) = self.build_with_params(desc, params, &config.valid_places, &config.passes) {
            (self.kernels, self.device.threads, self.device.power_mode) = previous;
            return Err(err.into());
        }
        Ok(())
    }

    /// Optimizes `desc` for `valid_places`. Persistables must already have
    /// values in the root scope.
    pub fn build_from_desc(
        &mut self,
        desc: ProgramDesc,
        valid_places: &[Place],
        passes: &[String],
    ) -> Result<(), BuildError> {
        self.build_with_params(desc, Vec::new(), valid_places, passes)
    }

    fn build_with_params(
        &mut self,
        desc: ProgramDesc,
        params: Vec<(String, Tensor)>,
        valid_places: &[Place],
        passes: &[String],
    ) -> Result<(), BuildError> {
        ensure_backends_registered();
        desc.validate()?;
        check_op_versions(&desc, OpRegistry::global());

        let loaded: BTreeSet<&str> = params.iter().map(|(name, _)| name.as_str()).collect();
        for name in desc.persistable_names() {
            let present = loaded.contains(name.as_str())
                || self.root_scope.find_var(&name).is_some_and(|v| has_value(&v));
            if !present {
                return Err(BuildError::MissingParameter(name));
            }
        }

        let optimized = optimizer::optimize(&desc, valid_places, passes, &self.kernels)?;
        let main = optimized.desc.main_block().ok_or_else(|| BuildError::Internal {
            pass: "optimizer".to_string(),
            message: "optimized program has no main block".to_string(),
        })?;
        let input_names = io_names(main, "feed", "Out", true);
        let output_names = io_names(main, "fetch", "X", false);
        let inputs = input_names
            .iter()
            .map(|name| {
                let var = main.var(name);
                InputSpec {
                    name: name.clone(),
                    dtype: var.and_then(|v| v.dtype),
                    shape: var.and_then(|v| v.shape.clone()),
                }
            })
            .collect();

        for (name, tensor) in params {
            self.root_scope.insert_local(&name, Variable::from_tensor(tensor));
        }
        let converted = convert_fp16_weights(main, &self.root_scope);
        if !converted.is_empty() {
            log::debug!("stored {} weight(s) as fp16: {converted:?}", converted.len());
        }
        log::info!(
            "built program: {} op(s), {} input(s), {} output(s), {} rewrite(s) applied",
            main.ops.len(),
            input_names.len(),
            output_names.len(),
            optimized.stats.rewrites_applied
        );
        self.compiled = Some(Arc::new(Compiled {
            memory_plan: Arc::new(optimized.memory_plan),
            desc: optimized.desc,
            valid_places: valid_places.to_vec(),
            inputs,
            output_names,
            input_names,
        }));
        self.exec_scope = Scope::new_child(&self.root_scope);
        self.private_vars.clear();
        self.program = None;
        self.state = PredictorState::Configured;
        Ok(())
    }

    fn compiled(&self) -> Result<&Arc<Compiled>, BuildError> {
        self.compiled.as_ref().ok_or(BuildError::NotConfigured)
    }

    /// Generates the runtime program if it does not exist yet.
    pub fn gen_runtime_program(&mut self) -> Result<(), BuildError> {
        if self.program.is_some() {
            return Ok(());
        }
        let compiled = Arc::clone(self.compiled()?);
        let program = RuntimeProgram::new(
            &compiled.desc,
            0,
            Arc::clone(&self.exec_scope),
            Arc::clone(&compiled.memory_plan),
            &self.kernels,
            &self.device,
        )?;
        self.program = Some(program);
        self.state = PredictorState::Generated;
        Ok(())
    }

    /// Drops the runtime program; the next run regenerates it.
    pub fn discard_runtime_program(&mut self) {
        if self.program.take().is_some() {
            self.state = PredictorState::Configured;
        }
    }

    /// Checks every input against its build-time element type and dims.
    pub fn check_input_valid(&self) -> Result<(), InputValidationError> {
        let Some(compiled) = &self.compiled else {
            return Ok(());
        };
        for spec in &compiled.inputs {
            let not_set = || InputValidationError::NotSet {
                name: spec.name.clone(),
            };
            let var = self.exec_scope.find_local_var(&spec.name).ok_or_else(not_set)?;
            let guard = var.read();
            let tensor = guard.tensor().map_err(|_| not_set())?;
            if !tensor.is_initialized() {
                return Err(not_set());
            }
            if let Some(expected) = spec.dtype {
                if tensor.dtype() != expected {
                    return Err(InputValidationError::PrecisionMismatch {
                        name: spec.name.clone(),
                        expected,
                        actual: tensor.dtype(),
                    });
                }
            }
            if let Some(expected) = &spec.shape {
                if !tensor.shape().matches_spec(expected) {
                    return Err(InputValidationError::ShapeMismatch {
                        name: spec.name.clone(),
                        expected: expected.clone(),
                        actual: tensor.dims().to_vec(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Validates inputs and executes the program once.
    pub fn run(&mut self) -> Result<(), RunError> {
        self.gen_runtime_program()?;
        self.check_input_valid()?;
        let program = self.program.as_mut().ok_or(BuildError::NotConfigured)?;
        if program.has_tensor_arrays() {
            program.clear_tensor_arrays();
        }
        program.run()?;
        self.state = PredictorState::Running;
        Ok(())
    }

    /// New predictor sharing the root scope, program, and kernels.
    pub fn clone(&self) -> Result<Predictor, PredictorError> {
        self.clone_with_vars::<&str>(&[])
    }

    /// Like [`Predictor::clone`], with private copies of the named persistables.
    pub fn clone_with_vars<S: AsRef<str>>(&self, names: &[S]) -> Result<Predictor, PredictorError> {
        let compiled = Arc::clone(self.compiled()?);
        let main = compiled.desc.main_block();
        for name in names {
            let name = name.as_ref();
            let declared = main
                .and_then(|b| b.var(name))
                .ok_or_else(|| PredictorError::UnknownVariable(name.to_string()))?;
            if !declared.persistable {
                return Err(PredictorError::NotPersistable(name.to_string()));
            }
        }

        let exec_scope = Scope::new_child(&self.root_scope);
        let mut private_vars = BTreeSet::new();
        for name in self.private_vars.iter().map(String::as_str).chain(names.iter().map(|n| n.as_ref())) {
            let source = self
                .exec_scope
                .find_var(name)
                .ok_or_else(|| PredictorError::Build(BuildError::MissingParameter(name.to_string())))?;
            exec_scope.insert_local(name, source.deep_clone());
            private_vars.insert(name.to_string());
        }

        let mut clone = Predictor {
            root_scope: Arc::clone(&self.root_scope),
            exec_scope,
            kernels: Arc::clone(&self.kernels),
            compiled: Some(compiled),
            program: None,
            device: self.device.clone(),
            private_vars,
            state: PredictorState::Configured,
        };
        clone.gen_runtime_program()?;
        Ok(clone)
    }

    fn input_name(&self, index: usize) -> Result<&str, PredictorError> {
        let names = self.get_input_names();
        names
            .get(index)
            .map(String::as_str)
            .ok_or(PredictorError::IndexOutOfRange {
                kind: "input",
                index,
                len: names.len(),
            })
    }

    fn output_name(&self, index: usize) -> Result<&str, PredictorError> {
        let names = self.get_output_names();
        names
            .get(index)
            .map(String::as_str)
            .ok_or(PredictorError::IndexOutOfRange {
                kind: "output",
                index,
                len: names.len(),
            })
    }

    /// Handle of input `index`; write the input tensor into it before `run`.
    pub fn get_input(&self, index: usize) -> Result<Variable, PredictorError> {
        let name = self.input_name(index)?;
        Ok(self.exec_scope.local_var(name))
    }

    pub fn get_input_by_name(&self, name: &str) -> Result<Variable, PredictorError> {
        if !self.get_input_names().iter().any(|n| n == name) {
            return Err(PredictorError::UnknownVariable(name.to_string()));
        }
        Ok(self.exec_scope.local_var(name))
    }

    pub fn get_output(&self, index: usize) -> Result<Variable, PredictorError> {
        let name = self.output_name(index)?;
        Ok(self.exec_scope.local_var(&fetch_output_name(name)))
    }

    pub fn get_output_by_name(&self, name: &str) -> Result<Variable, PredictorError> {
        if !self.get_output_names().iter().any(|n| n == name) {
            return Err(PredictorError::UnknownVariable(name.to_string()));
        }
        Ok(self.exec_scope.local_var(&fetch_output_name(name)))
    }

    /// Copies of every output tensor, in output order.
    pub fn get_outputs(&self) -> Result<Vec<Tensor>, PredictorError> {
        (0..self.get_output_names().len())
            .map(|index| {
                let name = self.output_name(index)?.to_string();
                self.get_output(index)?
                    .tensor()
                    .map_err(|source| PredictorError::Variable { name, source })
            })
            .collect()
    }

    pub fn get_input_names(&self) -> &[String] {
        self.compiled
            .as_ref()
            .map(|c| c.input_names.as_slice())
            .unwrap_or(&[])
    }

    pub fn get_output_names(&self) -> &[String] {
        self.compiled
            .as_ref()
            .map(|c| c.output_names.as_slice())
            .unwrap_or(&[])
    }

    pub fn get_param_names(&self) -> Vec<String> {
        self.compiled
            .as_ref()
            .map(|c| c.desc.persistable_names())
            .unwrap_or_default()
    }

    /// Precision each input was built for, in input order.
    pub fn get_input_precisions(&self) -> Vec<PrecisionType> {
        self.compiled
            .as_ref()
            .map(|c| {
                c.inputs
                    .iter()
                    .map(|spec| spec.dtype.map_or(PrecisionType::Any, PrecisionType::from_dtype))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Copy of the tensor visible under `name` from the execution scope.
    pub fn get_tensor(&self, name: &str) -> Result<Tensor, PredictorError> {
        let var = self
            .exec_scope
            .find_var(name)
            .ok_or_else(|| PredictorError::UnknownVariable(name.to_string()))?;
        var.tensor().map_err(|source| PredictorError::Variable {
            name: name.to_string(),
            source,
        })
    }

    /// Writable handle of a variable owned by this predictor. Shared
    /// persistables are refused.
    pub fn get_mutable_tensor(&self, name: &str) -> Result<Variable, PredictorError> {
        if let Some(var) = self.exec_scope.find_local_var(name) {
            return Ok(var);
        }
        if self.root_scope.find_var(name).is_some() {
            return Err(PredictorError::ReadOnlyVariable(name.to_string()));
        }
        Err(PredictorError::UnknownVariable(name.to_string()))
    }

    /// Releases reusable intermediate buffers. Returns whether any bytes were
    /// reclaimed.
    pub fn try_shrink_memory(&mut self) -> bool {
        let freed = self
            .program
            .as_mut()
            .map_or(0, RuntimeProgram::try_shrink_memory);
        if freed > 0 {
            log::debug!("released {freed} byte(s) of intermediate storage");
        }
        freed > 0
    }

    /// Saves the optimized program and the parameter values this predictor
    /// sees. With `record_info`, tailoring lists are written too.
    pub fn save_model(
        &self,
        dir: impl AsRef<Path>,
        model_type: ModelType,
        record_info: bool,
    ) -> Result<(), PredictorError> {
        let compiled = self.compiled()?;
        let mut params = Vec::new();
        for name in compiled.desc.persistable_names() {
            let tensor = self.get_tensor(&name)?;
            params.push((name, tensor));
        }
        let tailoring = record_info
            .then(|| TailoringInfo::collect(&compiled.desc, OpRegistry::global(), &self.kernels));
        model_io::save_model(
            dir.as_ref(),
            model_type,
            &compiled.desc,
            params.iter().map(|(name, tensor)| (name.as_str(), tensor)),
            tailoring.as_ref(),
        )?;
        Ok(())
    }

    /// Replaces the per-target configurations applied to new contexts. A
    /// generated program is discarded so the next run picks them up.
    pub fn set_target_configs(&mut self, configs: HashMap<TargetType, TargetConfig>) {
        self.device.target_configs = configs;
        self.discard_runtime_program();
    }

    pub fn set_stream(&mut self, target: TargetType, stream: StreamHandle) {
        self.device.streams.insert(target, stream);
        self.discard_runtime_program();
    }

    pub fn set_threads(&mut self, threads: usize) {
        self.device.threads = Some(threads);
        self.discard_runtime_program();
    }

    /// Power mode for the contexts of this predictor's runtime program. The
    /// shared device keeps its own mode, so other predictors are unaffected.
    pub fn set_power_mode(&mut self, mode: PowerMode) {
        self.device.power_mode = Some(mode);
        self.discard_runtime_program();
    }

    /// The optimized program, once built.
    pub fn program_desc(&self) -> Option<&ProgramDesc> {
        self.compiled.as_ref().map(|c| &c.desc)
    }

    pub fn valid_places(&self) -> &[Place] {
        self.compiled
            .as_ref()
            .map(|c| c.valid_places.as_slice())
            .unwrap_or(&[])
    }

    pub fn runtime_program(&self) -> Option<&RuntimeProgram> {
        self.program.as_ref()
    }

    /// Root scope holding the persistables.
    pub fn scope(&self) -> &Arc<Scope> {
        &self.root_scope
    }

    pub fn exec_scope(&self) -> &Arc<Scope> {
        &self.exec_scope
    }

    pub fn version(&self) -> &'static str {
        crate::VERSION
    }

    pub fn state(&self) -> PredictorState {
        self.state
    }

    /// Whether `self` and `other` read persistables from the same root scope.
    pub fn shares_root_with(&self, other: &Predictor) -> bool {
        Arc::ptr_eq(&self.root_scope, &other.root_scope)
    }
}
