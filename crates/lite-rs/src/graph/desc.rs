//! Serializable program descriptor: blocks of ops over declared variables.

use crate::kernel::KernelBinding;
use crate::tensor::DType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Version string embedded in every serialized program.
pub const PROGRAM_FORMAT_VERSION: &str = "liters.program.v1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarKind {
    #[default]
    LodTensor,
    TensorArray,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDesc {
    pub name: String,
    #[serde(default)]
    pub kind: VarKind,
    #[serde(default)]
    pub dtype: Option<DType>,
    /// Build-time dims; `-1` marks a dimension known only at run time.
    #[serde(default)]
    pub shape: Option<Vec<i64>>,
    #[serde(default)]
    pub persistable: bool,
}

impl VarDesc {
    pub fn new(name: impl Into<String>) -> Self {
        VarDesc {
            name: name.into(),
            kind: VarKind::LodTensor,
            dtype: None,
            shape: None,
            persistable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Attribute {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    String(String),
    Ints(Vec<i32>),
    Longs(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
    Block(usize),
}

impl Attribute {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Attribute::Float(v) => Some(*v),
            Attribute::Int(v) => Some(*v as f32),
            Attribute::Long(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Attribute::Int(v) => Some(i64::from(*v)),
            Attribute::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Attribute {
    fn from(v: bool) -> Self {
        Attribute::Bool(v)
    }
}

impl From<i32> for Attribute {
    fn from(v: i32) -> Self {
        Attribute::Int(v)
    }
}

impl From<i64> for Attribute {
    fn from(v: i64) -> Self {
        Attribute::Long(v)
    }
}

impl From<f32> for Attribute {
    fn from(v: f32) -> Self {
        Attribute::Float(v)
    }
}

impl From<&str> for Attribute {
    fn from(v: &str) -> Self {
        Attribute::String(v.to_string())
    }
}

impl From<String> for Attribute {
    fn from(v: String) -> Self {
        Attribute::String(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDesc {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub attrs: BTreeMap<String, Attribute>,
    /// Kernel chosen by the optimizer; absent on unoptimized programs.
    #[serde(default)]
    pub binding: Option<KernelBinding>,
}

impl OpDesc {
    pub fn new(op_type: impl Into<String>) -> Self {
        OpDesc {
            op_type: op_type.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            attrs: BTreeMap::new(),
            binding: None,
        }
    }

    pub fn with_input(mut self, slot: &str, names: &[&str]) -> Self {
        self.inputs
            .insert(slot.to_string(), names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_output(mut self, slot: &str, names: &[&str]) -> Self {
        self.outputs
            .insert(slot.to_string(), names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<Attribute>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    /// Names bound to an input slot; empty when the slot is absent.
    pub fn input(&self, slot: &str) -> &[String] {
        self.inputs.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn output(&self, slot: &str) -> &[String] {
        self.outputs.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every input variable name, in slot order.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.values().flatten().map(String::as_str)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.values().flatten().map(String::as_str)
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn attr_f32_or(&self, name: &str, default: f32) -> f32 {
        self.attr(name).and_then(Attribute::as_f32).unwrap_or(default)
    }

    pub fn attr_i64_or(&self, name: &str, default: i64) -> i64 {
        self.attr(name).and_then(Attribute::as_i64).unwrap_or(default)
    }

    pub fn attr_bool_or(&self, name: &str, default: bool) -> bool {
        self.attr(name).and_then(Attribute::as_bool).unwrap_or(default)
    }

    pub fn attr_str_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.attr(name).and_then(Attribute::as_str).unwrap_or(default)
    }

    /// Replaces every input reference to `from` with `to`.
    pub fn rename_input(&mut self, from: &str, to: &str) -> bool {
        let mut renamed = false;
        for name in self.inputs.values_mut().flatten() {
            if name == from {
                *name = to.to_string();
                renamed = true;
            }
        }
        renamed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDesc {
    pub idx: usize,
    #[serde(default)]
    pub parent_idx: Option<usize>,
    #[serde(default)]
    pub vars: Vec<VarDesc>,
    #[serde(default)]
    pub ops: Vec<OpDesc>,
}

impl BlockDesc {
    pub fn new(idx: usize, parent_idx: Option<usize>) -> Self {
        BlockDesc {
            idx,
            parent_idx,
            vars: Vec::new(),
            ops: Vec::new(),
        }
    }

    pub fn var(&self, name: &str) -> Option<&VarDesc> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn var_mut(&mut self, name: &str) -> Option<&mut VarDesc> {
        self.vars.iter_mut().find(|v| v.name == name)
    }

    /// Indices of ops that read `name`.
    pub fn consumers(&self, name: &str) -> Vec<usize> {
        self.ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.input_names().any(|n| n == name))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Names fetched by `fetch` ops in this block.
    pub fn fetched_names(&self) -> HashSet<String> {
        self.ops
            .iter()
            .filter(|op| op.op_type == "fetch")
            .flat_map(|op| op.input_names().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDesc {
    pub format_version: String,
    pub blocks: Vec<BlockDesc>,
    /// Op type → op definition version the program was produced against.
    #[serde(default)]
    pub op_versions: BTreeMap<String, u32>,
}

impl Default for ProgramDesc {
    fn default() -> Self {
        ProgramDesc {
            format_version: PROGRAM_FORMAT_VERSION.to_string(),
            blocks: vec![BlockDesc::new(0, None)],
            op_versions: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("program has no blocks")]
    Empty,
    #[error("block {block} is stored at position {position}")]
    MisnumberedBlock { block: usize, position: usize },
    #[error("block {block} names parent {parent}, which does not precede it")]
    InvalidParent { block: usize, parent: usize },
    #[error("block {block} declares variable `{name}` more than once")]
    DuplicateVar { block: usize, name: String },
    #[error("op `{op_type}` (block {block}, op {index}) references undeclared variable `{name}`")]
    UnresolvedVar {
        block: usize,
        index: usize,
        op_type: String,
        name: String,
    },
}

impl ProgramDesc {
    pub fn main_block(&self) -> Option<&BlockDesc> {
        self.blocks.first()
    }

    pub fn main_block_mut(&mut self) -> Option<&mut BlockDesc> {
        self.blocks.first_mut()
    }

    /// Resolves `name` in block `block_idx` or one of its ancestors.
    pub fn find_var(&self, block_idx: usize, name: &str) -> Option<&VarDesc> {
        let mut current = self.blocks.get(block_idx);
        while let Some(block) = current {
            if let Some(var) = block.var(name) {
                return Some(var);
            }
            current = block.parent_idx.and_then(|p| self.blocks.get(p));
        }
        None
    }

    /// Checks the structural invariants every later stage relies on.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.blocks.is_empty() {
            return Err(GraphError::Empty);
        }
        for (position, block) in self.blocks.iter().enumerate() {
            if block.idx != position {
                return Err(GraphError::MisnumberedBlock {
                    block: block.idx,
                    position,
                });
            }
            if let Some(parent) = block.parent_idx {
                if parent >= position {
                    return Err(GraphError::InvalidParent {
                        block: position,
                        parent,
                    });
                }
            }
            let mut seen = HashSet::new();
            for var in &block.vars {
                if !seen.insert(var.name.as_str()) {
                    return Err(GraphError::DuplicateVar {
                        block: position,
                        name: var.name.clone(),
                    });
                }
            }
            for (index, op) in block.ops.iter().enumerate() {
                for name in op.input_names().chain(op.output_names()) {
                    if self.find_var(position, name).is_none() {
                        return Err(GraphError::UnresolvedVar {
                            block: position,
                            index,
                            op_type: op.op_type.clone(),
                            name: name.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Names of persistable variables across all blocks, sorted.
    pub fn persistable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .blocks
            .iter()
            .flat_map(|b| b.vars.iter())
            .filter(|v| v.persistable)
            .map(|v| v.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Distinct op types used by the program, sorted.
    pub fn op_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .blocks
            .iter()
            .flat_map(|b| b.ops.iter())
            .map(|op| op.op_type.clone())
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

fn fmt_names(f: &mut fmt::Formatter<'_>, slots: &BTreeMap<String, Vec<String>>) -> fmt::Result {
    for (idx, (slot, names)) in slots.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{slot}=[{}]", names.join(", "))?;
    }
    Ok(())
}

impl fmt::Display for ProgramDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program {} {{", self.format_version)?;
        for block in &self.blocks {
            match block.parent_idx {
                Some(parent) => writeln!(f, "  block {} (parent {parent}) {{", block.idx)?,
                None => writeln!(f, "  block {} {{", block.idx)?,
            }
            for var in &block.vars {
                let dtype = var.dtype.map(|d| d.to_string()).unwrap_or_else(|| "?".into());
                let shape = var
                    .shape
                    .as_ref()
                    .map(|s| format!("{s:?}"))
                    .unwrap_or_else(|| "?".into());
                let persist = if var.persistable { " persistable" } else { "" };
                writeln!(f, "    var {}: {dtype}{shape}{persist}", var.name)?;
            }
            for op in &block.ops {
                write!(f, "    ")?;
                fmt_names(f, &op.outputs)?;
                write!(f, " = {}(", op.op_type)?;
                fmt_names(f, &op.inputs)?;
                write!(f, ")")?;
                if let Some(binding) = &op.binding {
                    write!(f, " @ {}", binding.key())?;
                }
                writeln!(f)?;
            }
            writeln!(f, "  }}")?;
        }
        write!(f, "}}")
    }
}
