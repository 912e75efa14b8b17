//! Kernels: place-specific implementations of an op, and their parameter blocks.

pub mod registry;

pub use registry::{KernelFactory, KernelRegistration, KernelRegistry};

use crate::device::Context;
use crate::graph::Attribute;
use crate::place::Place;
use crate::variable::Variable;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kernel chosen for an op, recorded on the op descriptor after selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KernelBinding {
    pub op_type: String,
    pub alias: String,
    pub place: Place,
}

impl KernelBinding {
    /// `op_type/alias/target/precision/layout`, the form used in tailoring lists.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.op_type, self.alias, self.place)
    }
}

/// Variables and attributes a kernel instance is bound to.
#[derive(Debug, Clone, Default)]
pub struct KernelParam {
    pub op_type: String,
    pub inputs: BTreeMap<String, Vec<Variable>>,
    pub outputs: BTreeMap<String, Vec<Variable>>,
    pub attrs: BTreeMap<String, Attribute>,
}

impl KernelParam {
    pub fn input(&self, slot: &str) -> Result<&Variable> {
        self.optional_input(slot)
            .ok_or_else(|| anyhow!("`{}` has no input bound to slot `{slot}`", self.op_type))
    }

    pub fn optional_input(&self, slot: &str) -> Option<&Variable> {
        self.inputs.get(slot).and_then(|vars| vars.first())
    }

    pub fn inputs(&self, slot: &str) -> &[Variable] {
        self.inputs.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn output(&self, slot: &str) -> Result<&Variable> {
        self.outputs
            .get(slot)
            .and_then(|vars| vars.first())
            .ok_or_else(|| anyhow!("`{}` has no output bound to slot `{slot}`", self.op_type))
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn attr_f32(&self, name: &str, default: f32) -> f32 {
        self.attr(name).and_then(Attribute::as_f32).unwrap_or(default)
    }

    pub fn attr_i64(&self, name: &str, default: i64) -> i64 {
        self.attr(name).and_then(Attribute::as_i64).unwrap_or(default)
    }

    pub fn attr_bool(&self, name: &str, default: bool) -> bool {
        self.attr(name).and_then(Attribute::as_bool).unwrap_or(default)
    }

    pub fn attr_str<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.attr(name).and_then(Attribute::as_str).unwrap_or(default)
    }
}

/// A runnable implementation of one op on one place.
///
/// A kernel instance is owned by exactly one instruction. `prepare` runs once
/// when the runtime program is generated; `run` runs on every execution.
pub trait Kernel: Send {
    fn prepare(&mut self, param: &KernelParam, ctx: &mut dyn Context) -> Result<()> {
        let _ = (param, ctx);
        Ok(())
    }

    fn run(&mut self, param: &KernelParam, ctx: &mut dyn Context) -> Result<()>;
}
