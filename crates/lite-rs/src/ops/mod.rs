//! Operator definitions: versioned type and shape contracts used by inference.
//!
//! The registry is independent of kernels; an op can be known here and have
//! no kernel on a given place, or the reverse. Ops absent from the registry
//! keep the types declared in the program.

mod builtin;

use crate::graph::{OpDesc, VarKind};
use crate::tensor::DType;
use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// Build-time type information tracked per variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarInfo {
    pub kind: VarKind,
    pub dtype: Option<DType>,
    pub shape: Option<Vec<i64>>,
}

impl VarInfo {
    pub fn tensor(dtype: DType, shape: Option<Vec<i64>>) -> Self {
        VarInfo {
            kind: VarKind::LodTensor,
            dtype: Some(dtype),
            shape,
        }
    }
}

pub type TypeEnv = BTreeMap<String, VarInfo>;

/// Computes output infos from the op and the infos of its inputs.
pub type InferFn = fn(&OpDesc, &TypeEnv) -> Result<Vec<(String, VarInfo)>>;

#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub op_type: &'static str,
    pub version: u32,
    pub infer: InferFn,
    /// Ops the dead-op pass must keep even when their outputs are unused.
    pub has_side_effects: bool,
    /// Source file of the definition, written to tailoring lists.
    pub source: &'static str,
}

pub struct OpRegistry {
    defs: RwLock<HashMap<String, OpDef>>,
}

static GLOBAL_OPS: Lazy<OpRegistry> = Lazy::new(|| {
    let registry = OpRegistry::empty();
    for def in builtin::definitions() {
        registry.register(def);
    }
    registry
});

impl OpRegistry {
    pub fn empty() -> Self {
        OpRegistry {
            defs: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry preloaded with the built-in ops.
    pub fn global() -> &'static OpRegistry {
        &GLOBAL_OPS
    }

    /// Adds or replaces the definition for `def.op_type`.
    pub fn register(&self, def: OpDef) {
        self.defs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(def.op_type.to_string(), def);
    }

    pub fn get(&self, op_type: &str) -> Option<OpDef> {
        self.defs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op_type)
            .copied()
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.get(op_type).is_some()
    }

    pub fn op_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .defs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }
}

/// First variable bound to `slot`, with its info from `env`.
pub fn input_info<'a>(op: &'a OpDesc, env: &'a TypeEnv, slot: &str) -> Result<(&'a str, &'a VarInfo)> {
    let name = op
        .input(slot)
        .first()
        .ok_or_else(|| anyhow!("missing input slot `{slot}`"))?;
    let info = env
        .get(name)
        .ok_or_else(|| anyhow!("input `{name}` has no type information"))?;
    Ok((name.as_str(), info))
}

pub fn output_name<'a>(op: &'a OpDesc, slot: &str) -> Result<&'a str> {
    op.output(slot)
        .first()
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing output slot `{slot}`"))
}

pub fn require_dtype(name: &str, info: &VarInfo) -> Result<DType> {
    info.dtype
        .ok_or_else(|| anyhow!("input `{name}` has no element type"))
}

/// Product of `dims`, or `None` when any dim is dynamic.
pub fn static_product(dims: &[i64]) -> Option<i64> {
    dims.iter()
        .try_fold(1i64, |acc, &d| if d < 0 { None } else { Some(acc * d) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_with_versions() {
        let registry = OpRegistry::global();
        for op in ["feed", "fetch", "mul", "fc", "elementwise_add", "relu", "softmax"] {
            let def = registry.get(op).unwrap_or_else(|| panic!("{op} missing"));
            assert!(def.version >= 1);
        }
        assert!(registry.get("conv2d").is_none());
    }

    #[test]
    fn static_product_stops_at_dynamic_dims() {
        assert_eq!(static_product(&[2, 3, 4]), Some(24));
        assert_eq!(static_product(&[-1, 3]), None);
        assert_eq!(static_product(&[]), Some(1));
    }
}
