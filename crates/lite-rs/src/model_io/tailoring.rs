//! Lists of the ops and kernels an optimized program needs, used to build
//! trimmed deployments.

use super::ModelIoError;
use crate::graph::ProgramDesc;
use crate::kernel::KernelRegistry;
use crate::ops::OpRegistry;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub const OPS_LIST: &str = ".tailored_ops_list";
pub const OPS_SOURCE_LIST: &str = ".tailored_ops_source_list";
pub const KERNELS_LIST: &str = ".tailored_kernels_list";
pub const KERNELS_SOURCE_LIST: &str = ".tailored_kernels_source_list";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailoringInfo {
    pub ops: BTreeSet<String>,
    pub op_sources: BTreeSet<String>,
    /// Binding keys, `op/alias/target/precision/layout`.
    pub kernels: BTreeSet<String>,
    pub kernel_sources: BTreeSet<String>,
}

impl TailoringInfo {
    pub fn collect(desc: &ProgramDesc, ops: &OpRegistry, kernels: &KernelRegistry) -> Self {
        let mut info = TailoringInfo::default();
        for op in desc.blocks.iter().flat_map(|b| b.ops.iter()) {
            info.ops.insert(op.op_type.clone());
            if let Some(def) = ops.get(&op.op_type) {
                info.op_sources.insert(def.source.to_string());
            }
            let Some(binding) = &op.binding else {
                continue;
            };
            info.kernels.insert(binding.key());
            if let Some(registration) = kernels.find(binding) {
                if !registration.source.is_empty() {
                    info.kernel_sources.insert(registration.source.clone());
                }
            }
        }
        info
    }

    /// Writes the four lists into `dir`, one entry per line.
    pub fn write_to(&self, dir: &Path) -> Result<(), ModelIoError> {
        let lists = [
            (OPS_LIST, &self.ops),
            (OPS_SOURCE_LIST, &self.op_sources),
            (KERNELS_LIST, &self.kernels),
            (KERNELS_SOURCE_LIST, &self.kernel_sources),
        ];
        for (file, entries) in lists {
            let path = dir.join(file);
            let mut text = String::new();
            for entry in entries {
                text.push_str(entry);
                text.push('\n');
            }
            fs::write(&path, text).map_err(|err| ModelIoError::io(&path, err))?;
        }
        Ok(())
    }

    /// Reads lists previously written by [`TailoringInfo::write_to`].
    pub fn read_from(dir: &Path) -> Result<Self, ModelIoError> {
        let read = |file: &str| -> Result<BTreeSet<String>, ModelIoError> {
            let path = dir.join(file);
            let text = fs::read_to_string(&path).map_err(|err| ModelIoError::io(&path, err))?;
            Ok(text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect())
        };
        Ok(TailoringInfo {
            ops: read(OPS_LIST)?,
            op_sources: read(OPS_SOURCE_LIST)?,
            kernels: read(KERNELS_LIST)?,
            kernel_sources: read(KERNELS_SOURCE_LIST)?,
        })
    }
}
