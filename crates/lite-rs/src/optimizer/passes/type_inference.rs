use crate::error::BuildError;
use crate::graph::ProgramDesc;
use crate::ops::{TypeEnv, VarInfo};
use crate::optimizer::{OptimizeContext, PassResult, PassStage, ProgramPass};

/// Propagates element types and build-time shapes through every block in op order.
#[derive(Default)]
pub struct TypeInferencePass;

impl TypeInferencePass {
    const NAME: &'static str = "type_inference_pass";
}

impl ProgramPass for TypeInferencePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stage(&self) -> PassStage {
        PassStage::TypeInference
    }

    fn run(
        &self,
        program: &mut ProgramDesc,
        cx: &mut OptimizeContext<'_>,
    ) -> Result<PassResult, BuildError> {
        let mut updated = 0usize;
        for block_idx in 0..program.blocks.len() {
            let mut env = visible_env(program, block_idx);
            for index in 0..program.blocks[block_idx].ops.len() {
                let op = &program.blocks[block_idx].ops[index];
                let Some(def) = cx.ops().get(&op.op_type) else {
                    continue;
                };
                let outputs = (def.infer)(op, &env).map_err(|err| BuildError::TypeInference {
                    block: block_idx,
                    index,
                    op_type: op.op_type.clone(),
                    message: format!("{err:#}"),
                })?;
                for (name, info) in outputs {
                    if apply(program, block_idx, index, &name, &info)? {
                        updated += 1;
                    }
                    env.insert(name, info);
                }
            }
        }
        Ok(PassResult::rewrites(updated))
    }
}

/// Infos of every variable visible from `block_idx`; inner declarations win.
fn visible_env(program: &ProgramDesc, block_idx: usize) -> TypeEnv {
    let mut chain = Vec::new();
    let mut current = Some(block_idx);
    while let Some(idx) = current {
        chain.push(idx);
        current = program.blocks.get(idx).and_then(|b| b.parent_idx);
    }
    let mut env = TypeEnv::new();
    for idx in chain.into_iter().rev() {
        for var in &program.blocks[idx].vars {
            env.insert(
                var.name.clone(),
                VarInfo {
                    kind: var.kind,
                    dtype: var.dtype,
                    shape: var.shape.clone(),
                },
            );
        }
    }
    env
}

/// Writes an inferred info back to the declaring var desc. Returns whether it changed.
fn apply(
    program: &mut ProgramDesc,
    block_idx: usize,
    index: usize,
    name: &str,
    info: &VarInfo,
) -> Result<bool, BuildError> {
    let op_type = program.blocks[block_idx].ops[index].op_type.clone();
    let mut current = Some(block_idx);
    while let Some(idx) = current {
        let parent = program.blocks[idx].parent_idx;
        if let Some(var) = program.blocks[idx].var_mut(name) {
            if var.persistable {
                if let (Some(declared), Some(inferred)) = (var.dtype, info.dtype) {
                    if declared != inferred {
                        return Err(BuildError::TypeInference {
                            block: block_idx,
                            index,
                            op_type,
                            message: format!(
                                "persistable `{name}` is declared {declared} but the op produces {inferred}"
                            ),
                        });
                    }
                }
                return Ok(false);
            }
            let changed = var.dtype != info.dtype || var.shape != info.shape || var.kind != info.kind;
            var.dtype = info.dtype;
            var.shape = info.shape.clone();
            var.kind = info.kind;
            return Ok(changed);
        }
        current = parent;
    }
    Ok(false)
}
