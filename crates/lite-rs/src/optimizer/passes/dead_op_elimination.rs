use std::collections::HashSet;

use crate::error::BuildError;
use crate::graph::ProgramDesc;
use crate::optimizer::{OptimizeContext, PassResult, PassStage, ProgramPass};

/// Drops ops whose outputs never reach a fetch, a persistable, or an op with
/// side effects. Ops unknown to the op registry are kept.
#[derive(Default)]
pub struct DeadOpEliminationPass;

impl DeadOpEliminationPass {
    const NAME: &'static str = "dead_op_elimination_pass";
}

impl ProgramPass for DeadOpEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stage(&self) -> PassStage {
        PassStage::Canonicalize
    }

    fn run(
        &self,
        program: &mut ProgramDesc,
        cx: &mut OptimizeContext<'_>,
    ) -> Result<PassResult, BuildError> {
        let reads_per_block: Vec<HashSet<String>> = program
            .blocks
            .iter()
            .map(|b| {
                b.ops
                    .iter()
                    .flat_map(|op| op.input_names())
                    .map(str::to_string)
                    .collect()
            })
            .collect();

        let mut removed = 0usize;
        for (block_idx, block) in program.blocks.iter_mut().enumerate() {
            let persistable: HashSet<String> = block
                .vars
                .iter()
                .filter(|v| v.persistable)
                .map(|v| v.name.clone())
                .collect();

            // Reads from other blocks keep their producers here alive.
            let mut live_vars: HashSet<String> = reads_per_block
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != block_idx)
                .flat_map(|(_, reads)| reads.iter().cloned())
                .collect();
            let mut keep = vec![false; block.ops.len()];
            for (idx, op) in block.ops.iter().enumerate().rev() {
                let pinned = match cx.ops().get(&op.op_type) {
                    Some(def) => def.has_side_effects,
                    None => true,
                };
                let live = pinned
                    || op
                        .output_names()
                        .any(|n| live_vars.contains(n) || persistable.contains(n));
                if live {
                    keep[idx] = true;
                    live_vars.extend(op.input_names().map(str::to_string));
                }
            }

            let before = block.ops.len();
            let mut flags = keep.into_iter();
            block.ops.retain(|_| flags.next().unwrap_or(true));
            removed += before - block.ops.len();
        }

        if removed > 0 {
            let referenced: HashSet<String> = program
                .blocks
                .iter()
                .flat_map(|b| b.ops.iter())
                .flat_map(|op| op.input_names().chain(op.output_names()))
                .map(str::to_string)
                .collect();
            for block in &mut program.blocks {
                block
                    .vars
                    .retain(|v| v.persistable || referenced.contains(&v.name));
            }
        }
        Ok(PassResult {
            changed: removed > 0,
            erased_ops: removed,
            ..PassResult::default()
        })
    }
}
