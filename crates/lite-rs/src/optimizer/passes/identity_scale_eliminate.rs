use crate::error::BuildError;
use crate::graph::ProgramDesc;
use crate::optimizer::passes::is_observed;
use crate::optimizer::{OptimizeContext, PassResult, PassStage, ProgramPass};

/// Removes `scale` ops with scale 1 and bias 0, rewiring their consumers to
/// read the scale input directly. Scales whose output is fetched or
/// persistable are kept so the output name stays observable.
///
/// Nested blocks read names of their ancestors, so observation, writers and
/// renaming are checked over every block of the program.
#[derive(Default)]
pub struct IdentityScaleEliminatePass;

impl IdentityScaleEliminatePass {
    const NAME: &'static str = "identity_scale_eliminate_pass";
}

fn is_identity_scale(
    program: &ProgramDesc,
    block_idx: usize,
    index: usize,
) -> Option<(String, String)> {
    let op = &program.blocks[block_idx].ops[index];
    if op.op_type != "scale"
        || op.attr_f32_or("scale", 1.0) != 1.0
        || op.attr_f32_or("bias", 0.0) != 0.0
    {
        return None;
    }
    let input = op.input("X").first()?.clone();
    let output = op.output("Out").first()?.clone();
    if input == output {
        return None;
    }
    for (idx, block) in program.blocks.iter().enumerate() {
        if is_observed(block, &output) {
            return None;
        }
        // A nested declaration of either name shadows the one being rewired.
        let shadows = block.var(&output).is_some() || block.var(&input).is_some();
        if idx != block_idx && shadows {
            return None;
        }
    }
    let writers = program
        .blocks
        .iter()
        .flat_map(|block| &block.ops)
        .filter(|o| o.output_names().any(|n| n == output))
        .count();
    (writers == 1).then_some((input, output))
}

impl ProgramPass for IdentityScaleEliminatePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stage(&self) -> PassStage {
        PassStage::Canonicalize
    }

    fn run(
        &self,
        program: &mut ProgramDesc,
        _cx: &mut OptimizeContext<'_>,
    ) -> Result<PassResult, BuildError> {
        let mut erased = 0usize;
        for block_idx in 0..program.blocks.len() {
            let mut index = 0;
            while index < program.blocks[block_idx].ops.len() {
                let Some((input, output)) = is_identity_scale(program, block_idx, index) else {
                    index += 1;
                    continue;
                };
                let block = &mut program.blocks[block_idx];
                block.ops.remove(index);
                block.vars.retain(|v| v.name != output);
                for op in program.blocks.iter_mut().flat_map(|b| &mut b.ops) {
                    op.rename_input(&output, &input);
                }
                erased += 1;
            }
        }
        Ok(PassResult {
            changed: erased > 0,
            erased_ops: erased,
            ..PassResult::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BlockDesc, OpDesc, VarDesc};
    use crate::kernel::KernelRegistry;
    use crate::ops::OpRegistry;

    fn identity(input: &str, output: &str) -> OpDesc {
        OpDesc::new("scale")
            .with_input("X", &[input])
            .with_output("Out", &[output])
    }

    fn run_pass(program: &mut ProgramDesc) -> PassResult {
        let kernels = KernelRegistry::new();
        let mut cx = OptimizeContext::new(&[], &kernels, OpRegistry::global());
        IdentityScaleEliminatePass.run(program, &mut cx).unwrap()
    }

    fn two_blocks(sub_ops: Vec<OpDesc>, sub_vars: &[&str]) -> ProgramDesc {
        let mut main = BlockDesc::new(0, None);
        main.vars = ["x", "s"].into_iter().map(VarDesc::new).collect();
        main.ops.push(identity("x", "s"));
        let mut sub = BlockDesc::new(1, Some(0));
        sub.vars = sub_vars.iter().copied().map(VarDesc::new).collect();
        sub.ops = sub_ops;
        ProgramDesc {
            blocks: vec![main, sub],
            ..ProgramDesc::default()
        }
    }

    #[test]
    fn readers_in_nested_blocks_are_rewired() {
        let relu = OpDesc::new("relu")
            .with_input("X", &["s"])
            .with_output("Out", &["y"]);
        let mut program = two_blocks(vec![relu], &["y"]);
        let result = run_pass(&mut program);
        assert_eq!(result.erased_ops, 1);
        assert!(program.blocks[0].ops.is_empty());
        assert!(program.blocks[0].var("s").is_none());
        assert_eq!(program.blocks[1].ops[0].input("X"), &["x".to_string()]);
    }

    #[test]
    fn output_fetched_from_a_nested_block_is_kept() {
        let fetch = OpDesc::new("fetch")
            .with_input("X", &["s"])
            .with_output("Out", &["out"]);
        let mut program = two_blocks(vec![fetch], &["out"]);
        assert_eq!(run_pass(&mut program).erased_ops, 0);
        assert_eq!(program.blocks[0].ops.len(), 1);
    }

    #[test]
    fn second_writer_in_a_nested_block_keeps_the_scale() {
        let writer = OpDesc::new("relu")
            .with_input("X", &["x"])
            .with_output("Out", &["s"]);
        let mut program = two_blocks(vec![writer], &[]);
        assert_eq!(run_pass(&mut program).erased_ops, 0);
    }

    #[test]
    fn shadowing_declaration_keeps_the_scale() {
        let relu = OpDesc::new("relu")
            .with_input("X", &["s"])
            .with_output("Out", &["y"]);
        let mut program = two_blocks(vec![relu], &["x", "y"]);
        assert_eq!(run_pass(&mut program).erased_ops, 0);
        assert_eq!(program.blocks[1].ops[0].input("X"), &["s".to_string()]);
    }
}
