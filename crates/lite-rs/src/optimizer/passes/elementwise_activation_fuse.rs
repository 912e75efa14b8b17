use crate::error::BuildError;
use crate::graph::{BlockDesc, OpDesc, ProgramDesc};
use crate::optimizer::passes::{pick_kernel, sole_consumer};
use crate::optimizer::{OptimizeContext, PassResult, PassStage, ProgramPass};

const FUSED_OP: &str = "fusion_elementwise_add_activation";

/// Fuses `elementwise_add → relu|sigmoid` into `fusion_elementwise_add_activation`.
#[derive(Default)]
pub struct ElementwiseActivationFusePass;

impl ElementwiseActivationFusePass {
    const NAME: &'static str = "elementwise_activation_fuse_pass";
}

fn match_at(block: &BlockDesc, index: usize) -> Option<(usize, OpDesc, String)> {
    let add = &block.ops[index];
    if add.op_type != "elementwise_add" {
        return None;
    }
    let add_out = add.output("Out").first()?;
    let act_idx = sole_consumer(block, add_out)?;
    let act = &block.ops[act_idx];
    if !matches!(act.op_type.as_str(), "relu" | "sigmoid") {
        return None;
    }
    let mut fused = OpDesc::new(FUSED_OP);
    fused.inputs = add.inputs.clone();
    fused.outputs = act.outputs.clone();
    fused.attrs = add.attrs.clone();
    fused
        .attrs
        .insert("act_type".to_string(), act.op_type.as_str().into());
    Some((act_idx, fused, add_out.clone()))
}

impl ProgramPass for ElementwiseActivationFusePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stage(&self) -> PassStage {
        PassStage::Fusion
    }

    fn run(
        &self,
        program: &mut ProgramDesc,
        cx: &mut OptimizeContext<'_>,
    ) -> Result<PassResult, BuildError> {
        let Some(kernel) = pick_kernel(&cx.compatible_kernels(FUSED_OP), cx.valid_places()) else {
            return Ok(PassResult::default());
        };
        let binding = kernel.binding();

        let mut fused_count = 0usize;
        for block in &mut program.blocks {
            let mut index = 0;
            while index < block.ops.len() {
                let Some((act_idx, mut fused, intermediate)) = match_at(block, index) else {
                    index += 1;
                    continue;
                };
                fused.binding = Some(binding.clone());
                block.ops[act_idx] = fused;
                block.ops.remove(index);
                block.vars.retain(|v| v.name != intermediate);
                fused_count += 1;
            }
        }
        Ok(PassResult {
            changed: fused_count > 0,
            rewrites_applied: fused_count,
            erased_ops: fused_count,
            ..PassResult::default()
        })
    }
}
