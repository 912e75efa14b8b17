use crate::error::BuildError;
use crate::graph::{BlockDesc, OpDesc, ProgramDesc};
use crate::optimizer::passes::{pick_kernel, sole_consumer};
use crate::optimizer::{OptimizeContext, PassResult, PassStage, ProgramPass};

/// Fuses `mul(x, w) → elementwise_add(·, b) [→ relu]` into a single `fc`.
///
/// Requires a persistable rank-2 weight and rank-1 bias, single-consumer
/// intermediates, and a registered `fc` kernel for the valid places.
#[derive(Default)]
pub struct FcFusePass;

impl FcFusePass {
    const NAME: &'static str = "fc_fuse_pass";
}

struct FcMatch {
    mul: usize,
    add: usize,
    relu: Option<usize>,
    fused: OpDesc,
    intermediates: Vec<String>,
}

fn is_persistable_of_rank(block: &BlockDesc, name: &str, rank: usize) -> bool {
    block
        .var(name)
        .map(|v| v.persistable && v.shape.as_ref().map_or(false, |s| s.len() == rank))
        .unwrap_or(false)
}

fn match_at(block: &BlockDesc, index: usize) -> Option<FcMatch> {
    let mul = &block.ops[index];
    if mul.op_type != "mul" || mul.attr_i64_or("y_num_col_dims", 1) != 1 {
        return None;
    }
    let x = mul.input("X").first()?;
    let w = mul.input("Y").first()?;
    let mul_out = mul.output("Out").first()?;
    if !is_persistable_of_rank(block, w, 2) {
        return None;
    }
    let in_num_col_dims = mul.attr_i64_or("x_num_col_dims", 1);

    let add_idx = sole_consumer(block, mul_out)?;
    let add = &block.ops[add_idx];
    if add.op_type != "elementwise_add" || add.input("X").first() != Some(mul_out) {
        return None;
    }
    let axis = add.attr_i64_or("axis", -1);
    if axis != -1 && axis != in_num_col_dims {
        return None;
    }
    let bias = add.input("Y").first()?;
    if !is_persistable_of_rank(block, bias, 1) {
        return None;
    }
    let add_out = add.output("Out").first()?;

    let relu_idx = sole_consumer(block, add_out).filter(|&i| block.ops[i].op_type == "relu");
    let (out, activation, intermediates) = match relu_idx {
        Some(i) => (
            block.ops[i].output("Out").first()?,
            "relu",
            vec![mul_out.clone(), add_out.clone()],
        ),
        None => (add_out, "", vec![mul_out.clone()]),
    };

    let fused = OpDesc::new("fc")
        .with_input("Input", &[x.as_str()])
        .with_input("W", &[w.as_str()])
        .with_input("Bias", &[bias.as_str()])
        .with_output("Out", &[out.as_str()])
        .with_attr("in_num_col_dims", in_num_col_dims as i32)
        .with_attr("activation_type", activation);
    Some(FcMatch {
        mul: index,
        add: add_idx,
        relu: relu_idx,
        fused,
        intermediates,
    })
}

impl ProgramPass for FcFusePass {
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
        let Some(kernel) = pick_kernel(&cx.compatible_kernels("fc"), cx.valid_places()) else {
            return Ok(PassResult::default());
        };
        let binding = kernel.binding();

        let mut fused_count = 0usize;
        let mut erased = 0usize;
        for block in &mut program.blocks {
            let mut index = 0;
            while index < block.ops.len() {
                let Some(found) = match_at(block, index) else {
                    index += 1;
                    continue;
                };
                let mut fused = found.fused;
                fused.binding = Some(binding.clone());
                let last = found.relu.unwrap_or(found.add);
                block.ops[last] = fused;
                let mut doomed: Vec<usize> = [Some(found.mul), Some(found.add), found.relu]
                    .into_iter()
                    .flatten()
                    .filter(|&i| i != last)
                    .collect();
                doomed.sort_unstable();
                for &i in doomed.iter().rev() {
                    block.ops.remove(i);
                }
                erased += doomed.len();
                block
                    .vars
                    .retain(|v| !found.intermediates.contains(&v.name));
                fused_count += 1;
            }
        }
        Ok(PassResult {
            changed: fused_count > 0,
            rewrites_applied: fused_count,
            erased_ops: erased,
            ..PassResult::default()
        })
    }
}
