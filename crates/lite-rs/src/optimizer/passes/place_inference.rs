use crate::error::BuildError;
use crate::graph::ProgramDesc;
use crate::optimizer::{OptimizeContext, PassResult, PassStage, ProgramPass};

/// Records, per op, the registered kernels compatible with the valid places.
#[derive(Default)]
pub struct PlaceInferencePass;

impl PlaceInferencePass {
    const NAME: &'static str = "place_inference_pass";
}

impl ProgramPass for PlaceInferencePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stage(&self) -> PassStage {
        PassStage::PlaceInference
    }

    fn run(
        &self,
        program: &mut ProgramDesc,
        cx: &mut OptimizeContext<'_>,
    ) -> Result<PassResult, BuildError> {
        let candidates: Vec<Vec<_>> = program
            .blocks
            .iter()
            .map(|block| {
                block
                    .ops
                    .iter()
                    .map(|op| cx.compatible_kernels(&op.op_type))
                    .collect()
            })
            .collect();
        cx.candidates = candidates;
        Ok(PassResult::default())
    }
}
