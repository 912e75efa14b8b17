//! Incremental construction of program descriptors.

use super::desc::{Attribute, BlockDesc, OpDesc, ProgramDesc, VarDesc, VarKind};
use crate::ops::OpRegistry;
use crate::tensor::DType;

/// Builds a single-block program, declaring variables as ops reference them.
///
/// ```ignore
/// let mut b = ProgramDescBuilder::new();
/// b.feed("x", DType::F32, &[-1, 4]);
/// b.persistable("w", DType::F32, &[4, 2]);
/// b.op(OpDesc::new("mul").with_input("X", &["x"]).with_input("Y", &["w"]).with_output("Out", &["y"]));
/// b.fetch("y");
/// let program = b.finish();
/// ```
#[derive(Debug)]
pub struct ProgramDescBuilder {
    block: BlockDesc,
    feeds: usize,
    fetches: usize,
}

impl Default for ProgramDescBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramDescBuilder {
    pub fn new() -> Self {
        Self {
            block: BlockDesc::new(0, None),
            feeds: 0,
            fetches: 0,
        }
    }

    fn declare(&mut self, var: VarDesc) {
        match self.block.var_mut(&var.name) {
            Some(existing) => *existing = var,
            None => self.block.vars.push(var),
        }
    }

    /// Declares a graph input and emits its `feed` op with the next column.
    pub fn feed(&mut self, name: &str, dtype: DType, shape: &[i64]) -> &mut Self {
        self.declare(VarDesc {
            dtype: Some(dtype),
            shape: Some(shape.to_vec()),
            ..VarDesc::new(name)
        });
        let col = self.feeds as i32;
        self.feeds += 1;
        self.block.ops.push(
            OpDesc::new("feed")
                .with_output("Out", &[name])
                .with_attr("col", col),
        );
        self
    }

    /// Declares a weight that must be present in the root scope at build time.
    pub fn persistable(&mut self, name: &str, dtype: DType, shape: &[i64]) -> &mut Self {
        self.declare(VarDesc {
            dtype: Some(dtype),
            shape: Some(shape.to_vec()),
            persistable: true,
            ..VarDesc::new(name)
        });
        self
    }

    /// Declares an intermediate tensor with no type information yet.
    pub fn var(&mut self, name: &str) -> &mut Self {
        if self.block.var(name).is_none() {
            self.block.vars.push(VarDesc::new(name));
        }
        self
    }

    pub fn tensor_array(&mut self, name: &str, dtype: DType) -> &mut Self {
        self.declare(VarDesc {
            kind: VarKind::TensorArray,
            dtype: Some(dtype),
            ..VarDesc::new(name)
        });
        self
    }

    /// Appends `op`, declaring any variable it names that is not declared yet.
    pub fn op(&mut self, op: OpDesc) -> &mut Self {
        let names: Vec<String> = op
            .input_names()
            .chain(op.output_names())
            .map(str::to_string)
            .collect();
        for name in names {
            self.var(&name);
        }
        self.block.ops.push(op);
        self
    }

    /// Convenience for single-input, single-output ops.
    pub fn unary(
        &mut self,
        op_type: &str,
        input: &str,
        output: &str,
        attrs: &[(&str, Attribute)],
    ) -> &mut Self {
        let mut op = OpDesc::new(op_type)
            .with_input("X", &[input])
            .with_output("Out", &[output]);
        for (name, value) in attrs {
            op.attrs.insert(name.to_string(), value.clone());
        }
        self.op(op)
    }

    /// Convenience for `X`/`Y` → `Out` ops.
    pub fn binary(&mut self, op_type: &str, x: &str, y: &str, output: &str) -> &mut Self {
        self.op(
            OpDesc::new(op_type)
                .with_input("X", &[x])
                .with_input("Y", &[y])
                .with_output("Out", &[output]),
        )
    }

    /// Marks `name` as a graph output with the next fetch column.
    pub fn fetch(&mut self, name: &str) -> &mut Self {
        let col = self.fetches as i32;
        self.fetches += 1;
        let out = fetch_output_name(name);
        self.var(&out);
        self.block.ops.push(
            OpDesc::new("fetch")
                .with_input("X", &[name])
                .with_output("Out", &[out.as_str()])
                .with_attr("col", col),
        );
        self
    }

    /// Finishes the program, stamping the version of every registered op it uses.
    pub fn finish(self) -> ProgramDesc {
        let mut program = ProgramDesc {
            blocks: vec![self.block],
            ..ProgramDesc::default()
        };
        let registry = OpRegistry::global();
        for op_type in program.op_types() {
            if let Some(def) = registry.get(&op_type) {
                program.op_versions.insert(op_type, def.version);
            }
        }
        program
    }
}

/// Name of the variable a `fetch` of `name` writes into.
pub fn fetch_output_name(name: &str) -> String {
    format!("{name}.fetch")
}
