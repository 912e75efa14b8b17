//! Graph descriptor: the serializable program a predictor compiles.

pub mod builder;
pub mod desc;

pub use builder::{fetch_output_name, ProgramDescBuilder};
pub use desc::{
    Attribute, BlockDesc, GraphError, OpDesc, ProgramDesc, VarDesc, VarKind,
    PROGRAM_FORMAT_VERSION,
};
