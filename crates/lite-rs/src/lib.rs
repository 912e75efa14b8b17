//! lite-rs: a graph-compiling inference engine.
//!
//! A serialized program descriptor is optimized against an ordered list of
//! candidate [`place::Place`]s, lowered into a [`program::RuntimeProgram`] bound
//! to device contexts, and executed repeatedly through a [`predictor::Predictor`].

pub mod device;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod model_io;
pub mod ops;
pub mod optimizer;
pub mod place;
pub mod predictor;
pub mod program;
pub mod registry;
pub mod scope;
pub mod tensor;
pub mod variable;

mod env;

/// Version of the engine, as reported by [`Predictor::version`].
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::{BuildError, InputValidationError, RunError};
pub use place::{DataLayout, Place, PrecisionType, TargetType};
pub use predictor::{Predictor, PredictorConfig, PredictorError};
pub use scope::Scope;
pub use tensor::{DType, Shape, Tensor};
pub use variable::{VarValue, Variable};
