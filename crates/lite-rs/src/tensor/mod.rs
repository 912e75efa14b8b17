//! Host tensors, element types, and shapes.

pub mod dtype;
pub mod host_tensor;
pub mod shape;
pub mod storage;

pub use dtype::DType;
pub use host_tensor::{Tensor, TensorData};
pub use shape::Shape;
pub use storage::StorageElement;
