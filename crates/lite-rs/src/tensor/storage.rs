//! Scalar element trait linking Rust types to tensor payload variants.

use super::{dtype::DType, host_tensor::TensorData};
use half::f16;

/// Scalar types that can back a [`TensorData`] payload.
///
/// Implementations route typed views and constructors to the matching payload
/// variant and provide lossy conversions used by `cast`.
pub trait StorageElement: Copy + Default + Send + Sync + PartialEq + 'static {
    const DTYPE: DType;

    fn slice(data: &TensorData) -> Option<&[Self]>;
    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]>;
    fn wrap(values: Vec<Self>) -> TensorData;

    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
}

macro_rules! impl_storage_element {
    ($ty:ty, $variant:ident, $to:expr, $from:expr) => {
        impl StorageElement for $ty {
            const DTYPE: DType = DType::$variant;

            fn slice(data: &TensorData) -> Option<&[Self]> {
                match data {
                    TensorData::$variant(values) => Some(values.as_slice()),
                    _ => None,
                }
            }

            fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]> {
                match data {
                    TensorData::$variant(values) => Some(values.as_mut_slice()),
                    _ => None,
                }
            }

            fn wrap(values: Vec<Self>) -> TensorData {
                TensorData::$variant(values)
            }

            fn to_f64(self) -> f64 {
                let f: fn($ty) -> f64 = $to;
                f(self)
            }

            fn from_f64(v: f64) -> Self {
                let f: fn(f64) -> $ty = $from;
                f(v)
            }
        }
    };
}

impl_storage_element!(f32, F32, |v| v as f64, |v| v as f32);
impl_storage_element!(f16, F16, |v| v.to_f64(), f16::from_f64);
impl_storage_element!(i8, I8, |v| v as f64, |v| v as i8);
impl_storage_element!(i32, I32, |v| v as f64, |v| v as i32);
impl_storage_element!(i64, I64, |v| v as f64, |v| v as i64);
impl_storage_element!(bool, Bool, |v| if v { 1.0 } else { 0.0 }, |v| v != 0.0);
