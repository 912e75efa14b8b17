//! Concrete runtime shapes.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Logical dimensions of a materialized tensor. Rank zero denotes a scalar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    pub fn new<D: AsRef<[usize]>>(dims: D) -> Self {
        Shape {
            dims: SmallVec::from_slice(dims.as_ref()),
        }
    }

    pub fn scalar() -> Self {
        Shape::default()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total element count; a scalar holds one element.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Product of the dims in `range`, used to flatten operands into matrices.
    pub fn flatten_range(&self, start: usize, end: usize) -> usize {
        self.dims[start.min(self.rank())..end.min(self.rank())]
            .iter()
            .product()
    }

    /// Compares against a build-time shape where `-1` stands for any size.
    pub fn matches_spec(&self, spec: &[i64]) -> bool {
        self.rank() == spec.len()
            && self
                .dims
                .iter()
                .zip(spec)
                .all(|(&actual, &expected)| expected < 0 || actual as i64 == expected)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape {
            dims: SmallVec::from_vec(dims),
        }
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, dim) in self.dims.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::Shape;

    #[test]
    fn scalar_has_one_element() {
        assert_eq!(Shape::scalar().num_elements(), 1);
        assert_eq!(Shape::scalar().rank(), 0);
    }

    #[test]
    fn matches_spec_honours_dynamic_dims() {
        let shape = Shape::new([3, 4]);
        assert!(shape.matches_spec(&[-1, 4]));
        assert!(shape.matches_spec(&[3, 4]));
        assert!(!shape.matches_spec(&[3, 5]));
        assert!(!shape.matches_spec(&[-1]));
    }
}
