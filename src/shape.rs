use serde::{Serialize, Deserialize};

use crate::internal::*;


/// The shape of a [Tensor](crate::Tensor).
///
/// Tensors are always stored contiguously in row-major order,
/// so dimensions are all there is to a shape.

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
  pub dims: Vec<usize>,
}

impl Shape {
  pub fn new(dims: &[usize]) -> Self {
    Self { dims: dims.to_vec() }
  }

  /// Column vector of the given length.

  pub fn column(len: usize) -> Self {
    Self::new(&[len, 1])
  }

  pub fn size(&self) -> usize {
    self.dims.iter().product()
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  pub fn is_scalar(&self) -> bool {
    self.size() == 1
  }

  pub fn is_column(&self) -> bool {
    self.rank() == 2 && self.dims[1] == 1
  }

  pub fn strides(&self) -> Vec<usize> {
    let mut strides = vec![1; self.rank()];
    for i in (1..self.rank()).rev() {
      strides[i - 1] = self.dims[i] * strides[i];
    }
    strides
  }

  pub fn squeeze(&self) -> Self {
    Self { dims: self.dims.iter().copied().filter(|&n| n != 1 ).collect() }
  }

  pub fn at_or(&self, idx: isize, or: usize) -> usize {
    let off_bounds = if idx < 0 {
      idx.unsigned_abs() > self.rank()
    } else {
      idx as usize >= self.rank()
    };
    if off_bounds { or } else { self[idx] }
  }

  /// Result shape of an additive combination, following the single
  /// broadcasting rule: a size-1 operand combines with any shape.

  pub fn broadcast(&self, other: &Self) -> Option<Self> {
    if self == other {
      Some(self.clone())
    } else if other.is_scalar() {
      Some(self.clone())
    } else if self.is_scalar() {
      Some(other.clone())
    } else {
      None
    }
  }

  pub fn transpose(&self) -> Self {
    let mut dims = self.dims.clone();
    let rank = dims.len();
    if rank >= 2 {
      dims.swap(rank - 1, rank - 2);
    }
    Self { dims }
  }
}

impl From<&[usize]> for Shape {
  fn from(dims: &[usize]) -> Self {
    Self::new(dims)
  }
}

impl<const N: usize> From<[usize; N]> for Shape {
  fn from(dims: [usize; N]) -> Self {
    Self::new(&dims)
  }
}

impl std::ops::Index<isize> for Shape {
  type Output = usize;

  fn index(&self, i: isize) -> &usize {
    let idx = negative_index(i, self.rank(), false);
    &self.dims[idx]
  }
}

impl std::fmt::Display for Shape {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Shape{:?}", self.dims)
  }
}
