use std::fmt::Debug;

use itertools::Itertools;
use rand::Rng;
use serde::{Serialize, Deserialize};

mod cops;
mod lops;

use crate::{
  internal::*,
  shape::Shape,
  scalar::{ Inner, Numeric, Real },
};


/// Dense, row-major multidimensional array.
///
/// Tensors are values: arithmetic always produces a new tensor and
/// cloning copies the buffer. Graph nodes cache them as forward values
/// and as flattened `[size, 1]` gradients.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tensor<T: Inner> {
  shape: Shape,
  data: Vec<T>,
}

impl<T: Inner> PartialEq for Tensor<T> {
  fn eq(&self, rhs: &Self) -> bool {
    self.shape.squeeze() == rhs.shape.squeeze() && self.data == rhs.data
  }
}

impl<T: Inner> Tensor<T> {
  pub fn from_shape(shape: Shape, data: Vec<T>) -> Self {
    assert_eq!(shape.size(), data.len(),
      "{} doesn't match data length {}", shape, data.len());
    Self { shape, data }
  }

  pub fn new(shape: &[usize], data: Vec<T>) -> Self {
    Self::from_shape(Shape::new(shape), data)
  }

  pub fn vec(vec: &[T]) -> Self {
    Self::new(&[vec.len()], vec.to_vec())
  }

  /// Column vector `[len, 1]`.

  pub fn column(vec: &[T]) -> Self {
    Self::new(&[vec.len(), 1], vec.to_vec())
  }

  /// Matrix from equally long rows.

  pub fn matrix(rows: &[&[T]]) -> Self {
    let cols = rows.first().map(|row| row.len() ).unwrap_or(0);
    assert!(rows.iter().all(|row| row.len() == cols ), "Matrix rows differ in length");
    let data = rows.iter().flat_map(|row| row.iter().copied() ).collect();
    Self::new(&[rows.len(), cols], data)
  }

  pub fn scalar(item: T) -> Self {
    Self::new(&[1, 1], vec![item])
  }

  pub fn fill(shape: &[usize], filler: T) -> Self {
    Self::new(shape, vec![filler; shape.iter().product()])
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn dims(&self) -> &[usize] {
    &self.shape.dims
  }

  pub fn size(&self) -> usize {
    self.shape.size()
  }

  pub fn rank(&self) -> usize {
    self.shape.rank()
  }

  pub fn dim(&self, idx: isize) -> usize {
    self.shape[idx]
  }

  pub fn raw(&self) -> &[T] {
    &self.data
  }

  pub fn raw_mut(&mut self) -> &mut [T] {
    &mut self.data
  }

  pub fn into_raw(self) -> Vec<T> {
    self.data
  }

  pub fn item(&self) -> T {
    assert!(self.size() == 1,
      "Can't extract item from non-scalar {}", self.shape);
    self.data[0]
  }

  /// Element at a multidimensional index.

  pub fn at(&self, indices: &[usize]) -> T {
    assert_eq!(indices.len(), self.rank(), "Index rank doesn't match {}", self.shape);
    let i: usize = indices.iter()
      .zip(self.shape.strides())
      .map(|(&i, s)| i * s )
      .sum();
    self.data[i]
  }

  pub fn reshape(&self, dims: &[usize]) -> Self {
    let shape = Shape::new(dims);
    assert_eq!(shape.size(), self.size(), "Cannot reshape {} to {}", self.shape, shape);
    Self { shape, data: self.data.clone() }
  }

  /// Flattened `[size, 1]` copy, the layout used for gradients.

  pub fn flatten(&self) -> Self {
    self.reshape(&[self.size(), 1])
  }

  /// Swap the last two dimensions.

  pub fn transpose(&self) -> Self {
    if self.rank() < 2 {
      return self.reshape(&[1, self.size()])
    }
    let rows = self.dim(-2);
    let cols = self.dim(-1);
    let batches = self.size() / (rows * cols).max(1);
    let mut data = Vec::with_capacity(self.size());
    for b in 0..batches {
      let offset = b * rows * cols;
      for j in 0..cols {
        for i in 0..rows {
          data.push(self.data[offset + i * cols + j]);
        }
      }
    }
    Self { shape: self.shape.transpose(), data }
  }

  pub fn zip<O,F>(&self, rhs: &Self, cb: F) -> Tensor<O>
  where
    O: Inner,
    F: Fn((T, T)) -> O,
  {
    let shape = self.shape.broadcast(&rhs.shape)
      .unwrap_or_else(|| panic!("Could not broadcast {} & {}", self.shape, rhs.shape) );
    let data: Vec<O> = if self.shape == rhs.shape {
      self.data.iter().copied()
        .zip_eq(rhs.data.iter().copied())
        .map(cb)
        .collect()
    } else if rhs.size() == 1 {
      let b = rhs.data[0];
      self.data.iter().map(|&a| cb((a, b)) ).collect()
    } else {
      let a = self.data[0];
      rhs.data.iter().map(|&b| cb((a, b)) ).collect()
    };
    Tensor::from_shape(shape, data)
  }

  pub fn vectorize<O,F>(&self, cb: F) -> Tensor<O>
  where
    O: Inner,
    F: FnMut(T) -> O,
  {
    let data = self.data.iter().copied().map(cb).collect();
    Tensor::from_shape(self.shape.clone(), data)
  }
}

impl<T: Numeric> Tensor<T> {
  pub fn ones(shape: &[usize]) -> Self {
    Self::fill(shape, T::one())
  }

  pub fn zeros(shape: &[usize]) -> Self {
    Self::fill(shape, T::zero())
  }

  pub fn arrange(shape: &[usize], start: T, step: T) -> Self {
    Self::new(shape, (0..shape.iter().product())
      .map(|i| T::from(i).unwrap() * step + start )
      .collect())
  }

  /// Column vector with a single one at `idx`.

  pub fn hot_encode(idx: usize, size: usize) -> Self {
    let mut a = vec![T::zero(); size];
    a[idx] = T::one();
    Self::new(&[size, 1], a)
  }

  /// Identity matrix.

  pub fn eye(size: usize) -> Self {
    let mut data = vec![T::zero(); size * size];
    for i in 0..size {
      data[i * size + i] = T::one();
    }
    Self::new(&[size, size], data)
  }

  /// Square matrix with the given values on its diagonal.

  pub fn diag(values: &[T]) -> Self {
    let size = values.len();
    let mut data = vec![T::zero(); size * size];
    for (i, &v) in values.iter().enumerate() {
      data[i * size + i] = v;
    }
    Self::new(&[size, size], data)
  }
}

impl<T: Real> Tensor<T> {
  /// Uniform samples in `[0, 1)`.

  pub fn rand(shape: &[usize], rng: &mut impl Rng) -> Self {
    let len = shape.iter().product();
    let data = (0..len).map(|_| rng.gen_range(T::zero(), T::one()) ).collect();
    Self::new(shape, data)
  }

  /// Standard normal samples.

  pub fn randn(shape: &[usize], rng: &mut impl Rng) -> Self {
    let len = shape.iter().product();
    let mut data = vec![T::zero(); len];
    for i in 0..(len + 1) / 2 {
      let j = i * 2;
      let (r1, r2): (T, T) = randn(rng);
      data[j] = r1;
      data[(j + 1) % len] = r2;
    }
    Self::new(shape, data)
  }

  /// Normal samples with the given mean and standard deviation.

  pub fn normal(shape: &[usize], mean: T, std: T, rng: &mut impl Rng) -> Self {
    Self::randn(shape, rng).vectorize(|a| a * std + mean )
  }

  pub fn glorot_uniform(shape: &[usize], rng: &mut impl Rng) -> Self {
    let fan_in = shape.first().copied().unwrap_or(1);
    let fan_out = shape.last().copied().unwrap_or(1);
    let limit = (real::<T>(6.0) / real::<T>((fan_in + fan_out) as f64)).sqrt();
    let two = real::<T>(2.0);
    Self::rand(shape, rng).vectorize(|a| (a * two - T::one()) * limit )
  }

  /// Elementwise closeness within `tolerance`, relative to magnitude above one.

  pub fn approx_eq(&self, rhs: &Self, tolerance: T) -> bool {
    self.shape.squeeze() == rhs.shape.squeeze() &&
      self.data.iter().zip(&rhs.data).all(|(&a, &b)| {
        (a - b).abs() <= tolerance * T::one().max(a.abs()).max(b.abs())
      })
  }
}

impl<T: Inner> std::fmt::Display for Tensor<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Tensor{:?} ", self.shape.dims)?;
    print_chunks(0, &self.shape, &self.data, f)?;
    Ok(())
  }
}

fn print_chunks<T: Debug>(idx: usize, shape: &Shape, vec: &[T], f: &mut std::fmt::Formatter) -> std::fmt::Result {
  let indent = " ".repeat(idx * 2);
  if shape.rank() == 0 {
    write!(f, "{indent}{:?}", vec[0])?;
  } else if idx == shape.rank() - 1 {
    writeln!(f, "{indent}{:?}", vec)?;
  } else {
    writeln!(f, "{indent}[")?;
    if !vec.is_empty() {
      for chunk in vec.chunks(vec.len() / shape.dims[idx]) {
        print_chunks(idx + 1, shape, chunk, f)?;
      }
    }
    writeln!(f, "{indent}]")?;
  }
  Ok(())
}
