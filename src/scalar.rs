use rand::distributions::uniform::SampleUniform;
use num_traits::{Float, NumAssignOps, Num, NumCast};


/// All types that may be stored in a [Tensor](crate::Tensor).
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Inner: PartialEq + Clone + Copy + Send + Sync + std::fmt::Debug {}
impl<T: PartialEq + Clone + Copy + Send + Sync + std::fmt::Debug> Inner for T {}


/// All numeric types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Numeric: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum {}
impl<T: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum> Numeric for T {}


/// Dense row-major matrix product, specialized per float type.
///
/// `lhs` is `[m, k]`, `rhs` is `[k, n]`, both contiguous.

pub trait Gemm: Sized {
  fn gemm(m: usize, k: usize, n: usize, lhs: &[Self], rhs: &[Self]) -> Vec<Self>;
}


/// All continuous numeric types a graph can differentiate.
///
/// Implemented for `f32` and `f64`.

pub trait Real: Numeric + Float + SampleUniform + Gemm {}
impl<T: Numeric + Float + SampleUniform + Gemm> Real for T {}


/// Portable kernel, used when `matrixmultiply` is disabled.
#[cfg_attr(feature = "unsafe", allow(dead_code))]
pub(crate) fn naive_gemm<T: Numeric>(m: usize, k: usize, n: usize, lhs: &[T], rhs: &[T]) -> Vec<T> {
  let mut data = vec![T::zero(); m * n];

  let row = |i: usize, out: &mut [T]| {
    for p in 0..k {
      let a = lhs[i * k + p];
      for j in 0..n {
        out[j] += a * rhs[p * n + j];
      }
    }
  };

  #[cfg(feature = "rayon")]
  {
    use rayon::prelude::*;
    data.par_chunks_mut(n.max(1))
      .enumerate()
      .for_each(|(i, out)| row(i, out) );
  }

  #[cfg(not(feature = "rayon"))]
  for (i, out) in data.chunks_mut(n.max(1)).enumerate() {
    row(i, out);
  }

  data
}

#[cfg(feature = "unsafe")]
impl Gemm for f32 {
  fn gemm(m: usize, k: usize, n: usize, lhs: &[f32], rhs: &[f32]) -> Vec<f32> {
    assert!(lhs.len() >= m * k && rhs.len() >= k * n);
    let mut data = vec![0.0; m * n];
    if m * n == 0 { return data }
    // Safety: buffers are contiguous and sized above
    unsafe {
      matrixmultiply::sgemm(
        m, k, n,
        1.0,
        lhs.as_ptr(), k as isize, 1,
        rhs.as_ptr(), n as isize, 1,
        0.0,
        data.as_mut_ptr(), n as isize, 1,
      );
    }
    data
  }
}

#[cfg(feature = "unsafe")]
impl Gemm for f64 {
  fn gemm(m: usize, k: usize, n: usize, lhs: &[f64], rhs: &[f64]) -> Vec<f64> {
    assert!(lhs.len() >= m * k && rhs.len() >= k * n);
    let mut data = vec![0.0; m * n];
    if m * n == 0 { return data }
    unsafe {
      matrixmultiply::dgemm(
        m, k, n,
        1.0,
        lhs.as_ptr(), k as isize, 1,
        rhs.as_ptr(), n as isize, 1,
        0.0,
        data.as_mut_ptr(), n as isize, 1,
      );
    }
    data
  }
}

#[cfg(not(feature = "unsafe"))]
impl Gemm for f32 {
  fn gemm(m: usize, k: usize, n: usize, lhs: &[f32], rhs: &[f32]) -> Vec<f32> {
    naive_gemm(m, k, n, lhs, rhs)
  }
}

#[cfg(not(feature = "unsafe"))]
impl Gemm for f64 {
  fn gemm(m: usize, k: usize, n: usize, lhs: &[f64], rhs: &[f64]) -> Vec<f64> {
    naive_gemm(m, k, n, lhs, rhs)
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gemm_matches_naive() {
    let lhs = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let rhs = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    assert_eq!(f64::gemm(2, 3, 2, &lhs, &rhs), vec![22.0, 28.0, 49.0, 64.0]);
    assert_eq!(naive_gemm(2, 3, 2, &lhs, &rhs), vec![22.0, 28.0, 49.0, 64.0]);
  }
}
