use crate::{
  tensor::Tensor,
  scalar::{ Numeric, Gemm },
};


impl<T: Numeric + Gemm> Tensor<T> {
  /// Matrix product of two rank-2 tensors.

  pub fn mm(&self, rhs: &Self) -> Self {
    assert!(self.rank() == 2 && rhs.rank() == 2,
      "Matrix product needs rank 2 operands, got {} & {}", self.shape(), rhs.shape());
    let rows_l = self.dim(0);
    let cols_l = self.dim(1);
    let rows_r = rhs.dim(0);
    let cols_r = rhs.dim(1);
    assert_eq!(cols_l, rows_r,
      "Cannot multiply {} & {}", self.shape(), rhs.shape());
    let data = T::gemm(rows_l, cols_l, cols_r, self.raw(), rhs.raw());
    Self::new(&[rows_l, cols_r], data)
  }
}
