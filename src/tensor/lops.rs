use crate::{
  tensor::Tensor,
  scalar::{ Numeric, Real },
};


impl<T: Numeric> Tensor<T> {
  pub fn add(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a + b )
  }

  pub fn sub(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a - b )
  }

  pub fn mul(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a * b )
  }

  pub fn div(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a / b )
  }

  pub fn scale(&self, factor: T) -> Self {
    self.vectorize(|a| a * factor )
  }

  /// Sum of all elements.

  pub fn sum(&self) -> T {
    self.raw().iter().copied().sum()
  }

  /// Sum of all elements as a `[1, 1]` tensor.

  pub fn sum_all(&self) -> Self {
    Self::scalar(self.sum())
  }

  /// Inner product of two equally sized tensors.

  pub fn dot(&self, rhs: &Self) -> T {
    assert_eq!(self.size(), rhs.size(), "Cannot dot {} & {}", self.shape(), rhs.shape());
    self.raw().iter().zip(rhs.raw()).map(|(&a, &b)| a * b ).sum()
  }

  pub fn max_value(&self) -> Option<T> {
    self.raw().iter().copied().fold(None, |max, a| match max {
      Some(m) if m >= a => Some(m),
      _ => Some(a),
    })
  }

  pub fn clamp(&self, min: T, max: T) -> Self {
    self.vectorize(|a| if a < min { min } else if a > max { max } else { a } )
  }
}

impl<T: Real> Tensor<T> {
  pub fn exp(&self) -> Self {
    self.vectorize(|a| a.exp() )
  }

  /// Natural logarithm with the argument floored at `floor`.

  pub fn ln_floored(&self, floor: T) -> Self {
    self.vectorize(|a| a.max(floor).ln() )
  }

  pub fn sqrt(&self) -> Self {
    self.vectorize(|a| a.sqrt() )
  }

  pub fn powi(&self, n: i32) -> Self {
    self.vectorize(|a| a.powi(n) )
  }

  pub fn abs(&self) -> Self {
    self.vectorize(|a| a.abs() )
  }

  pub fn sigmoid(&self) -> Self {
    self.vectorize(|a| T::one() / (T::one() + (-a).exp()) )
  }

  pub fn tanh(&self) -> Self {
    self.vectorize(|a| a.tanh() )
  }

  /// Softmax over all elements, shifted by the maximum for stability.

  pub fn softmax(&self) -> Self {
    let max = self.max_value().unwrap_or_else(T::zero);
    let exp = self.vectorize(|a| (a - max).exp() );
    let total = exp.sum();
    exp.vectorize(|a| a / total )
  }
}

impl<T: Numeric + std::ops::Neg<Output = T>> std::ops::Neg for &Tensor<T> {
  type Output = Tensor<T>;

  fn neg(self) -> Self::Output {
    self.vectorize(|a| -a )
  }
}

impl<T: Numeric + std::ops::Neg<Output = T>> std::ops::Neg for Tensor<T> {
  type Output = Tensor<T>;

  fn neg(self) -> Self::Output {
    -&self
  }
}

macro_rules! add_operator {
  ($trait:ident, $meth:ident, $symbol:tt) => {
    impl<T: Numeric> std::ops::$trait for &Tensor<T> { // &self * &other
      type Output = Tensor<T>;

      fn $meth(self, rhs: Self) -> Tensor<T> {
        Tensor::$meth(self, rhs)
      }
    }

    impl<T: Numeric> std::ops::$trait for Tensor<T> { // tensor * other
      type Output = Tensor<T>;

      fn $meth(self, rhs: Self) -> Tensor<T> {
        &self $symbol &rhs
      }
    }

    impl<T: Numeric> std::ops::$trait<Tensor<T>> for &Tensor<T> { // &tensor * other
      type Output = Tensor<T>;

      fn $meth(self, rhs: Tensor<T>) -> Tensor<T> {
        self $symbol &rhs
      }
    }

    impl<T: Numeric> std::ops::$trait<&Tensor<T>> for Tensor<T> { // tensor * &other
      type Output = Tensor<T>;

      fn $meth(self, rhs: &Tensor<T>) -> Tensor<T> {
        &self $symbol rhs
      }
    }

    impl<T: Numeric> std::ops::$trait<T> for &Tensor<T> { // &tensor * T
      type Output = Tensor<T>;

      fn $meth(self, rhs: T) -> Tensor<T> {
        self $symbol &Tensor::scalar(rhs)
      }
    }

    impl<T: Numeric> std::ops::$trait<T> for Tensor<T> { // tensor * T
      type Output = Tensor<T>;

      fn $meth(self, rhs: T) -> Tensor<T> {
        &self $symbol &Tensor::scalar(rhs)
      }
    }
  };
}

add_operator!(Add, add, +);
add_operator!(Sub, sub, -);
add_operator!(Mul, mul, *);
add_operator!(Div, div, /);
