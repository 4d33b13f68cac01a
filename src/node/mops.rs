use crate::{
  internal::*,
  error::{ Error, Result },
  shape::Shape,
  tensor::Tensor,
  scalar::Real,
};


/// Floor applied to logarithm arguments.
pub const LOG_FLOOR: f64 = 1e-10;

/// Clip applied to exponents inside [Op::LogLoss].
pub const EXP_CLIP: f64 = 1e2;


/// Operator kinds a graph node can compute.
///
/// Each variant knows how to infer and validate its output shape, how to
/// compute its value from its parents' values and how much each parent
/// contributed to the gradient of a scalar target.

#[derive(Debug, Clone)]
pub enum Op<T: Real> {
  /// Sum of any number of equally shaped parents. Size-1 parents broadcast.
  Add,
  MatMul,
  /// Elementwise product.
  Multiply,
  /// Size-1 parent times any tensor.
  ScalarMultiply,
  Reshape { dims: Vec<usize> },
  ReduceSum,
  /// Inner product of two column vectors.
  VecDot,
  Step,
  Sigmoid,
  Tanh,
  /// Leaky when `slope` is non-zero.
  ReLU { slope: T },
  SoftMax,
  LogLoss,
  PerceptionLoss,
  MseLoss,
  /// Softmax over the logits followed by cross entropy against labels.
  /// Keeps the probabilities of the last forward pass.
  CrossEntropyWithSoftMax { probabilities: Option<Tensor<T>> },
}


/// A child's local sensitivity towards one of its parents.

#[derive(Debug, Clone)]
pub enum Local<T: Real> {
  /// Full Jacobian `[child.size, parent.size]`.
  Jacobian(Tensor<T>),
  /// Jacobian already applied to the child's gradient, `[parent.size, 1]`.
  Product(Tensor<T>),
}

impl<T: Real> Local<T> {
  /// Contract with the child's flattened gradient.

  pub fn apply(self, grad: &Tensor<T>) -> Tensor<T> {
    match self {
      Self::Jacobian(jacobian) => jacobian.transpose().mm(grad),
      Self::Product(product) => product.flatten(),
    }
  }
}

impl<T: Real> Op<T> {
  /// Type tag, used as the prefix of node names.

  pub fn name(&self) -> &'static str {
    match self {
      Self::Add => "Add",
      Self::MatMul => "MatMul",
      Self::Multiply => "Multiply",
      Self::ScalarMultiply => "ScalarMultiply",
      Self::Reshape { .. } => "Reshape",
      Self::ReduceSum => "ReduceSum",
      Self::VecDot => "VecDot",
      Self::Step => "Step",
      Self::Sigmoid => "Sigmoid",
      Self::Tanh => "Tanh",
      Self::ReLU { .. } => "ReLU",
      Self::SoftMax => "SoftMax",
      Self::LogLoss => "LogLoss",
      Self::PerceptionLoss => "PerceptionLoss",
      Self::MseLoss => "MseLoss",
      Self::CrossEntropyWithSoftMax { .. } => "CrossEntropyWithSoftMax",
    }
  }

  fn arity(&self) -> (usize, Option<usize>) {
    match self {
      Self::Add => (1, None),
      Self::MatMul | Self::Multiply | Self::ScalarMultiply | Self::VecDot |
      Self::MseLoss | Self::CrossEntropyWithSoftMax { .. } => (2, Some(2)),
      _ => (1, Some(1)),
    }
  }

  /// Validate parent shapes and compute the output shape.

  pub fn infer(&self, shapes: &[&Shape]) -> Result<Shape> {
    let (min, max) = self.arity();
    if shapes.len() < min || max.map_or(false, |max| shapes.len() > max ) {
      let expected = match max {
        Some(max) if max == min => format!("{min}"),
        Some(max) => format!("{min} to {max}"),
        None => format!("at least {min}"),
      };
      return Err(Error::Arity { op: self.name().to_string(), expected, got: shapes.len() })
    }
    let name = self.name();
    let same = |a: &Shape, b: &Shape| if a == b {
      Ok(())
    } else {
      Err(Error::shape(name, a.to_string(), b))
    };
    match self {
      Self::Add => {
        let mut shape = shapes[0].clone();
        for &other in &shapes[1..] {
          shape = shape.broadcast(other)
            .ok_or_else(|| Error::shape(name, format!("{shape} or a size-1 shape"), other) )?;
        }
        Ok(shape)
      },
      Self::MatMul => {
        let (lhs, rhs) = (shapes[0], shapes[1]);
        if lhs.rank() != 2 { return Err(Error::shape(name, "rank 2", lhs)) }
        if rhs.rank() != 2 { return Err(Error::shape(name, "rank 2", rhs)) }
        if lhs[1] != rhs[0] {
          return Err(Error::shape(name, format!("[{}, _]", lhs[1]), rhs))
        }
        Ok(Shape::new(&[lhs[0], rhs[1]]))
      },
      Self::Multiply => {
        same(shapes[0], shapes[1])?;
        Ok(shapes[0].clone())
      },
      Self::ScalarMultiply => {
        if !shapes[0].is_scalar() { return Err(Error::shape(name, "size 1", shapes[0])) }
        Ok(shapes[1].clone())
      },
      Self::Reshape { dims } => {
        let shape = Shape::new(dims);
        if shape.size() != shapes[0].size() {
          return Err(Error::shape(name, format!("size {}", shape.size()), shapes[0]))
        }
        Ok(shape)
      },
      Self::ReduceSum => Ok(Shape::new(&[1, 1])),
      Self::VecDot => {
        if !shapes[0].is_column() { return Err(Error::shape(name, "column vector [n, 1]", shapes[0])) }
        same(shapes[0], shapes[1])?;
        Ok(Shape::new(&[1, 1]))
      },
      Self::MseLoss | Self::CrossEntropyWithSoftMax { .. } => {
        same(shapes[0], shapes[1])?;
        Ok(Shape::new(&[1, 1]))
      },
      Self::Step | Self::Sigmoid | Self::Tanh | Self::ReLU { .. } |
      Self::SoftMax | Self::LogLoss | Self::PerceptionLoss => Ok(shapes[0].clone()),
    }
  }

  /// Compute the output from parent values that already passed [Op::infer].

  pub fn run(&mut self, inputs: &[&Tensor<T>]) -> Tensor<T> {
    let zero = T::zero();
    match self {
      Self::Add => inputs[1..].iter()
        .fold(inputs[0].clone(), |acc, &input| acc.add(input) ),
      Self::MatMul => inputs[0].mm(inputs[1]),
      Self::Multiply => inputs[0].mul(inputs[1]),
      Self::ScalarMultiply => inputs[1].scale(inputs[0].item()),
      Self::Reshape { dims } => inputs[0].reshape(dims),
      Self::ReduceSum => inputs[0].sum_all(),
      Self::VecDot => Tensor::scalar(inputs[0].dot(inputs[1])),
      Self::Step => inputs[0].vectorize(|a| if a >= zero { T::one() } else { zero } ),
      Self::Sigmoid => inputs[0].sigmoid(),
      Self::Tanh => inputs[0].tanh(),
      Self::ReLU { slope } => {
        let slope = *slope;
        inputs[0].vectorize(|a| if a > zero { a } else { slope * a } )
      },
      Self::SoftMax => inputs[0].softmax(),
      Self::LogLoss => {
        let clip = real::<T>(EXP_CLIP);
        inputs[0].vectorize(|a| (T::one() + (-a).min(clip).exp()).ln() )
      },
      Self::PerceptionLoss => inputs[0].vectorize(|a| if a >= zero { zero } else { -a } ),
      Self::MseLoss => {
        let diff = inputs[0].sub(inputs[1]);
        let n = real::<T>(diff.size() as f64);
        Tensor::scalar(diff.dot(&diff) / n)
      },
      Self::CrossEntropyWithSoftMax { probabilities } => {
        let prob = inputs[0].softmax();
        let loss = -inputs[1].dot(&prob.ln_floored(real(LOG_FLOOR)));
        *probabilities = Some(prob);
        Tensor::scalar(loss)
      },
    }
  }

  /// Sensitivity of this operator's output towards the parent at `index`.
  ///
  /// `output` is this node's cached value, `grad` its flattened gradient
  /// with respect to the current target.

  pub fn derive(&self, index: usize, inputs: &[&Tensor<T>], output: &Tensor<T>, grad: &Tensor<T>) -> Local<T> {
    let zero = T::zero();
    let one = T::one();
    let input = inputs[index];
    let flat = |t: &Tensor<T>| t.flatten();
    match self {
      Self::Add => if input.size() == 1 && output.size() != 1 {
        Local::Product(grad.sum_all())
      } else {
        Local::Product(grad.clone())
      },
      Self::MatMul => {
        let g = grad.reshape(output.dims());
        Local::Product(if index == 0 {
          g.mm(&inputs[1].transpose())
        } else {
          inputs[0].transpose().mm(&g)
        })
      },
      Self::Multiply => Local::Product(grad.mul(&flat(inputs[1 - index]))),
      Self::ScalarMultiply => Local::Product(if index == 0 {
        Tensor::scalar(grad.dot(inputs[1]))
      } else {
        grad.scale(inputs[0].item())
      }),
      Self::Reshape { .. } => Local::Product(grad.clone()),
      Self::ReduceSum => Local::Product(Tensor::fill(&[input.size(), 1], grad.item())),
      Self::VecDot => Local::Product(flat(inputs[1 - index]).scale(grad.item())),
      Self::Step => Local::Product(Tensor::zeros(&[input.size(), 1])),
      Self::Sigmoid => Local::Product(grad.mul(&flat(output).vectorize(|s| s * (one - s) ))),
      Self::Tanh => Local::Product(grad.mul(&flat(output).vectorize(|t| one - t * t ))),
      Self::ReLU { slope } => {
        let slope = *slope;
        Local::Product(grad.mul(&flat(input).vectorize(|a| if a > zero { one } else { slope } )))
      },
      Self::SoftMax => {
        let s = output.raw();
        let n = s.len();
        let mut jacobian = Tensor::diag(s);
        for (i, j) in (0..n).flat_map(|i| (0..n).map(move |j| (i, j) )) {
          jacobian.raw_mut()[i * n + j] -= s[i] * s[j];
        }
        Local::Jacobian(jacobian)
      },
      Self::LogLoss => {
        let clip = real::<T>(EXP_CLIP);
        Local::Product(grad.mul(&flat(input).vectorize(|a| -one / (one + a.min(clip).exp()) )))
      },
      Self::PerceptionLoss => {
        Local::Product(grad.mul(&flat(input).vectorize(|a| if a >= zero { zero } else { -one } )))
      },
      Self::MseLoss => {
        let diff = flat(inputs[0]).sub(&flat(inputs[1]));
        let n = real::<T>(diff.size() as f64);
        let sign = if index == 0 { one } else { -one };
        Local::Product(diff.scale(sign * real::<T>(2.0) / n * grad.item()))
      },
      Self::CrossEntropyWithSoftMax { probabilities } => {
        let prob = probabilities.as_ref()
          .map(flat)
          .unwrap_or_else(|| flat(&inputs[0].softmax()) );
        Local::Product(if index == 0 {
          prob.sub(&flat(inputs[1])).scale(grad.item())
        } else {
          (-prob.ln_floored(real(LOG_FLOOR))).scale(grad.item())
        })
      },
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  fn shapes(dims: &[&[usize]]) -> Vec<Shape> {
    dims.iter().map(|d| Shape::new(d) ).collect()
  }

  fn infer(op: Op<f64>, dims: &[&[usize]]) -> Result<Shape> {
    let shapes = shapes(dims);
    let refs: Vec<&Shape> = shapes.iter().collect();
    op.infer(&refs)
  }

  #[test]
  fn matmul_shapes() {
    assert_eq!(infer(Op::MatMul, &[&[2,3], &[3,4]]).unwrap(), Shape::new(&[2,4]));
    assert!(infer(Op::MatMul, &[&[2,3], &[2,3]]).is_err());
    assert!(infer(Op::MatMul, &[&[6], &[6,1]]).is_err());
  }

  #[test]
  fn add_broadcasts_size_one() {
    assert_eq!(infer(Op::Add, &[&[2,2], &[1,1], &[2,2]]).unwrap(), Shape::new(&[2,2]));
    assert!(infer(Op::Add, &[&[2,2], &[2,1]]).is_err());
  }

  #[test]
  fn arity() {
    let err = infer(Op::VecDot, &[&[2,1]]).unwrap_err();
    assert_eq!(err.to_string(), "VecDot takes 2 parents, got 1");
    assert!(infer(Op::Add, &[]).is_err());
  }

  #[test]
  fn softmax_jacobian_rows_sum_to_zero() {
    let mut op = Op::SoftMax;
    let x = Tensor::column(&[0.5, -1.0, 2.0]);
    let out = op.run(&[&x]);
    let grad = Tensor::column(&[1.0, 1.0, 1.0]);
    match op.derive(0, &[&x], &out, &grad) {
      Local::Jacobian(j) => {
        assert_eq!(j.dims(), &[3,3]);
        for i in 0..3 {
          let row: f64 = (0..3).map(|k| j.at(&[i, k]) ).sum();
          assert!(row.abs() < 1e-12);
        }
      },
      Local::Product(_) => panic!("SoftMax should yield a Jacobian"),
    }
  }

  #[test]
  fn cross_entropy_keeps_probabilities() {
    let mut op = Op::<f64>::CrossEntropyWithSoftMax { probabilities: None };
    let logits = Tensor::column(&[1.0, 2.0, 3.0]);
    let labels = Tensor::column(&[0.0, 0.0, 1.0]);
    let loss = op.run(&[&logits, &labels]);
    let Op::CrossEntropyWithSoftMax { probabilities: Some(prob) } = &op else { panic!("no probabilities") };
    assert!((loss.item() + prob.raw()[2].ln()).abs() < 1e-12);
  }

  #[test]
  fn leaky_relu() {
    let mut op = Op::ReLU { slope: 0.1 };
    let x = Tensor::column(&[-2.0, 3.0]);
    assert_eq!(op.run(&[&x]), Tensor::column(&[-0.2, 3.0]));
    let local = op.derive(0, &[&x], &x, &Tensor::column(&[1.0, 1.0])).apply(&Tensor::column(&[1.0, 1.0]));
    assert_eq!(local, Tensor::column(&[0.1, 1.0]));
  }
}
