//! Operator factories.
//!
//! Every factory registers a new node in the graph of its first parent and
//! validates parent shapes right away. Use [Graph::apply] directly to give
//! an operator node an explicit name.

use crate::{
  error::{ Error, Result },
  scalar::Real,
  node::{ Node, Graph, Op },
};


/// Sum of any number of nodes from the same graph.

pub fn add<T: Real>(nodes: &[&Node<T>]) -> Result<Node<T>> {
  let first = nodes.first().ok_or_else(|| Error::Arity {
    op: "Add".to_string(),
    expected: "at least 1".to_string(),
    got: 0,
  })?;
  first.graph.apply(Op::Add, nodes, None)
}


impl<T: Real> Node<T> {
  fn unary(&self, op: Op<T>) -> Result<Self> {
    self.graph.apply(op, &[self], None)
  }

  fn binary(&self, op: Op<T>, rhs: &Self) -> Result<Self> {
    self.graph.apply(op, &[self, rhs], None)
  }

  /// Elementwise sum. Either side may be of size one.

  pub fn add(&self, rhs: &Self) -> Result<Self> {
    self.binary(Op::Add, rhs)
  }

  pub fn matmul(&self, rhs: &Self) -> Result<Self> {
    self.binary(Op::MatMul, rhs)
  }

  /// Elementwise product of equally shaped nodes.

  pub fn mul(&self, rhs: &Self) -> Result<Self> {
    self.binary(Op::Multiply, rhs)
  }

  /// Scale `rhs` by this size-1 node.

  pub fn scale(&self, rhs: &Self) -> Result<Self> {
    self.binary(Op::ScalarMultiply, rhs)
  }

  pub fn reshape(&self, dims: &[usize]) -> Result<Self> {
    self.unary(Op::Reshape { dims: dims.to_vec() })
  }

  /// Sum of all elements, as a `[1, 1]` node.

  pub fn reduce_sum(&self) -> Result<Self> {
    self.unary(Op::ReduceSum)
  }

  /// Inner product of two column vectors.

  pub fn vecdot(&self, rhs: &Self) -> Result<Self> {
    self.binary(Op::VecDot, rhs)
  }

  pub fn step(&self) -> Result<Self> {
    self.unary(Op::Step)
  }

  pub fn sigmoid(&self) -> Result<Self> {
    self.unary(Op::Sigmoid)
  }

  pub fn tanh(&self) -> Result<Self> {
    self.unary(Op::Tanh)
  }

  pub fn relu(&self) -> Result<Self> {
    self.unary(Op::ReLU { slope: T::zero() })
  }

  pub fn leaky_relu(&self, slope: T) -> Result<Self> {
    self.unary(Op::ReLU { slope })
  }

  /// Softmax over all elements.

  pub fn softmax(&self) -> Result<Self> {
    self.unary(Op::SoftMax)
  }

  /// Elementwise `ln(1 + exp(-x))`.

  pub fn log_loss(&self) -> Result<Self> {
    self.unary(Op::LogLoss)
  }

  /// Elementwise `max(0, -x)`.

  pub fn perception_loss(&self) -> Result<Self> {
    self.unary(Op::PerceptionLoss)
  }

  /// Mean squared difference to `labels`.

  pub fn mse_loss(&self, labels: &Self) -> Result<Self> {
    self.binary(Op::MseLoss, labels)
  }

  /// Cross entropy between `softmax(self)` and one-hot `labels`.

  pub fn cross_entropy_with_softmax(&self, labels: &Self) -> Result<Self> {
    self.binary(Op::CrossEntropyWithSoftMax { probabilities: None }, labels)
  }
}


impl<T: Real> Graph<T> {
  /// Affine layer `weights · input + bias` followed by an optional
  /// activation, with freshly initialized parameters.

  pub fn dense(&self, input: &Node<T>, size: usize, activation: Option<fn(&Node<T>) -> Result<Node<T>>>) -> Result<Node<T>> {
    let shape = input.shape()?;
    if shape.rank() < 2 {
      return Err(Error::shape("dense input", "a column of rank 2", &shape))
    }
    let rows = shape[0];
    let weights = self.parameter(&[size, rows], None)?;
    let bias = self.parameter(&[size, 1], None)?;
    let affine = weights.matmul(input)?.add(&bias)?;
    match activation {
      Some(activation) => activation(&affine),
      None => Ok(affine),
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ tensor::Tensor, error::ErrorCategory };

  fn graph() -> Graph<f64> {
    Graph::seeded("ops", 0)
  }

  #[test]
  fn n_ary_add() {
    let graph = graph();
    let a = Tensor::column(&[1.0, 2.0]).tracked(&graph).unwrap();
    let b = Tensor::column(&[3.0, 4.0]).tracked(&graph).unwrap();
    let c = Tensor::scalar(10.0).tracked(&graph).unwrap();
    let sum = add(&[&a, &b, &c]).unwrap();
    sum.forward().unwrap();
    assert_eq!(sum.value().unwrap(), Some(Tensor::column(&[14.0, 16.0])));
    let loss = sum.reduce_sum().unwrap();
    loss.forward().unwrap();
    assert_eq!(c.backward(&loss).unwrap(), Tensor::scalar(2.0));
    assert_eq!(a.backward(&loss).unwrap(), Tensor::column(&[1.0, 1.0]));
    assert!(add::<f64>(&[]).is_err());
  }

  #[test]
  fn shapes_are_checked_eagerly() {
    let graph = graph();
    let a = graph.variable(&[2,3], None).unwrap();
    let b = graph.variable(&[2,3], None).unwrap();
    let err = a.matmul(&b).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Shape);
    assert!(a.vecdot(&b).is_err());
    assert!(a.reshape(&[5]).is_err());
    assert_eq!(a.reshape(&[3,2]).unwrap().shape().unwrap().dims, vec![3,2]);
    // Failed constructions leave nothing behind
    assert_eq!(graph.len(), 3);
  }

  #[test]
  fn explicit_names() {
    let graph = graph();
    let a = graph.variable(&[1,1], Some("a")).unwrap();
    let s = graph.apply(Op::Sigmoid, &[&a], Some("out")).unwrap();
    assert_eq!(s.full_name().unwrap(), "Sigmoid_out");
    assert!(matches!(graph.apply(Op::Sigmoid, &[&a], Some("out")), Err(Error::DuplicateName { .. })));
  }

  #[test]
  fn matmul_gradients() {
    let graph = graph();
    let a = Tensor::matrix(&[&[1.0, 2.0], &[3.0, 4.0]]).tracked(&graph).unwrap();
    let b = Tensor::matrix(&[&[5.0], &[6.0]]).tracked(&graph).unwrap();
    let loss = a.matmul(&b).unwrap().reduce_sum().unwrap();
    loss.forward().unwrap();
    assert_eq!(loss.value().unwrap().unwrap().item(), 17.0 + 39.0);
    assert_eq!(a.backward(&loss).unwrap().reshape(&[2,2]), Tensor::matrix(&[&[5.0, 6.0], &[5.0, 6.0]]));
    assert_eq!(b.backward(&loss).unwrap(), Tensor::column(&[4.0, 6.0]));
  }

  #[test]
  fn scale() {
    let graph = graph();
    let k = Tensor::scalar(3.0).tracked(&graph).unwrap();
    let x = Tensor::column(&[1.0, 2.0]).tracked(&graph).unwrap();
    let loss = k.scale(&x).unwrap().reduce_sum().unwrap();
    loss.forward().unwrap();
    assert_eq!(loss.value().unwrap().unwrap().item(), 9.0);
    assert_eq!(k.backward(&loss).unwrap().item(), 3.0);
    assert_eq!(x.backward(&loss).unwrap(), Tensor::column(&[3.0, 3.0]));
  }

  #[test]
  fn softmax_gradient_vanishes_under_sum() {
    let graph = graph();
    let x = Tensor::column(&[0.3, -1.2, 2.0]).tracked(&graph).unwrap();
    let loss = x.softmax().unwrap().reduce_sum().unwrap();
    loss.forward().unwrap();
    assert!((loss.value().unwrap().unwrap().item() - 1.0).abs() < 1e-12);
    let grad = x.backward(&loss).unwrap();
    assert!(grad.raw().iter().all(|g| g.abs() < 1e-12 ));
  }

  #[test]
  fn cross_entropy() {
    let graph = graph();
    let logits = Tensor::column(&[1.0, 2.0, 3.0]).tracked(&graph).unwrap();
    let labels = Tensor::column(&[0.0, 1.0, 0.0]).tracked(&graph).unwrap();
    let loss = logits.cross_entropy_with_softmax(&labels).unwrap();
    assert_eq!(loss.probabilities().unwrap(), None);
    loss.forward().unwrap();
    let prob = loss.probabilities().unwrap().unwrap();
    assert!((prob.sum() - 1.0).abs() < 1e-12);
    let grad = logits.backward(&loss).unwrap();
    assert!(grad.approx_eq(&prob.sub(&Tensor::column(&[0.0, 1.0, 0.0])), 1e-12));
    assert_eq!(logits.probabilities().unwrap(), None);
  }

  #[test]
  fn mse() {
    let graph = graph();
    let y = Tensor::column(&[1.0, 3.0]).tracked(&graph).unwrap();
    let t = Tensor::column(&[0.0, 0.0]).tracked(&graph).unwrap();
    let loss = y.mse_loss(&t).unwrap();
    loss.forward().unwrap();
    assert_eq!(loss.value().unwrap().unwrap().item(), 5.0);
    assert_eq!(y.backward(&loss).unwrap(), Tensor::column(&[1.0, 3.0]));
    assert_eq!(t.backward(&loss).unwrap(), Tensor::column(&[-1.0, -3.0]));
  }

  #[test]
  fn classification_losses() {
    let graph = graph();
    let x = Tensor::column(&[-2.0, 0.5]).tracked(&graph).unwrap();
    let perception = x.perception_loss().unwrap().reduce_sum().unwrap();
    let log = x.log_loss().unwrap().reduce_sum().unwrap();
    perception.forward().unwrap();
    log.forward().unwrap();
    assert_eq!(perception.value().unwrap().unwrap().item(), 2.0);
    assert_eq!(x.backward(&perception).unwrap(), Tensor::column(&[-1.0, 0.0]));
    graph.clear_all_gradients();
    let expected = Tensor::column(&[-1.0 / (1.0 + (-2.0f64).exp()), -1.0 / (1.0 + 0.5f64.exp())]);
    assert!(x.backward(&log).unwrap().approx_eq(&expected, 1e-12));
  }

  #[test]
  fn step_has_no_gradient() {
    let graph = graph();
    let x = Tensor::column(&[-1.0, 0.0, 2.0]).tracked(&graph).unwrap();
    let loss = x.step().unwrap().reduce_sum().unwrap();
    loss.forward().unwrap();
    assert_eq!(loss.value().unwrap().unwrap().item(), 2.0);
    assert_eq!(x.backward(&loss).unwrap(), Tensor::zeros(&[3,1]));
  }

  #[test]
  fn dense_layer() {
    let graph = graph();
    let x = graph.variable(&[3,1], None).unwrap();
    let y = graph.dense(&x, 4, Some(Node::relu)).unwrap();
    assert_eq!(y.kind_name().unwrap(), "ReLU");
    assert_eq!(y.shape().unwrap().dims, vec![4,1]);
    assert_eq!(graph.statistics().trainable_elements, 4 * 3 + 4);

    let scalar = graph.variable(&[], Some("scalar")).unwrap();
    let err = graph.dense(&scalar, 2, None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Shape);
    assert_eq!(graph.statistics().parameters, 2);
  }
}
