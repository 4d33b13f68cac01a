use tracing::debug;

use crate::{
  internal::*,
  error::{ Error, Result },
  shape::Shape,
  tensor::Tensor,
  scalar::Real,
  node::{ Node, Graph, Kind, Ownership },
};


/// Standard deviation of freshly initialized parameters.
pub const INIT_STD: f64 = 1e-3;


impl<T: Real> Graph<T> {
  /// Leaf fed by the calling code. Starts out without a value
  /// and is never updated by optimizers.

  pub fn variable(&self, dims: &[usize], name: Option<&str>) -> Result<Node<T>> {
    self.register(Kind::Variable { trainable: false }, Shape::new(dims), name, &[], Ownership::Borrowed, None)
  }

  /// Trainable leaf, randomly initialized from this graph's generator.

  pub fn parameter(&self, dims: &[usize], name: Option<&str>) -> Result<Node<T>> {
    let value = self.sample(dims);
    self.register(Kind::Parameter { trainable: true }, Shape::new(dims), name, &[], Ownership::Owned, Some(value))
  }

  /// Parameter with a given initial value.

  pub fn parameter_with(&self, value: Tensor<T>, name: Option<&str>) -> Result<Node<T>> {
    let shape = value.shape().clone();
    self.register(Kind::Parameter { trainable: true }, shape, name, &[], Ownership::Owned, Some(value))
  }

  fn sample(&self, dims: &[usize]) -> Tensor<T> {
    self.with_mut(|arena| Tensor::normal(dims, T::zero(), real(INIT_STD), &mut arena.rng) )
  }
}


impl<T: Real> Tensor<T> {
  /// Feed this tensor into `graph` as a variable.

  pub fn tracked(self, graph: &Graph<T>) -> Result<Node<T>> {
    let node = graph.variable(self.dims(), None)?;
    node.assign_value(self, true)?;
    Ok(node)
  }

  /// Turn this tensor into a trainable parameter of `graph`.

  pub fn trained(self, graph: &Graph<T>) -> Result<Node<T>> {
    graph.parameter_with(self, None)
  }
}


impl<T: Real> Node<T> {
  /// Include or exclude a leaf from gradient accumulation.

  pub fn set_trainable(&self, trainable: bool) -> Result<()> {
    self.graph.with_mut(|arena| {
      let record = arena.get_mut(self.id)?;
      match &mut record.kind {
        Kind::Variable { trainable: flag } | Kind::Parameter { trainable: flag } => {
          *flag = trainable;
          Ok(())
        },
        Kind::Op(_) => Err(Error::NotALeaf { name: record.full_name.clone() }),
      }
    })
  }

  /// Draw a fresh value for this leaf, as if it had just been created
  /// as a parameter. Descendants are invalidated.

  pub fn randomize(&self) -> Result<()> {
    if !self.is_leaf()? {
      return Err(Error::NotALeaf { name: self.full_name()? })
    }
    let value = self.graph.sample(&self.shape()?.dims);
    debug!(node = %self.full_name()?, "randomized");
    self.assign_value(value, true)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorCategory;

  #[test]
  fn variables_are_borrowed() {
    let graph = Graph::<f32>::new("g");
    let x = graph.variable(&[3,1], Some("x")).unwrap();
    assert_eq!(x.ownership().unwrap(), Ownership::Borrowed);
    assert!(!x.is_trainable().unwrap());
    assert!(!x.has_value().unwrap());
    assert!(x.is_leaf().unwrap());
  }

  #[test]
  fn parameters_are_initialized() {
    let graph = Graph::<f64>::new("g");
    let w = graph.parameter(&[20,30], Some("w")).unwrap();
    assert_eq!(w.ownership().unwrap(), Ownership::Owned);
    assert!(w.is_parameter().unwrap() && w.is_trainable().unwrap());
    let value = w.value().unwrap().unwrap();
    assert_eq!(value.dims(), &[20,30]);
    assert!(value.raw().iter().all(|a| a.abs() < 0.01 ));
    assert!(value.raw().iter().any(|&a| a != 0.0 ));
  }

  #[test]
  fn seeded_graphs_agree() {
    let a = Graph::<f64>::seeded("a", 42).parameter(&[4,4], None).unwrap();
    let b = Graph::<f64>::seeded("b", 42).parameter(&[4,4], None).unwrap();
    assert_eq!(a.value().unwrap(), b.value().unwrap());
  }

  #[test]
  fn tracked_tensors() {
    let graph = Graph::<f64>::new("g");
    let x = Tensor::column(&[1.0, 2.0]).tracked(&graph).unwrap();
    assert_eq!(x.kind_name().unwrap(), "Variable");
    assert_eq!(x.value().unwrap(), Some(Tensor::column(&[1.0, 2.0])));
    let w = Tensor::matrix(&[&[1.0, 0.0], &[0.0, 1.0]]).trained(&graph).unwrap();
    assert_eq!(w.value().unwrap(), Some(Tensor::eye(2)));
    assert!(w.is_trainable().unwrap());
  }

  #[test]
  fn trainability() {
    let graph = Graph::<f64>::new("g");
    let x = graph.variable(&[2,1], None).unwrap();
    x.set_trainable(true).unwrap();
    assert!(x.is_trainable().unwrap());
    let y = x.sigmoid().unwrap();
    let err = y.set_trainable(true).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NodeState);
    assert!(y.randomize().is_err());
  }

  #[test]
  fn randomize_invalidates() {
    let graph = Graph::<f64>::seeded("g", 3);
    let w = graph.parameter(&[2,1], None).unwrap();
    let s = w.reduce_sum().unwrap();
    s.forward().unwrap();
    let before = w.value().unwrap();
    w.randomize().unwrap();
    assert_ne!(w.value().unwrap(), before);
    assert!(!s.has_value().unwrap());
  }
}
