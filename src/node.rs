use std::fmt::Debug;

use serde::{Serialize, Deserialize};

mod graph;
mod leaf;
mod snapshot;
pub(crate) mod mops;

pub use graph::{ Graph, Statistics };
pub use mops::{ Op, Local };

use crate::{
  internal::*,
  error::{ Error, Result },
  shape::Shape,
  tensor::Tensor,
  scalar::Real,
};


/// Stable index of a node inside its graph's arena.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
  pub fn index(&self) -> usize {
    self.0
  }
}


/// Whether a graph is responsible for releasing a node.
///
/// Variables are lent to the graph by the calling code and survive
/// [Graph::teardown]. Parameters and operators belong to the graph.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
  Owned,
  Borrowed,
}


#[derive(Debug, Clone)]
pub(crate) enum Kind<T: Real> {
  Variable { trainable: bool },
  Parameter { trainable: bool },
  Op(Op<T>),
}

impl<T: Real> Kind<T> {
  pub(crate) fn name(&self) -> &'static str {
    match self {
      Self::Variable { .. } => "Variable",
      Self::Parameter { .. } => "Parameter",
      Self::Op(op) => op.name(),
    }
  }

  pub(crate) fn is_leaf(&self) -> bool {
    !matches!(self, Self::Op(_))
  }

  pub(crate) fn trainable(&self) -> bool {
    match self {
      Self::Variable { trainable } | Self::Parameter { trainable } => *trainable,
      Self::Op(_) => false,
    }
  }
}


/// Everything a graph stores about one node.

#[derive(Debug, Clone)]
pub(crate) struct NodeRecord<T: Real> {
  pub id: NodeId,
  pub kind: Kind<T>,
  pub name: String,
  pub full_name: String,
  /// Declared output shape. Follows the cached value when a leaf
  /// gets assigned without shape checking.
  pub shape: Shape,
  pub parents: Vec<NodeId>,
  pub children: Vec<NodeId>,
  pub value: Option<Tensor<T>>,
  /// Flattened `[size, 1]` gradient with respect to the last target.
  pub grad: Option<Tensor<T>>,
  pub ownership: Ownership,
}


/// Handle to one node of a [Graph].
///
/// Handles are cheap to clone. All clones refer to the same node and
/// observe the same cached value and gradient.

#[derive(Clone)]
pub struct Node<T: Real> {
  pub(crate) graph: Graph<T>,
  pub(crate) id: NodeId,
}

impl<T: Real> PartialEq for Node<T> {
  fn eq(&self, rhs: &Self) -> bool {
    self.id == rhs.id && self.graph.same(&rhs.graph)
  }
}

impl<T: Real> Node<T> {
  pub fn id(&self) -> NodeId {
    self.id
  }

  pub fn graph(&self) -> &Graph<T> {
    &self.graph
  }

  fn read<R>(&self, cb: impl FnOnce(&NodeRecord<T>) -> R) -> Result<R> {
    self.graph.with(|arena| arena.get(self.id).map(cb) )
  }

  /// Resolved short name, explicit or auto-generated.

  pub fn name(&self) -> Result<String> {
    self.read(|record| record.name.clone() )
  }

  /// `"<type>_<name>"`, unique within the graph.

  pub fn full_name(&self) -> Result<String> {
    self.read(|record| record.full_name.clone() )
  }

  /// Operator kind or leaf type.

  pub fn kind_name(&self) -> Result<&'static str> {
    self.read(|record| record.kind.name() )
  }

  pub fn shape(&self) -> Result<Shape> {
    self.read(|record| record.shape.clone() )
  }

  pub fn size(&self) -> Result<usize> {
    self.read(|record| record.shape.size() )
  }

  pub fn ownership(&self) -> Result<Ownership> {
    self.read(|record| record.ownership )
  }

  pub fn is_leaf(&self) -> Result<bool> {
    self.read(|record| record.kind.is_leaf() )
  }

  pub fn is_parameter(&self) -> Result<bool> {
    self.read(|record| matches!(record.kind, Kind::Parameter { .. }) )
  }

  pub fn is_trainable(&self) -> Result<bool> {
    self.read(|record| record.kind.trainable() )
  }

  /// Parents in the order the operator consumes them.

  pub fn parents(&self) -> Result<Vec<Self>> {
    self.read(|record| record.parents.clone() )
      .map(|ids| ids.into_iter().map(|id| self.graph.handle(id) ).collect() )
  }

  pub fn children(&self) -> Result<Vec<Self>> {
    self.read(|record| record.children.clone() )
      .map(|ids| ids.into_iter().map(|id| self.graph.handle(id) ).collect() )
  }

  /// Compute this node's value, pulling missing parent values first.
  /// Does nothing when the value is already cached.

  pub fn forward(&self) -> Result<()> {
    self.graph.with_mut(|arena| arena.forward(self.id) )
  }

  /// Cached forward value, if any.

  pub fn value(&self) -> Result<Option<Tensor<T>>> {
    self.read(|record| record.value.clone() )
  }

  pub fn has_value(&self) -> Result<bool> {
    self.read(|record| record.value.is_some() )
  }

  /// Store a value and invalidate every descendant.

  pub fn assign_value(&self, value: Tensor<T>, check_shape: bool) -> Result<()> {
    self.graph.with_mut(|arena| arena.assign_value(self.id, value, check_shape) )
  }

  pub fn clear_value(&self, recursive: bool) -> Result<()> {
    self.graph.with_mut(|arena| arena.clear_value(self.id, recursive) )
  }

  /// Gradient of the scalar `target` with respect to this node.
  ///
  /// Memoized: call [Graph::clear_all_gradients] before switching
  /// targets or after feeding new inputs.

  pub fn backward(&self, target: &Self) -> Result<Tensor<T>> {
    self.graph.check_member(target)?;
    self.graph.with_mut(|arena| arena.backward(self.id, target.id) )
  }

  /// Cached gradient, flattened to `[size, 1]` or reshaped to the node's shape.

  pub fn gradient(&self, reshaped: bool) -> Result<Option<Tensor<T>>> {
    self.read(|record| record.grad.as_ref().map(|grad| if reshaped {
      grad.reshape(&record.shape.dims)
    } else {
      grad.clone()
    }))
  }

  pub fn clear_gradient(&self) -> Result<()> {
    self.graph.with_mut(|arena| arena.get_mut(self.id).map(|record| record.grad = None ) )
  }

  /// Probabilities computed by the last forward pass of a
  /// [CrossEntropyWithSoftMax](Op::CrossEntropyWithSoftMax) node.

  pub fn probabilities(&self) -> Result<Option<Tensor<T>>> {
    self.read(|record| match &record.kind {
      Kind::Op(Op::CrossEntropyWithSoftMax { probabilities }) => probabilities.clone(),
      _ => None,
    })
  }

  /// Gradient of the scalar `target` with respect to this leaf,
  /// estimated by central differences.
  ///
  /// The leaf's value is restored afterwards, but every descendant's value
  /// and the graph's cached gradients are invalidated.

  pub fn numeric_gradient(&self, target: &Self, eps: T) -> Result<Tensor<T>> {
    if !self.is_leaf()? {
      return Err(Error::NotALeaf { name: self.full_name()? })
    }
    let shape = target.shape()?;
    if !shape.is_scalar() {
      return Err(Error::NonScalarTarget { name: target.full_name()?, shape })
    }
    let input = self.value()?.ok_or_else(|| Error::MissingValue {
      name: self.full_name().unwrap_or_default(),
      reason: "assign it before checking gradients".to_string(),
    })?;
    let two = real::<T>(2.0);
    let eval = |data: Vec<T>| -> Result<T> {
      self.assign_value(Tensor::from_shape(input.shape().clone(), data), false)?;
      target.forward()?;
      target.value()?
        .map(|value| value.item() )
        .ok_or_else(|| Error::MissingValue {
          name: target.full_name().unwrap_or_default(),
          reason: "target was not computed".to_string(),
        })
    };
    let grad = (0..input.size())
      .map(|i| {
        let mut next = input.raw().to_vec();
        next[i] += eps;
        let mut prev = input.raw().to_vec();
        prev[i] -= eps;
        Ok((eval(next)? - eval(prev)?) / (two * eps))
      })
      .collect::<Result<Vec<T>>>();
    self.assign_value(input.clone(), false)?;
    self.graph.clear_all_gradients();
    Ok(Tensor::from_shape(input.shape().clone(), grad?))
  }
}

impl<T: Real> Debug for Node<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    match self.full_name() {
      Ok(name) => write!(f, "Node({name})"),
      Err(_) => write!(f, "Node(#{} removed)", self.id.0),
    }
  }
}

impl<T: Real> std::fmt::Display for Node<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    let name = self.full_name().map_err(|_| std::fmt::Error )?;
    match self.value().map_err(|_| std::fmt::Error )? {
      Some(value) => write!(f, "{name} {value}"),
      None => write!(f, "{name} (not computed)"),
    }
  }
}
