use crate::shape::Shape;


/// Broad class of an [Error].

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
  /// Registry invariants: unique names, one owning graph per node, safe release.
  GraphConsistency,
  Shape,
  /// Propagation preconditions: scalar targets, present values.
  NodeState,
  NotFound,
  Io,
}


/// Everything that can go wrong while building or propagating a graph.

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("node name {name} is already taken in graph {graph}")]
  DuplicateName { name: String, graph: String },

  #[error("node {node} belongs to another graph than {graph}")]
  ForeignNode { node: String, graph: String },

  #[error("cannot release node {name}: {reason}")]
  Release { name: String, reason: String },

  #[error("{op}: expected {expected}, got {got}")]
  Shape { op: String, expected: String, got: Shape },

  #[error("{op} takes {expected} parents, got {got}")]
  Arity { op: String, expected: String, got: usize },

  #[error("backward target {name} must be a scalar, got {shape}")]
  NonScalarTarget { name: String, shape: Shape },

  #[error("node {name} has no value; {reason}")]
  MissingValue { name: String, reason: String },

  #[error("node {name} is not a leaf")]
  NotALeaf { name: String },

  #[error("no node named {name} in graph {graph}")]
  NotFound { name: String, graph: String },

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error("snapshot: {0}")]
  Snapshot(String),
}

impl Error {
  pub fn category(&self) -> ErrorCategory {
    match self {
      Self::DuplicateName { .. } | Self::ForeignNode { .. } |
      Self::Release { .. } => ErrorCategory::GraphConsistency,
      Self::Shape { .. } | Self::Arity { .. } => ErrorCategory::Shape,
      Self::NonScalarTarget { .. } | Self::MissingValue { .. } | Self::NotALeaf { .. } => ErrorCategory::NodeState,
      Self::NotFound { .. } => ErrorCategory::NotFound,
      Self::Io(_) | Self::Snapshot(_) => ErrorCategory::Io,
    }
  }

  pub(crate) fn shape(op: impl Into<String>, expected: impl Into<String>, got: &Shape) -> Self {
    Self::Shape { op: op.into(), expected: expected.into(), got: got.clone() }
  }
}


pub type Result<T> = std::result::Result<T, Error>;


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn categories() {
    let err = Error::DuplicateName { name: "Variable_x".into(), graph: "g".into() };
    assert_eq!(err.category(), ErrorCategory::GraphConsistency);
    assert_eq!(err.to_string(), "node name Variable_x is already taken in graph g");

    let err = Error::shape("MatMul", "[3, _]", &Shape::new(&[2,2]));
    assert_eq!(err.category(), ErrorCategory::Shape);
    assert_eq!(err.to_string(), "MatMul: expected [3, _], got Shape[2, 2]");
  }
}
