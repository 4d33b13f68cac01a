//! Reverse-mode automatic differentiation over a mutable graph of tensor nodes.
//! Small. Few dependencies. CPU only.
//!
//! # Features
//!
//! - **Explicit graphs**: Every node lives in exactly one [Graph]. Node handles
//! are cheap to clone and all clones observe the same cached value and gradient.
//!
//! - **Lazy, memoized propagation**: [Node::forward] computes a value once and
//! caches it until an ancestor gets a new value. [Node::backward] computes and caches
//! the gradient of a scalar target by walking a node's children.
//!
//! - **Checked construction**: Operator shapes are validated when a node is
//! created, and links can only point from older to newer nodes, so graphs stay acyclic.
//!
//! - **Explicit ownership**: Variables are lent to a graph and survive
//! [Graph::teardown], Parameters and operator nodes belong to it.
//!
//! - **Optimization**: Mini-batch gradient accumulation with SGD, Momentum,
//! AdaGrad, RMSProp and ADAM update rules.
//!
//! # Examples
//!
//! Fitting a single weight:
//! ```
//! use nodegrad::{ Graph, Tensor, optimize::{ Optimizer, SGD } };
//!
//! # fn main() -> nodegrad::Result<()> {
//! let graph = Graph::<f64>::seeded("fit", 7);
//! let w = graph.parameter(&[1, 1], Some("w"))?;
//! let x = graph.variable(&[1, 1], Some("x"))?;
//! let y = graph.variable(&[1, 1], Some("y"))?;
//! let loss = w.matmul(&x)?.mse_loss(&y)?;
//!
//! let mut optimizer = Optimizer::new(&loss, 0.1, 1, SGD);
//! for _ in 0..200 {
//!   x.assign_value(Tensor::scalar(2.0), true)?;
//!   y.assign_value(Tensor::scalar(6.0), true)?;
//!   optimizer.step()?;
//! }
//! assert!((w.value()?.unwrap().item() - 3.0).abs() < 1e-6);
//! # Ok(())
//! # }
//! ```
//!
//! # Optional features
//!
//! Some features can be toggled in your `Cargo.toml`.
//!
//! - `unsafe` *(default)*: Accelerated matrix math using [matrixmultiply] crate.
//! - `rayon`: Row-parallel matrix products when `unsafe` is disabled.

mod internal;
mod shape;
mod tensor;
mod error;
mod node;

pub mod ops;
pub mod scalar;
pub mod optimize;

pub use shape::Shape;
pub use tensor::Tensor;
pub use error::{ Error, ErrorCategory, Result };
pub use node::{ Node, NodeId, Ownership, Graph, Statistics, Op, Local };
