use std::rc::Rc;
use std::cell::RefCell;
use std::collections::{ HashMap, HashSet };

use itertools::Itertools;
use rand::{ Rng, SeedableRng, rngs::StdRng };
use tracing::{ debug, trace };

use crate::{
  internal::*,
  error::{ Error, Result },
  shape::Shape,
  tensor::Tensor,
  scalar::Real,
  node::{ Node, NodeId, NodeRecord, Kind, Ownership, Op },
};


/// Registry of nodes forming one computation graph.
///
/// A `Graph` is a cheap handle; clones share the same arena. Every node
/// belongs to exactly one graph for its whole lifetime, and full node names
/// (`"<type>_<name>"`) are unique within it.

#[derive(Clone)]
pub struct Graph<T: Real> {
  arena: Rc<RefCell<Arena<T>>>,
}


/// Node counts of a graph.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Statistics {
  pub nodes: usize,
  pub operators: usize,
  pub leaves: usize,
  pub parameters: usize,
  pub trainable_elements: usize,
}


pub(crate) struct Arena<T: Real> {
  id: usize,
  name: String,
  records: Vec<Option<NodeRecord<T>>>,
  names: HashMap<String, NodeId>,
  counters: HashMap<&'static str, usize>,
  pub(crate) rng: StdRng,
}

impl<T: Real> Graph<T> {
  pub fn new(name: &str) -> Self {
    Self::seeded(name, rand::thread_rng().gen())
  }

  /// Graph whose random parameter initialization is reproducible.

  pub fn seeded(name: &str, seed: u64) -> Self {
    Self {
      arena: Rc::new(RefCell::new(Arena {
        id: make_id(),
        name: name.to_string(),
        records: vec![],
        names: HashMap::new(),
        counters: HashMap::new(),
        rng: StdRng::seed_from_u64(seed),
      })),
    }
  }

  pub fn name(&self) -> String {
    self.with(|arena| arena.name.clone() )
  }

  // The graph algorithms never call back into the handle,
  // so these borrows cannot overlap.

  pub(crate) fn with<R>(&self, cb: impl FnOnce(&Arena<T>) -> R) -> R {
    cb(&self.arena.borrow())
  }

  pub(crate) fn with_mut<R>(&self, cb: impl FnOnce(&mut Arena<T>) -> R) -> R {
    cb(&mut self.arena.borrow_mut())
  }

  pub(crate) fn handle(&self, id: NodeId) -> Node<T> {
    Node { graph: self.clone(), id }
  }

  /// Whether both handles refer to the same graph.

  pub fn same(&self, other: &Self) -> bool {
    Rc::ptr_eq(&self.arena, &other.arena)
  }

  pub(crate) fn check_member(&self, node: &Node<T>) -> Result<()> {
    if self.same(&node.graph) { return Ok(()) }
    Err(Error::ForeignNode {
      node: node.full_name().unwrap_or_else(|_| format!("#{}", node.id.0) ),
      graph: self.name(),
    })
  }

  pub(crate) fn register(
    &self,
    kind: Kind<T>,
    shape: Shape,
    name: Option<&str>,
    parents: &[&Node<T>],
    ownership: Ownership,
    value: Option<Tensor<T>>,
  ) -> Result<Node<T>> {
    for parent in parents {
      self.check_member(parent)?;
    }
    let parents = parents.iter().map(|parent| parent.id ).collect();
    let id = self.with_mut(|arena| arena.register(kind, shape, name, parents, ownership, value) )?;
    Ok(self.handle(id))
  }

  /// Create an operator node over `parents`.
  ///
  /// Shapes are validated here, before the node is linked into the graph.

  pub fn apply(&self, op: Op<T>, parents: &[&Node<T>], name: Option<&str>) -> Result<Node<T>> {
    for parent in parents {
      self.check_member(parent)?;
    }
    let shapes = parents.iter()
      .map(|parent| parent.shape() )
      .collect::<Result<Vec<_>>>()?;
    let shape = op.infer(&shapes.iter().collect::<Vec<_>>())?;
    self.register(Kind::Op(op), shape, name, parents, Ownership::Owned, None)
  }

  /// Find a node by its full name.

  pub fn lookup(&self, full_name: &str) -> Result<Node<T>> {
    let id = self.with(|arena| arena.names.get(full_name).copied() );
    id.map(|id| self.handle(id) ).ok_or_else(|| Error::NotFound {
      name: full_name.to_string(),
      graph: self.name(),
    })
  }

  /// All live nodes in registration order.

  pub fn nodes(&self) -> Vec<Node<T>> {
    self.with(|arena| arena.live().map(|record| record.id ).collect::<Vec<_>>() )
      .into_iter()
      .map(|id| self.handle(id) )
      .collect()
  }

  /// Leaves flagged as trainable, in registration order.

  pub fn trainables(&self) -> Vec<Node<T>> {
    self.with(|arena| arena.live()
      .filter(|record| record.kind.trainable() )
      .map(|record| record.id )
      .collect::<Vec<_>>())
      .into_iter()
      .map(|id| self.handle(id) )
      .collect()
  }

  pub fn len(&self) -> usize {
    self.with(|arena| arena.live().count() )
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Forget every cached gradient.

  pub fn clear_all_gradients(&self) {
    self.with_mut(|arena| {
      for record in arena.live_mut() {
        record.grad = None;
      }
    })
  }

  /// Forget every cached value, leaves included.

  pub fn clear_all_values(&self) {
    self.with_mut(|arena| {
      for record in arena.live_mut() {
        record.value = None;
      }
    })
  }

  /// Release one owned node. It must not feed any live node.

  pub fn remove(&self, node: &Node<T>) -> Result<()> {
    self.check_member(node)?;
    self.with_mut(|arena| arena.remove(node.id) )
  }

  /// Release every owned node. Borrowed variables stay registered,
  /// with links to released nodes pruned.

  pub fn teardown(&self) {
    self.with_mut(|arena| {
      let owned: Vec<NodeId> = arena.live()
        .filter(|record| record.ownership == Ownership::Owned )
        .map(|record| record.id )
        .collect();
      for &id in &owned {
        if let Some(record) = arena.records[id.0].take() {
          arena.names.remove(&record.full_name);
        }
      }
      let records = &mut arena.records;
      let alive: HashSet<usize> = records.iter().flatten().map(|record| record.id.0 ).collect();
      for record in records.iter_mut().flatten() {
        record.children.retain(|child| alive.contains(&child.0) );
        record.parents.retain(|parent| alive.contains(&parent.0) );
      }
      debug!(graph = %arena.name, released = owned.len(), kept = alive.len(), "teardown");
    })
  }

  pub fn statistics(&self) -> Statistics {
    self.with(|arena| arena.live().fold(Statistics::default(), |mut stats, record| {
      stats.nodes += 1;
      if record.kind.is_leaf() {
        stats.leaves += 1;
      } else {
        stats.operators += 1;
      }
      if matches!(record.kind, Kind::Parameter { .. }) {
        stats.parameters += 1;
      }
      if record.kind.trainable() {
        stats.trainable_elements += record.shape.size();
      }
      stats
    }))
  }
}

impl<T: Real> std::fmt::Debug for Graph<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    self.with(|arena| {
      let names = arena.live().map(|record| &record.full_name ).join(", ");
      write!(f, "Graph({}#{}: {names})", arena.name, arena.id)
    })
  }
}

impl<T: Real> Arena<T> {
  pub(crate) fn live(&self) -> impl Iterator<Item = &NodeRecord<T>> {
    self.records.iter().flatten()
  }

  fn live_mut(&mut self) -> impl Iterator<Item = &mut NodeRecord<T>> {
    self.records.iter_mut().flatten()
  }

  pub(crate) fn get(&self, id: NodeId) -> Result<&NodeRecord<T>> {
    self.records.get(id.0)
      .and_then(Option::as_ref)
      .ok_or_else(|| Error::NotFound { name: format!("#{}", id.0), graph: self.name.clone() })
  }

  pub(crate) fn get_mut(&mut self, id: NodeId) -> Result<&mut NodeRecord<T>> {
    let graph = &self.name;
    self.records.get_mut(id.0)
      .and_then(Option::as_mut)
      .ok_or_else(|| Error::NotFound { name: format!("#{}", id.0), graph: graph.clone() })
  }

  fn value_of(&self, id: NodeId) -> Result<&Tensor<T>> {
    let record = self.get(id)?;
    record.value.as_ref().ok_or_else(|| Error::MissingValue {
      name: record.full_name.clone(),
      reason: "it should have been computed by the forward pass".to_string(),
    })
  }

  fn register(
    &mut self,
    kind: Kind<T>,
    shape: Shape,
    name: Option<&str>,
    parents: Vec<NodeId>,
    ownership: Ownership,
    value: Option<Tensor<T>>,
  ) -> Result<NodeId> {
    let type_name = kind.name();
    let name = match name.filter(|name| !name.is_empty() ) {
      Some(name) => name.to_string(),
      None => loop {
        let counter = self.counters.entry(type_name).or_insert(0);
        let name = counter.to_string();
        *counter += 1;
        if !self.names.contains_key(&format!("{type_name}_{name}")) { break name }
      },
    };
    let full_name = format!("{type_name}_{name}");
    if self.names.contains_key(&full_name) {
      return Err(Error::DuplicateName { name: full_name, graph: self.name.clone() })
    }

    let id = NodeId(self.records.len());
    // Links only ever point from older to newer nodes, so no cycle can form
    for &parent in &parents {
      self.get(parent)?;
      debug_assert!(parent < id);
    }
    for &parent in parents.iter().unique() {
      self.get_mut(parent)?.children.push(id);
    }

    debug!(graph = %self.name, node = %full_name, parents = parents.len(), "registered");
    self.names.insert(full_name.clone(), id);
    self.records.push(Some(NodeRecord {
      id,
      kind,
      name,
      full_name,
      shape,
      parents,
      children: vec![],
      value,
      grad: None,
      ownership,
    }));
    Ok(id)
  }

  fn remove(&mut self, id: NodeId) -> Result<()> {
    let record = self.get(id)?;
    if record.ownership == Ownership::Borrowed {
      return Err(Error::Release { name: record.full_name.clone(), reason: "the graph does not own it".to_string() })
    }
    if !record.children.is_empty() {
      let children = record.children.iter()
        .filter_map(|&child| self.get(child).ok() )
        .map(|child| &child.full_name )
        .join(", ");
      return Err(Error::Release { name: record.full_name.clone(), reason: format!("it still feeds {children}") })
    }
    let parents = record.parents.clone();
    for parent in parents {
      if let Ok(parent) = self.get_mut(parent) {
        parent.children.retain(|&child| child != id );
      }
    }
    if let Some(record) = self.records[id.0].take() {
      debug!(graph = %self.name, node = %record.full_name, "removed");
      self.names.remove(&record.full_name);
    }
    Ok(())
  }

  pub(crate) fn forward(&mut self, id: NodeId) -> Result<()> {
    let record = self.get(id)?;
    if record.value.is_some() { return Ok(()) }
    if record.kind.is_leaf() {
      return Err(Error::MissingValue {
        name: record.full_name.clone(),
        reason: "leaves only receive values through assign_value".to_string(),
      })
    }
    let parents = record.parents.clone();
    for &parent in &parents {
      if self.get(parent)?.value.is_none() {
        self.forward(parent)?;
      }
    }

    // Borrow the operator out of its record while the parents' values are read
    let mut op = match &mut self.get_mut(id)?.kind {
      Kind::Op(op) => std::mem::replace(op, Op::Add),
      _ => return Ok(()),
    };
    let result = self.compute(&mut op, &parents);
    let record = self.get_mut(id)?;
    record.kind = Kind::Op(op);
    let value = result?;
    trace!(node = %record.full_name, shape = %value.shape(), "forward");
    if value.shape() != &record.shape {
      record.grad = None;
      record.shape = value.shape().clone();
    }
    record.value = Some(value);
    Ok(())
  }

  fn compute(&self, op: &mut Op<T>, parents: &[NodeId]) -> Result<Tensor<T>> {
    let inputs = parents.iter()
      .map(|&parent| self.value_of(parent) )
      .collect::<Result<Vec<_>>>()?;
    let shapes: Vec<&Shape> = inputs.iter().map(|input| input.shape() ).collect();
    op.infer(&shapes)?;
    Ok(op.run(&inputs))
  }

  pub(crate) fn assign_value(&mut self, id: NodeId, value: Tensor<T>, check_shape: bool) -> Result<()> {
    let record = self.get_mut(id)?;
    if check_shape && value.shape() != &record.shape {
      return Err(Error::shape(
        format!("assigning {}", record.full_name),
        record.shape.to_string(),
        value.shape(),
      ))
    }
    if value.shape() != &record.shape {
      record.grad = None;
      record.shape = value.shape().clone();
    }
    record.value = Some(value);
    let children = record.children.clone();
    for child in children {
      self.clear_value(child, true)?;
    }
    Ok(())
  }

  pub(crate) fn clear_value(&mut self, id: NodeId, recursive: bool) -> Result<()> {
    let mut pending = vec![id];
    let mut visited = HashSet::new();
    while let Some(id) = pending.pop() {
      if !visited.insert(id) { continue }
      let record = self.get_mut(id)?;
      record.value = None;
      if recursive {
        pending.extend(record.children.iter().copied());
      }
    }
    Ok(())
  }

  pub(crate) fn backward(&mut self, id: NodeId, target: NodeId) -> Result<Tensor<T>> {
    let record = self.get(target)?;
    if !record.shape.is_scalar() {
      return Err(Error::NonScalarTarget { name: record.full_name.clone(), shape: record.shape.clone() })
    }
    self.gradient(id, target)
  }

  fn gradient(&mut self, id: NodeId, target: NodeId) -> Result<Tensor<T>> {
    let record = self.get(id)?;
    if let Some(grad) = &record.grad { return Ok(grad.clone()) }
    let size = record.shape.size();
    let grad = if id == target {
      Tensor::ones(&[size, 1])
    } else {
      let children = record.children.clone();
      let mut grad = Tensor::zeros(&[size, 1]);
      for child in children {
        // Children outside the last forward pass did not contribute
        if self.get(child)?.value.is_none() { continue }
        let child_grad = self.gradient(child, target)?;
        grad = grad.add(&self.contribution(child, id, &child_grad)?);
      }
      grad
    };
    let record = self.get_mut(id)?;
    trace!(node = %record.full_name, "backward");
    record.grad = Some(grad.clone());
    Ok(grad)
  }

  /// Part of `parent`'s gradient that flows through `child`.

  fn contribution(&self, child: NodeId, parent: NodeId, child_grad: &Tensor<T>) -> Result<Tensor<T>> {
    let record = self.get(child)?;
    let parent_size = self.get(parent)?.shape.size();
    let mut total = Tensor::zeros(&[parent_size, 1]);
    let Kind::Op(op) = &record.kind else { return Ok(total) };
    let output = self.value_of(child)?;
    let inputs = record.parents.iter()
      .map(|&p| self.value_of(p) )
      .collect::<Result<Vec<_>>>()?;
    for (index, _) in record.parents.iter().enumerate().filter(|&(_, &p)| p == parent ) {
      let local = op.derive(index, &inputs, output, child_grad).apply(child_grad);
      if local.size() != parent_size {
        return Err(Error::shape(format!("gradient of {}", record.full_name), format!("size {parent_size}"), local.shape()))
      }
      total = total.add(&local);
    }
    Ok(total)
  }
}
