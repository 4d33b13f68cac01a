use std::collections::HashMap;

use serde::{ Serialize, Deserialize };
use tracing::debug;

use crate::{
  internal::*,
  error::{ Error, Result },
  scalar::Real,
  tensor::Tensor,
  node::{ Node, Graph },
};


/// An optimization strategy to be used with [Optimizer].
///
/// Strategies compute the change to apply to a parameter from its
/// mean gradient. Per-parameter state is keyed by full node name.

pub trait Strategy<T: Real> {
  /// Called once per [Optimizer::update], before any parameter is visited.
  fn advance(&mut self) {}

  fn update(&mut self, name: &str, value: &Tensor<T>, grad: &Tensor<T>, rate: T) -> Tensor<T>;

  /// Forget all accumulated state.
  fn reset(&mut self) {}
}


impl<T: Real, S: Strategy<T> + ?Sized> Strategy<T> for Box<S> {
  fn advance(&mut self) {
    (**self).advance()
  }

  fn update(&mut self, name: &str, value: &Tensor<T>, grad: &Tensor<T>, rate: T) -> Tensor<T> {
    (**self).update(name, value, grad, rate)
  }

  fn reset(&mut self) {
    (**self).reset()
  }
}


/// Drives propagation for one scalar target and updates the graph's
/// parameters with a [Strategy] once every `batch_size` steps.

#[derive(Debug)]
pub struct Optimizer<T: Real, S: Strategy<T>> {
  graph: Graph<T>,
  target: Node<T>,
  strategy: S,
  pub learning_rate: T,
  /// Steps per update. Zero behaves like one.
  pub batch_size: usize,
  acc: HashMap<String, Tensor<T>>,
  count: usize,
}

impl<T: Real, S: Strategy<T>> Optimizer<T, S> {
  pub fn new(target: &Node<T>, learning_rate: T, batch_size: usize, strategy: S) -> Self {
    Self {
      graph: target.graph().clone(),
      target: target.clone(),
      strategy,
      learning_rate,
      batch_size: batch_size.max(1),
      acc: HashMap::new(),
      count: 0,
    }
  }

  pub fn strategy(&self) -> &S {
    &self.strategy
  }

  /// Number of steps accumulated since the last update.

  pub fn pending(&self) -> usize {
    self.count
  }

  /// Run one forward and backward pass and accumulate the gradients
  /// of every trainable leaf. Parameters get updated once a full
  /// mini-batch has been accumulated.

  pub fn step(&mut self) -> Result<()> {
    self.zero_grad();
    self.target.forward()?;
    for node in self.graph.trainables() {
      let grad = node.backward(&self.target)?.reshape(&node.shape()?.dims);
      let acc = self.acc.entry(node.full_name()?).or_insert_with(|| Tensor::zeros(grad.dims()) );
      *acc = if acc.shape() == grad.shape() { acc.add(&grad) } else { grad };
    }
    self.count += 1;
    if self.count >= self.batch() {
      self.update()?;
      self.discard_batch();
    }
    Ok(())
  }

  /// Apply the strategy to every trainable parameter, using the mean
  /// of the accumulated gradients.

  pub fn update(&mut self) -> Result<()> {
    self.strategy.advance();
    let scale = T::one() / real::<T>(self.batch() as f64);
    let mut updated = 0;
    for node in self.graph.trainables() {
      if !node.is_parameter()? { continue }
      let name = node.full_name()?;
      let Some(acc) = self.acc.get(&name) else { continue };
      let value = node.value()?.ok_or_else(|| Error::MissingValue {
        name: name.clone(),
        reason: "parameters need a value to be updated".to_string(),
      })?;
      let grad = acc.scale(scale);
      let change = self.strategy.update(&name, &value, &grad, self.learning_rate);
      node.assign_value(value.add(&change), true)?;
      updated += 1;
    }
    debug!(graph = %self.graph.name(), parameters = updated, batch = self.count, "updated");
    Ok(())
  }

  fn batch(&self) -> usize {
    self.batch_size.max(1)
  }

  /// Forget the graph's cached gradients.

  pub fn zero_grad(&self) {
    self.graph.clear_all_gradients();
  }

  /// Drop accumulated gradients without updating.

  pub fn discard_batch(&mut self) {
    self.acc.clear();
    self.count = 0;
  }

  /// Restart training from scratch, clearing the strategy's state.

  pub fn reset_state(&mut self) {
    self.discard_batch();
    self.strategy.reset();
  }
}


/// Stochastic Gradient Descent strategy

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SGD;

impl<T: Real> Strategy<T> for SGD {
  fn update(&mut self, _name: &str, _value: &Tensor<T>, grad: &Tensor<T>, rate: T) -> Tensor<T> {
    grad.scale(-rate)
  }
}


/// Stochastic Gradient Descent with momentum

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Momentum<T: Real> {
  pub momentum: T,
  v: HashMap<String, Tensor<T>>,
}

impl<T: Real> Momentum<T> {
  pub fn new(momentum: T) -> Self {
    Self { momentum, v: HashMap::new() }
  }
}

impl<T: Real> Default for Momentum<T> {
  fn default() -> Self {
    Self::new(real(0.9))
  }
}

impl<T: Real> Strategy<T> for Momentum<T> {
  fn update(&mut self, name: &str, _value: &Tensor<T>, grad: &Tensor<T>, rate: T) -> Tensor<T> {
    let v = self.v.entry(name.to_string()).or_insert_with(|| Tensor::zeros(grad.dims()) );
    *v = v.scale(self.momentum).sub(&grad.scale(rate));
    v.clone()
  }

  fn reset(&mut self) {
    self.v.clear();
  }
}


/// Adaptive gradient strategy, scaling each weight by its gradient history

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaGrad<T: Real> {
  pub epsilon: T,
  s: HashMap<String, Tensor<T>>,
}

impl<T: Real> AdaGrad<T> {
  pub fn new(epsilon: T) -> Self {
    Self { epsilon, s: HashMap::new() }
  }
}

impl<T: Real> Default for AdaGrad<T> {
  fn default() -> Self {
    Self::new(real(1e-10))
  }
}

impl<T: Real> Strategy<T> for AdaGrad<T> {
  fn update(&mut self, name: &str, _value: &Tensor<T>, grad: &Tensor<T>, rate: T) -> Tensor<T> {
    let s = self.s.entry(name.to_string()).or_insert_with(|| Tensor::zeros(grad.dims()) );
    *s = s.add(&grad.powi(2));
    let epsilon = self.epsilon;
    grad.div(&s.sqrt().vectorize(|a| a + epsilon )).scale(-rate)
  }

  fn reset(&mut self) {
    self.s.clear();
  }
}


/// Root mean square propagation

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RMSProp<T: Real> {
  pub beta: T,
  pub epsilon: T,
  s: HashMap<String, Tensor<T>>,
}

impl<T: Real> RMSProp<T> {
  pub fn new(beta: T, epsilon: T) -> Self {
    Self { beta, epsilon, s: HashMap::new() }
  }
}

impl<T: Real> Default for RMSProp<T> {
  fn default() -> Self {
    Self::new(real(0.9), real(1e-10))
  }
}

impl<T: Real> Strategy<T> for RMSProp<T> {
  fn update(&mut self, name: &str, _value: &Tensor<T>, grad: &Tensor<T>, rate: T) -> Tensor<T> {
    let s = self.s.entry(name.to_string()).or_insert_with(|| Tensor::zeros(grad.dims()) );
    *s = s.scale(self.beta).add(&grad.powi(2).scale(T::one() - self.beta));
    let epsilon = self.epsilon;
    grad.div(&s.sqrt().vectorize(|a| a + epsilon )).scale(-rate)
  }

  fn reset(&mut self) {
    self.s.clear();
  }
}


/// Adaptive Movement Estimation strategy (ADAM)
///
/// A non-zero `weight_decay` shrinks weights directly,
/// independent of the moment estimates.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam<T: Real> {
  pub beta1: T,
  pub beta2: T,
  pub epsilon: T,
  pub weight_decay: T,
  m: HashMap<String, Tensor<T>>,
  v: HashMap<String, Tensor<T>>,
  beta1_power: T,
  beta2_power: T,
}

impl<T: Real> Adam<T> {
  pub fn new(beta1: T, beta2: T) -> Self {
    Self {
      beta1,
      beta2,
      epsilon: real(1e-8),
      weight_decay: T::zero(),
      m: HashMap::new(),
      v: HashMap::new(),
      beta1_power: T::one(),
      beta2_power: T::one(),
    }
  }

  pub fn with_weight_decay(self, weight_decay: T) -> Self {
    Self { weight_decay, ..self }
  }

  /// First and second moment estimates of a parameter.

  pub fn moments(&self, name: &str) -> Option<(&Tensor<T>, &Tensor<T>)> {
    self.m.get(name).zip(self.v.get(name))
  }
}

impl<T: Real> Default for Adam<T> {
  fn default() -> Self {
    Self::new(real(0.9), real(0.999))
  }
}

impl<T: Real> Strategy<T> for Adam<T> {
  fn advance(&mut self) {
    self.beta1_power = self.beta1_power * self.beta1;
    self.beta2_power = self.beta2_power * self.beta2;
  }

  fn update(&mut self, name: &str, value: &Tensor<T>, grad: &Tensor<T>, rate: T) -> Tensor<T> {
    let one = T::one();
    let m = self.m.entry(name.to_string()).or_insert_with(|| Tensor::zeros(grad.dims()) );
    *m = m.scale(self.beta1).add(&grad.scale(one - self.beta1));
    let mt = m.scale(one / (one - self.beta1_power));
    let v = self.v.entry(name.to_string()).or_insert_with(|| Tensor::zeros(grad.dims()) );
    *v = v.scale(self.beta2).add(&grad.powi(2).scale(one - self.beta2));
    let vt = v.scale(one / (one - self.beta2_power));
    let epsilon = self.epsilon;
    let change = mt.div(&vt.sqrt().vectorize(|a| a + epsilon )).scale(-rate);
    if self.weight_decay > T::zero() {
      change.sub(&value.scale(rate * self.weight_decay))
    } else {
      change
    }
  }

  fn reset(&mut self) {
    self.m.clear();
    self.v.clear();
    self.beta1_power = T::one();
    self.beta2_power = T::one();
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  // Returns the graph, a parameter `w` and the loss `sum(w * w)`
  fn quadratic(init: &[f64]) -> (Graph<f64>, Node<f64>, Node<f64>) {
    let graph = Graph::new("quadratic");
    let w = Tensor::column(init).trained(&graph).unwrap();
    let loss = w.mul(&w).unwrap().reduce_sum().unwrap();
    (graph, w, loss)
  }

  fn value(node: &Node<f64>) -> Tensor<f64> {
    node.value().unwrap().unwrap()
  }

  #[test]
  fn sgd() {
    let (_graph, w, loss) = quadratic(&[1.0, 2.0]);
    let mut optimizer = Optimizer::new(&loss, 0.1, 1, SGD);
    optimizer.step().unwrap();
    assert!(value(&w).approx_eq(&Tensor::column(&[0.8, 1.6]), 1e-12));
    optimizer.step().unwrap();
    assert!(value(&w).approx_eq(&Tensor::column(&[0.64, 1.28]), 1e-12));
  }

  #[test]
  fn mini_batches() {
    let graph = Graph::<f64>::new("batch");
    let w = Tensor::column(&[1.0, 1.0]).trained(&graph).unwrap();
    let x = graph.variable(&[2,1], Some("x")).unwrap();
    x.set_trainable(true).unwrap();
    let loss = w.vecdot(&x).unwrap();
    let mut optimizer = Optimizer::new(&loss, 0.5, 2, SGD);

    x.assign_value(Tensor::column(&[1.0, 1.0]), true).unwrap();
    optimizer.step().unwrap();
    assert_eq!(optimizer.pending(), 1);
    assert_eq!(value(&w), Tensor::column(&[1.0, 1.0]));

    x.assign_value(Tensor::column(&[3.0, 5.0]), true).unwrap();
    optimizer.step().unwrap();
    assert_eq!(optimizer.pending(), 0);
    // Mean gradient is [2, 3]
    assert!(value(&w).approx_eq(&Tensor::column(&[0.0, -0.5]), 1e-12));
    // Trainable variables contribute gradients but are never updated
    assert_eq!(value(&x), Tensor::column(&[3.0, 5.0]));
  }

  #[test]
  fn discard_partial_batches() {
    let (_graph, w, loss) = quadratic(&[1.0]);
    let mut optimizer = Optimizer::new(&loss, 0.1, 3, SGD);
    optimizer.step().unwrap();
    assert!(w.gradient(false).unwrap().is_some());
    optimizer.zero_grad();
    assert_eq!(w.gradient(false).unwrap(), None);
    assert_eq!(optimizer.pending(), 1);
    optimizer.discard_batch();
    assert_eq!(optimizer.pending(), 0);
    assert_eq!(value(&w), Tensor::column(&[1.0]));
  }

  #[test]
  fn empty_batches_update_every_step() {
    let (_graph, w, loss) = quadratic(&[1.0, 2.0]);
    let mut optimizer = Optimizer::new(&loss, 0.1, 4, SGD);
    optimizer.batch_size = 0;
    optimizer.step().unwrap();
    assert_eq!(optimizer.pending(), 0);
    assert!(value(&w).approx_eq(&Tensor::column(&[0.8, 1.6]), 1e-12));
  }

  #[test]
  fn momentum() {
    let graph = Graph::<f64>::new("momentum");
    let w = Tensor::column(&[0.0, 0.0]).trained(&graph).unwrap();
    let c = Tensor::column(&[1.0, 1.0]).tracked(&graph).unwrap();
    let loss = w.vecdot(&c).unwrap();
    let mut optimizer = Optimizer::new(&loss, 0.1, 1, Momentum::default());
    optimizer.step().unwrap();
    optimizer.step().unwrap();
    assert!(value(&w).approx_eq(&Tensor::column(&[-0.29, -0.29]), 1e-12));
  }

  #[test]
  fn adaptive_strategies_normalize_steps() {
    for rms in [false, true] {
      let (_graph, w, loss) = quadratic(&[1.0, -3.0]);
      let mut optimizer: Optimizer<f64, Box<dyn Strategy<f64>>> = Optimizer::new(
        &loss, 0.1, 1,
        if rms { Box::new(RMSProp::new(0.0, 0.0)) } else { Box::new(AdaGrad::new(0.0)) },
      );
      optimizer.step().unwrap();
      assert!(value(&w).approx_eq(&Tensor::column(&[0.9, -2.9]), 1e-12));
    }
  }

  #[test]
  fn adam() {
    let (_graph, w, loss) = quadratic(&[1.0, -2.0]);
    let mut optimizer = Optimizer::new(&loss, 0.1, 1, Adam::default());
    optimizer.step().unwrap();
    // The first bias-corrected step moves every weight by about the learning rate
    assert!(value(&w).approx_eq(&Tensor::column(&[0.9, -1.9]), 1e-6));
    assert!(optimizer.strategy().moments("Parameter_0").is_some());

    optimizer.reset_state();
    assert!(optimizer.strategy().moments("Parameter_0").is_none());
    optimizer.step().unwrap();
    assert!(value(&w).approx_eq(&Tensor::column(&[0.8, -1.8]), 1e-6));
  }

  #[test]
  fn adam_weight_decay() {
    let graph = Graph::<f64>::new("decay");
    let w = Tensor::column(&[2.0]).trained(&graph).unwrap();
    let c = Tensor::column(&[0.0]).tracked(&graph).unwrap();
    // Zero gradient, so only the decay moves the weight
    let loss = w.vecdot(&c).unwrap();
    let mut optimizer = Optimizer::new(&loss, 0.1, 1, Adam::default().with_weight_decay(0.5));
    optimizer.step().unwrap();
    assert!(value(&w).approx_eq(&Tensor::column(&[1.9]), 1e-12));
  }
}
