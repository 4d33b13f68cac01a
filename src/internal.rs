use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::scalar::Real;


#[inline]
pub fn negative_index(i: isize, n: usize, start_behind: bool) -> usize {
  if i < 0 {
    let offset = if start_behind { 1 } else { 0 };
    (n as isize + i + offset) as usize
  } else {
    i as usize
  }
}


/// Process-unique identifier, used to tell graph arenas apart.

pub fn make_id() -> usize {
  static LAST_ID: AtomicUsize = AtomicUsize::new(0);
  LAST_ID.fetch_add(1, Ordering::Relaxed)
}


/// Float constant in any real type.

#[inline]
pub fn real<T: Real>(x: f64) -> T {
  T::from(x).unwrap_or_else(T::nan)
}


// Polar Box-Muller transformation

pub fn randn<T: Real, R: Rng>(rng: &mut R) -> (T, T) {
  loop {
    let u = rng.gen_range(-T::one(), T::one());
    let v = rng.gen_range(-T::one(), T::one());
    let r = u * u + v * v;
    // Try again if outside interval
    if r == T::zero() || r >= T::one() { continue }
    let c = (real::<T>(-2.0) * r.ln() / r).sqrt();
    return (u * c, v * c)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use rand::{SeedableRng, rngs::StdRng};

  #[test]
  fn negative() {
    assert_eq!(negative_index(-1, 3, false), 2);
    assert_eq!(negative_index(-1, 3, true), 3);
    assert_eq!(negative_index(1, 3, false), 1);
  }

  #[test]
  fn seeded_randn() {
    let a: (f64, f64) = randn(&mut StdRng::seed_from_u64(7));
    let b: (f64, f64) = randn(&mut StdRng::seed_from_u64(7));
    assert_eq!(a, b);
  }
}
