//! Clipped random sampling helpers.
//!
//! All stochastic model parameters are drawn from normal distributions
//! clamped to a floor, so a single seeded [`ChaCha8Rng`] reproduces an
//! identical population.

use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Samples `N(mean, std_dev)` clamped below at `floor`.
///
/// # Panics
///
/// Panics if `std_dev` is not finite and positive (never happens for the
/// fixed model parameters).
#[must_use]
pub fn clipped_normal(rng: &mut ChaCha8Rng, mean: f64, std_dev: f64, floor: f64) -> f64 {
    let normal = Normal::new(mean, std_dev).expect("finite distribution parameters");
    normal.sample(rng).max(floor)
}

/// Samples `N(mean, std_dev)` clamped below at `floor` and rounded to the
/// nearest integer value.
///
/// # Panics
///
/// Panics if `std_dev` is not finite and positive (never happens for the
/// fixed model parameters).
#[must_use]
pub fn rounded_normal(rng: &mut ChaCha8Rng, mean: f64, std_dev: f64, floor: f64) -> f64 {
    clipped_normal(rng, mean, std_dev, floor).round().max(floor)
}
