//! A single network line: an access line or an area backbone.

use crate::error::{Error, Result};
use oraas_model::sampling::clipped_normal;
use oraas_model::RESOURCE_EPS;
use rand_chacha::ChaCha8Rng;

/// One line with a bandwidth capacity, a base latency, and a mean jitter
/// count per slot.
#[derive(Debug, Clone)]
pub struct Link {
    capacity_bw: f64,
    base_latency: f64,
    mean_jitter: f64,
    free_bw: f64,
    occupied_time: f64,
}

impl Link {
    /// Creates a line with the given capacity triple.
    #[must_use]
    pub const fn new(bandwidth: f64, latency: f64, jitter: f64) -> Self {
        Self {
            capacity_bw: bandwidth,
            base_latency: latency,
            mean_jitter: jitter,
            free_bw: bandwidth,
            occupied_time: 0.0,
        }
    }

    /// Bandwidth capacity in MBps.
    #[must_use]
    pub const fn capacity_bw(&self) -> f64 {
        self.capacity_bw
    }

    /// Deterministic base latency in ms.
    #[must_use]
    pub const fn base_latency(&self) -> f64 {
        self.base_latency
    }

    /// Mean jitter count per slot.
    #[must_use]
    pub const fn mean_jitter(&self) -> f64 {
        self.mean_jitter
    }

    /// Bandwidth not held by long-lived reservations, in MBps.
    #[must_use]
    pub const fn free_bw(&self) -> f64 {
        self.free_bw
    }

    /// Earliest time (ms from slot start) at which the line is no longer
    /// busy with back-to-back short transfers.
    #[must_use]
    pub const fn occupied_time(&self) -> f64 {
        self.occupied_time
    }

    /// Samples a jitter count: the mean plus scaled normal noise, clamped
    /// at zero and rounded.
    #[must_use]
    pub fn sample_jitter(&self, rng: &mut ChaCha8Rng) -> f64 {
        clipped_normal(rng, self.mean_jitter, self.mean_jitter / 3.0, 0.0).round()
    }

    /// Applies a reservation delta (positive reserves, negative releases).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeBandwidth`] when the result would go below
    /// zero (within tolerance); the line is left unchanged.
    pub fn apply_bw_delta(&mut self, delta: f64, what: &'static str) -> Result<()> {
        let next = self.free_bw - delta;
        if next < -RESOURCE_EPS {
            return Err(Error::NegativeBandwidth { what, value: next });
        }
        self.free_bw = next;
        Ok(())
    }

    /// Pushes the transfer watermark out to `end_time` ms.
    pub fn occupy_until(&mut self, end_time: f64) {
        self.occupied_time = end_time;
    }

    /// Slot rollover: clears the transient transfer watermark.
    pub fn step(&mut self) {
        self.occupied_time = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn reserve_and_release_are_inverses() {
        let mut link = Link::new(100.0, 5.0, 3.0);
        link.apply_bw_delta(40.0, "access").unwrap();
        assert!((link.free_bw() - 60.0).abs() < 1e-12);
        link.apply_bw_delta(-40.0, "access").unwrap();
        assert!((link.free_bw() - 100.0).abs() < 1e-12);
    }

    #[test]
    fn over_reservation_is_rejected_and_leaves_state() {
        let mut link = Link::new(10.0, 5.0, 3.0);
        assert!(matches!(
            link.apply_bw_delta(10.5, "access"),
            Err(Error::NegativeBandwidth { .. })
        ));
        assert!((link.free_bw() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn step_clears_the_watermark() {
        let mut link = Link::new(10.0, 5.0, 3.0);
        link.occupy_until(120.0);
        assert!((link.occupied_time() - 120.0).abs() < 1e-12);
        link.step();
        assert!(link.occupied_time().abs() < 1e-12);
    }

    #[test]
    fn sampled_jitter_is_non_negative() {
        let link = Link::new(10.0, 5.0, 6.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..500 {
            let j = link.sample_jitter(&mut rng);
            assert!(j >= 0.0);
            assert!((j - j.round()).abs() < f64::EPSILON);
        }
    }
}
