//! Uniform random baseline policy.

use crate::observation::Observation;
use crate::{Action, Scheduler};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Picks a uniformly random candidate; used as the floor baseline in
/// evaluation sweeps. Carries its own seeded RNG so it does not perturb the
/// environment's random stream.
#[derive(Debug, Clone)]
pub struct RandomScheduler {
    rng: ChaCha8Rng,
}

impl RandomScheduler {
    /// Creates a random policy with its own seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Scheduler for RandomScheduler {
    fn name(&self) -> &'static str {
        "random"
    }

    fn choose(&mut self, observation: &Observation) -> Action {
        if observation.candidates.is_empty() {
            return Action::Drop;
        }
        Action::Select(self.rng.gen_range(0..observation.candidates.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::CandidateLink;

    fn observation(count: usize) -> Observation {
        Observation {
            task_info: vec![0.0; 4],
            worker_type: 1.0,
            compute_bandwidth: 50.0,
            total_candidates: count,
            candidates: (0..count)
                .map(|i| {
                    #[allow(clippy::cast_precision_loss)]
                    let bandwidth = i as f64;
                    CandidateLink {
                        bandwidth,
                        latency: 5.0,
                        jitter: 1.0,
                    }
                })
                .collect(),
        }
    }

    #[test]
    fn selections_stay_in_range() {
        let mut random = RandomScheduler::new(1);
        for _ in 0..100 {
            match random.choose(&observation(4)) {
                Action::Select(i) => assert!(i < 4),
                Action::Drop => panic!("non-empty pool must not drop"),
            }
        }
    }

    #[test]
    fn empty_pool_drops() {
        let mut random = RandomScheduler::new(1);
        assert_eq!(random.choose(&observation(0)), Action::Drop);
    }

    #[test]
    fn same_seed_same_choices() {
        let mut a = RandomScheduler::new(9);
        let mut b = RandomScheduler::new(9);
        for _ in 0..50 {
            assert_eq!(a.choose(&observation(7)), b.choose(&observation(7)));
        }
    }
}
