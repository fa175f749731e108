//! Greedy baseline: widest link, then lowest latency, then lowest jitter.

use crate::observation::Observation;
use crate::{Action, Scheduler};

/// The greedy filestore policy.
///
/// The achievable speed of a candidate is capped by the compute worker's
/// access line, so candidates are ranked by `min(compute_bw, candidate_bw)`
/// first; latency and jitter only break ties, and the lowest index wins a
/// full tie.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyScheduler;

impl GreedyScheduler {
    /// Creates the greedy policy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Indices of `candidates` whose value is tied for the maximum.
fn tied_for_max(candidates: &[usize], value: impl Fn(usize) -> f64) -> Vec<usize> {
    let best = candidates
        .iter()
        .map(|&i| value(i))
        .fold(f64::NEG_INFINITY, f64::max);
    candidates
        .iter()
        .copied()
        .filter(|&i| (value(i) - best).abs() < f64::EPSILON)
        .collect()
}

impl Scheduler for GreedyScheduler {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn choose(&mut self, observation: &Observation) -> Action {
        let candidates = &observation.candidates;
        if candidates.is_empty() {
            return Action::Drop;
        }

        let indices: Vec<usize> = (0..candidates.len()).collect();
        let top_bw = tied_for_max(&indices, |i| {
            candidates[i].bandwidth.min(observation.compute_bandwidth)
        });
        if top_bw.len() == 1 {
            return Action::Select(top_bw[0]);
        }

        let top_latency = tied_for_max(&top_bw, |i| -candidates[i].latency);
        if top_latency.len() == 1 {
            return Action::Select(top_latency[0]);
        }

        let top_jitter = tied_for_max(&top_latency, |i| -candidates[i].jitter);
        Action::Select(top_jitter[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::CandidateLink;
    use proptest::prelude::*;

    fn observation(compute_bw: f64, triples: &[(f64, f64, f64)]) -> Observation {
        Observation {
            task_info: vec![0.0; 4],
            worker_type: 0.0,
            compute_bandwidth: compute_bw,
            total_candidates: triples.len(),
            candidates: triples
                .iter()
                .map(|&(bandwidth, latency, jitter)| CandidateLink {
                    bandwidth,
                    latency,
                    jitter,
                })
                .collect(),
        }
    }

    #[test]
    fn bandwidth_ties_break_on_latency() {
        let mut greedy = GreedyScheduler::new();
        let obs = observation(
            100.0,
            &[(50.0, 10.0, 1.0), (80.0, 5.0, 1.0), (80.0, 7.0, 1.0)],
        );
        assert_eq!(greedy.choose(&obs), Action::Select(1));
    }

    #[test]
    fn latency_ties_break_on_jitter_then_index() {
        let mut greedy = GreedyScheduler::new();
        let obs = observation(
            100.0,
            &[(80.0, 5.0, 3.0), (80.0, 5.0, 1.0), (80.0, 5.0, 1.0)],
        );
        assert_eq!(greedy.choose(&obs), Action::Select(1));
    }

    #[test]
    fn compute_bandwidth_caps_the_ranking() {
        let mut greedy = GreedyScheduler::new();
        // Both candidates are capped to 20 by the compute line; the faster
        // line no longer wins, latency decides.
        let obs = observation(20.0, &[(80.0, 3.0, 1.0), (120.0, 9.0, 1.0)]);
        assert_eq!(greedy.choose(&obs), Action::Select(0));
    }

    #[test]
    fn no_candidates_means_drop() {
        let mut greedy = GreedyScheduler::new();
        assert_eq!(greedy.choose(&observation(100.0, &[])), Action::Drop);
    }

    proptest! {
        #[test]
        fn chosen_candidate_maximises_link_bandwidth(
            compute_bw in 1.0f64..200.0,
            bws in prop::collection::vec(1.0f64..200.0, 1..10),
        ) {
            let triples: Vec<(f64, f64, f64)> =
                bws.iter().map(|&bw| (bw, 5.0, 1.0)).collect();
            let obs = observation(compute_bw, &triples);
            let Action::Select(chosen) = GreedyScheduler::new().choose(&obs) else {
                return Err(TestCaseError::fail("greedy dropped a non-empty pool"));
            };
            let best = bws
                .iter()
                .map(|&bw| bw.min(compute_bw))
                .fold(f64::NEG_INFINITY, f64::max);
            prop_assert!((bws[chosen].min(compute_bw) - best).abs() < 1e-12);
        }
    }
}
