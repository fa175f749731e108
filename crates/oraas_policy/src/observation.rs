//! The per-task observation and its flat wire layout.
//!
//! Flat layout, in order:
//!
//! ```text
//! [ task_info_num task values        (u0, w1, w2, w3)
//! | 2 worker values                  (worker type, compute access bandwidth)
//! | 1 candidate census               (total candidates before truncation)
//! | candidates_num * 3 link triples  (bandwidth, latency, jitter)   ]
//! ```
//!
//! Unused candidate slots are padded with `(-1, -1, -1)`; a task that was
//! dropped before composition is the all-`-1` sentinel vector.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Padding value used for sentinel vectors and empty candidate slots.
const PAD: f64 = -1.0;

/// Dimensions of the flat observation vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationLayout {
    /// Number of task-intrinsic values reported.
    pub task_info_num: usize,
    /// Number of filestore candidate slots reported.
    pub candidates_num: usize,
    /// Values per candidate slot.
    pub filestore_info_num: usize,
}

impl Default for ObservationLayout {
    fn default() -> Self {
        Self {
            task_info_num: 4,
            candidates_num: 10,
            filestore_info_num: 3,
        }
    }
}

impl ObservationLayout {
    /// Total length of a flat vector under this layout.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.task_info_num + 2 + 1 + self.candidates_num * self.filestore_info_num
    }

    /// Layouts are never empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }
}

/// Link state of one filestore candidate as seen from its access line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateLink {
    /// Access-line free bandwidth, MBps.
    pub bandwidth: f64,
    /// Access-line base latency, ms.
    pub latency: f64,
    /// Sampled jitter count.
    pub jitter: f64,
}

/// A decoded, well-formed task observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Task-intrinsic values: base utility and the delay/speed/jitter
    /// weights the scheduler can trade against each other.
    pub task_info: Vec<f64>,
    /// Worker-type tag of the chosen compute worker.
    pub worker_type: f64,
    /// Access-line bandwidth of the chosen compute worker, MBps.
    pub compute_bandwidth: f64,
    /// Candidate count before truncation to `candidates_num`.
    pub total_candidates: usize,
    /// Reported candidates, best-first, at most `candidates_num`.
    pub candidates: Vec<CandidateLink>,
}

impl Observation {
    /// Flattens into the wire vector, padding unused candidate slots.
    #[must_use]
    pub fn flatten(&self, layout: &ObservationLayout) -> Vec<f64> {
        let mut values = Vec::with_capacity(layout.len());
        values.extend_from_slice(&self.task_info);
        values.resize(layout.task_info_num, PAD);
        values.push(self.worker_type);
        values.push(self.compute_bandwidth);
        #[allow(clippy::cast_precision_loss)]
        values.push(self.total_candidates as f64);
        for candidate in self.candidates.iter().take(layout.candidates_num) {
            values.push(candidate.bandwidth);
            values.push(candidate.latency);
            values.push(candidate.jitter);
        }
        values.resize(layout.len(), PAD);
        values
    }

    /// The all-`-1` sentinel for a task dropped before composition.
    #[must_use]
    pub fn sentinel(layout: &ObservationLayout) -> Vec<f64> {
        vec![PAD; layout.len()]
    }

    /// Decodes a flat vector. Returns `None` for the sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedObservation`] on a length mismatch.
    pub fn from_flat(values: &[f64], layout: &ObservationLayout) -> Result<Option<Self>> {
        if values.len() != layout.len() {
            return Err(Error::MalformedObservation {
                actual: values.len(),
                expected: layout.len(),
            });
        }

        let worker_type = values[layout.task_info_num];
        if (worker_type - PAD).abs() < f64::EPSILON {
            return Ok(None);
        }

        let task_info = values[..layout.task_info_num].to_vec();
        let compute_bandwidth = values[layout.task_info_num + 1];
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let total_candidates = values[layout.task_info_num + 2].max(0.0) as usize;

        let mut candidates = Vec::new();
        let base = layout.task_info_num + 3;
        for slot in 0..layout.candidates_num {
            let triple = &values[base + slot * layout.filestore_info_num..]
                [..layout.filestore_info_num];
            // Empty slots are padded with (-1, -1, -1).
            if triple.iter().sum::<f64>() == -3.0 {
                break;
            }
            candidates.push(CandidateLink {
                bandwidth: triple[0],
                latency: triple[1],
                jitter: triple[2],
            });
        }

        Ok(Some(Self {
            task_info,
            worker_type,
            compute_bandwidth,
            total_candidates,
            candidates,
        }))
    }
}
