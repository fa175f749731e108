//! Observation model and filestore scheduling policies.
//!
//! The environment reports each task as a fixed-length observation vector;
//! a [`Scheduler`] answers with the index of the filestore candidate to use
//! (or a drop). This crate owns both ends of that contract:
//!
//! - the flat observation layout and its typed decoding, including the
//!   all-`-1` sentinel for undeliverable tasks
//! - the `Scheduler` trait plus the greedy and random baselines
//!
//! Invalid observations are unrepresentable once decoded; schedulers only
//! see well-formed candidate lists.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod greedy;
pub mod observation;
pub mod random;

pub use error::{Error, Result};
pub use greedy::GreedyScheduler;
pub use observation::{CandidateLink, Observation, ObservationLayout};
pub use random::RandomScheduler;

/// A scheduling decision for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Use the filestore candidate at this index.
    Select(usize),
    /// Do not compose the task.
    Drop,
}

impl Action {
    /// Encodes the action as the wire integer (`-1` is a drop).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn encode(self) -> i64 {
        match self {
            Self::Select(index) => index as i64,
            Self::Drop => -1,
        }
    }

    /// Decodes a wire integer against the candidate count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ActionOutOfRange`] outside `[-1, candidates)`.
    pub fn decode(value: i64, candidates: usize) -> Result<Self> {
        #[allow(clippy::cast_possible_wrap)]
        let limit = candidates as i64;
        match value {
            -1 => Ok(Self::Drop),
            v if v >= 0 && v < limit => {
                #[allow(clippy::cast_sign_loss)]
                Ok(Self::Select(v as usize))
            }
            _ => Err(Error::ActionOutOfRange { value, candidates }),
        }
    }
}

/// A policy over filestore candidates: one decision per task observation.
pub trait Scheduler {
    /// Short policy label used in logs and results.
    fn name(&self) -> &'static str;

    /// Chooses a candidate index for the observed task, or drops it.
    fn choose(&mut self, observation: &Observation) -> Action;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_encoding_round_trips() {
        assert_eq!(Action::Drop.encode(), -1);
        assert_eq!(Action::Select(3).encode(), 3);
        assert_eq!(Action::decode(-1, 0), Ok(Action::Drop));
        assert_eq!(Action::decode(2, 5), Ok(Action::Select(2)));
        assert!(Action::decode(5, 5).is_err());
        assert!(Action::decode(-2, 5).is_err());
    }
}
