//! Episode runner and telemetry aggregation for the OpenRaaS simulator.
//!
//! This crate drives an [`oraas_env::Environment`] with a
//! [`oraas_policy::Scheduler`], accumulates per-slot statistics into one
//! flat telemetry record per simulation, and fans independent simulations
//! out over threads for parameter sweeps. Each simulation is fully
//! isolated: its own environment, RNG, and policy instance.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod runner;
pub mod sweep;
pub mod telemetry;

pub use error::{Error, Result};
pub use runner::{run_with_policy, PolicyKind, Runner};
pub use sweep::{run_sweep, SweepPlan, SweepRun};
pub use telemetry::{EpisodeAccumulator, SimulationRecord};
