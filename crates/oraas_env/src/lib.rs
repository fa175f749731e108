//! Per-slot simulation environment for the OpenRaaS composition simulator.
//!
//! The environment owns everything a single simulation touches: the
//! catalog, the topology, the device table, the seeded RNG, and the tasks
//! in flight. One slot proceeds as:
//!
//! 1. [`Environment::step`] rolls into `next()` when the slot's tasks are
//!    exhausted: devices tick (TTL eviction, task emission), transient link
//!    occupancy clears, committed tasks age and release on expiry
//! 2. candidate generation builds a per-task observation: a compute worker,
//!    a ranked filestore pool, and one depository per missing layer
//! 3. the caller's scheduler answers with a filestore index (or a drop) and
//!    `step()` commits allocations, reservations, and the reward
//!
//! Everything is deterministic given `SimSettings::seed`.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod compose;
pub mod config;
pub mod environment;
pub mod error;
pub mod placement;
pub mod stats;

pub use config::{CloudModel, ModelFlags, SimSettings};
pub use environment::{Environment, StepOutcome};
pub use error::{Error, Result};
pub use stats::{QosSample, SlotSnapshot};
