//! Area/backbone network model for the OpenRaaS composition simulator.
//!
//! The cloud is split into areas. Every device hangs off one area through a
//! dedicated access line; inter-area traffic additionally crosses both
//! areas' backbones. Two occupancy mechanisms coexist:
//!
//! - **Reservations** decrement `free_bw` for the whole span of a desktop
//!   stream and are released when the task expires
//! - **Transient transfers** (image fetches, uploads) only advance a
//!   per-slot `occupied_time` watermark that the slot rollover clears
//!
//! Latency is deterministic per line; jitter is sampled per call.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod area;
pub mod error;
pub mod link;
pub mod topology;

pub use area::Area;
pub use error::{Error, Result};
pub use link::Link;
pub use topology::{LinkState, Topology};
