//! Catalog, device, and task model for the OpenRaaS composition simulator.
//!
//! This crate holds the leaf data model shared by the network and
//! environment layers:
//!
//! - **Catalog**: the process-lifetime inventory of container layers and
//!   application blobs, with a per-catalog reverse index from each datum to
//!   the devices hosting it
//! - **Device**: resource capacity and free counts, stored data with TTL
//!   eviction, and the three per-role task lists of a worker
//! - **Task**: a typed client request with QoS weights, its provider triple,
//!   and its lifetime countdown
//!
//! Ownership follows one rule: tasks are owned by the environment, devices
//! and catalog entries refer to them (and to each other) by id only.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod catalog;
pub mod device;
pub mod error;
pub mod sampling;
pub mod task;

pub use catalog::{AppKind, Application, Catalog, DataId, Layer, LayerKind};
pub use device::{Device, DeviceKind, Resource, CLIENT_LAYER_TTL, SERVER_LAYER_TTL};
pub use error::{Error, Result};
pub use task::{Providers, Role, StoredFile, Task, TaskId, TaskKind, QOS_WEIGHTS};

/// Device identifier: an index into the environment's device table.
pub type DeviceId = usize;
/// Layer identifier: an index into the catalog's layer table.
pub type LayerId = usize;
/// Application identifier: an index into the catalog's application table.
pub type AppId = usize;
/// Identifier of a user file inside a storage task.
pub type FileId = u32;

/// Absolute tolerance for resource bookkeeping comparisons.
pub const RESOURCE_EPS: f64 = 1e-10;

/// Approximate equality with [`RESOURCE_EPS`] relative tolerance.
#[must_use]
pub fn nearly_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= RESOURCE_EPS * a.abs().max(b.abs()).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearly_eq_tolerates_rounding() {
        assert!(nearly_eq(1.0, 1.0 + 1e-12));
        assert!(nearly_eq(0.0, 0.0));
        assert!(!nearly_eq(1.0, 1.1));
    }
}
