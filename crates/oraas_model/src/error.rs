//! Error types for model operations.

use crate::catalog::DataId;
use crate::device::Resource;
use crate::task::{Role, TaskId};
use crate::{DeviceId, LayerId};
use thiserror::Error;

/// Errors that can occur in catalog, device, or task bookkeeping.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A host was registered twice for the same datum.
    #[error("device {host} is already a host of {data}")]
    DuplicateHost {
        /// The datum whose reverse index was touched.
        data: DataId,
        /// The offending device.
        host: DeviceId,
    },

    /// A host removal targeted a device that is not registered.
    #[error("device {host} is not a host of {data}")]
    HostNotFound {
        /// The datum whose reverse index was touched.
        data: DataId,
        /// The missing device.
        host: DeviceId,
    },

    /// A layer operation targeted a layer the device does not store.
    #[error("layer {layer} is not stored on device {device}")]
    LayerNotFound {
        /// The missing layer.
        layer: LayerId,
        /// The device that was queried.
        device: DeviceId,
    },

    /// A task release targeted a role list that does not contain it.
    #[error("task {task} is not in the {role:?} list of device {device}")]
    TaskNotFound {
        /// The missing task.
        task: TaskId,
        /// The role list that was searched.
        role: Role,
        /// The device that was queried.
        device: DeviceId,
    },

    /// `store_data` or `fetch_layer` exceeded the device's free memory.
    #[error("device {device} cannot store {needed} MB ({free} MB free)")]
    InsufficientStorage {
        /// The device that ran out of space.
        device: DeviceId,
        /// Size of the datum that did not fit.
        needed: f64,
        /// Free memory at the time of the attempt.
        free: f64,
    },

    /// A role, kind, or type tag was outside its defined set.
    #[error("{what} tag {value} is out of range")]
    OutOfRange {
        /// Which tag family was violated.
        what: &'static str,
        /// The offending value.
        value: i64,
    },

    /// A free-resource count went negative or over capacity.
    #[error("device {device} holds an illegal {resource:?} count: {value}")]
    IllegalResource {
        /// The device that failed the legality check.
        device: DeviceId,
        /// The resource whose count is out of bounds.
        resource: Resource,
        /// The illegal free count.
        value: f64,
    },

    /// Capacity could not be reassembled from free + committed + stored.
    #[error(
        "device {device} {resource:?} mismatch: reassembled {reassembled}, capacity {capacity}"
    )]
    CapacityMismatch {
        /// The device that failed reassembly.
        device: DeviceId,
        /// The resource whose books do not balance.
        resource: Resource,
        /// The reassembled total.
        reassembled: f64,
        /// The declared capacity.
        capacity: f64,
    },

    /// A committed task reached negative lifetime without release.
    #[error("task {task} outlived its span without release")]
    LifetimeOverrun {
        /// The orphaned task.
        task: TaskId,
    },
}

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, Error>;
