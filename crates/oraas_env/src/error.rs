//! Error types for environment operations.

use oraas_model::catalog::DataId;
use oraas_model::{DeviceId, Role, TaskId};
use thiserror::Error;

/// Errors that can abort an episode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The configuration record is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The initial seed distribution could not place a required datum.
    #[error("no server can hold {data}")]
    Unplaceable {
        /// The datum that fit nowhere.
        data: DataId,
    },

    /// No client emitted a task for far too many consecutive slots.
    #[error("no client emitted tasks for {0} consecutive slots")]
    Starved(usize),

    /// A committed task lost one of its providers.
    #[error("task {task} has no {role:?} provider at commit")]
    MissingProvider {
        /// The corrupt task.
        task: TaskId,
        /// The missing role.
        role: Role,
    },

    /// An expiring task is not in its client's request list.
    #[error("task {task} is not registered with client {client}")]
    UntrackedTask {
        /// The expiring task.
        task: TaskId,
        /// The client that should have tracked it.
        client: DeviceId,
    },

    /// Bookkeeping fault in the device/catalog model.
    #[error(transparent)]
    Model(#[from] oraas_model::Error),

    /// Bookkeeping fault in the network model.
    #[error(transparent)]
    Net(#[from] oraas_net::Error),

    /// A malformed action or observation crossed the policy boundary.
    #[error(transparent)]
    Policy(#[from] oraas_policy::Error),
}

/// Result type alias for environment operations.
pub type Result<T> = std::result::Result<T, Error>;
