//! Error types for topology operations.

use oraas_model::DeviceId;
use thiserror::Error;

/// Errors that can occur during network bookkeeping.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A device id was never attached to the topology.
    #[error("device {0} is not attached to any area")]
    UnknownDevice(DeviceId),

    /// An area id is outside the configured range.
    #[error("area {0} does not exist")]
    UnknownArea(usize),

    /// A bandwidth change would drive a line negative.
    #[error("bandwidth on {what} would go negative ({value})")]
    NegativeBandwidth {
        /// Which line family was violated.
        what: &'static str,
        /// The would-be free bandwidth.
        value: f64,
    },

    /// The access line and the device interface disagree on free bandwidth.
    #[error("device {device} interface reads {device_bw} MBps but its line reads {line_bw} MBps")]
    InterfaceMismatch {
        /// The device whose mirror is stale.
        device: DeviceId,
        /// Line-side free bandwidth.
        line_bw: f64,
        /// Device-side free bandwidth.
        device_bw: f64,
    },

    /// The per-area device census disagrees with the attachment map.
    #[error("areas hold {counted} devices but the attachment map holds {mapped}")]
    CensusMismatch {
        /// Devices counted across areas.
        counted: usize,
        /// Devices in the attachment map.
        mapped: usize,
    },
}

/// Result type alias for topology operations.
pub type Result<T> = std::result::Result<T, Error>;
