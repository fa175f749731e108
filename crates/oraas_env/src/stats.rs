//! Per-slot statistics snapshots.

use serde::{Deserialize, Serialize};

/// Measured QoS of one served task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QosSample {
    /// Start-up delay in ms: the last missing layer's arrival time.
    pub start_delay: f64,
    /// End-to-end service latency in ms.
    pub service_latency: f64,
    /// Achieved speed in MBps.
    pub speed: f64,
    /// Sampled jitter count.
    pub jitter: f64,
}

/// What one finished slot looked like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    /// Slot number (counted from 1).
    pub slot: u64,
    /// Tasks emitted in the slot.
    pub tasks_num: usize,
    /// Tasks successfully composed.
    pub served_num: usize,
    /// QoS of every served task.
    pub qos: Vec<QosSample>,
    /// Mean occupied fraction of (cpu, mem, bw) over all workers.
    pub worker_occupation: [f64; 3],
    /// Mean occupied fraction of (cpu, mem, bw) over the central servers.
    pub server_occupation: [f64; 3],
}

impl SlotSnapshot {
    /// Fraction of the slot's tasks that were dropped.
    #[must_use]
    pub fn drop_rate(&self) -> f64 {
        if self.tasks_num == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            1.0 - self.served_num as f64 / self.tasks_num as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_rate_handles_both_extremes() {
        let mut snapshot = SlotSnapshot {
            slot: 1,
            tasks_num: 4,
            served_num: 4,
            qos: Vec::new(),
            worker_occupation: [0.0; 3],
            server_occupation: [0.0; 3],
        };
        assert!(snapshot.drop_rate().abs() < f64::EPSILON);
        snapshot.served_num = 0;
        assert!((snapshot.drop_rate() - 1.0).abs() < f64::EPSILON);
        snapshot.tasks_num = 0;
        assert!(snapshot.drop_rate().abs() < f64::EPSILON);
    }
}
