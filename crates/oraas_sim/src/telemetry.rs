//! Per-episode accumulation and the flat telemetry record.

use oraas_env::{QosSample, SlotSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xxhash_rust::xxh64::xxh64;

/// Accumulates per-slot statistics over one episode.
#[derive(Debug, Clone, Default)]
pub struct EpisodeAccumulator {
    drop_rates: Vec<f64>,
    worker_occupation: Vec<[f64; 3]>,
    server_occupation: Vec<[f64; 3]>,
    qos: Vec<QosSample>,
    rewards: Vec<f64>,
}

impl EpisodeAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a finished slot in. Slots without tasks are skipped: they
    /// carry no scheduling signal.
    pub fn record_slot(&mut self, snapshot: &SlotSnapshot) {
        if snapshot.tasks_num == 0 {
            return;
        }
        self.drop_rates.push(snapshot.drop_rate());
        self.worker_occupation.push(snapshot.worker_occupation);
        self.server_occupation.push(snapshot.server_occupation);
        self.qos.extend_from_slice(&snapshot.qos);
    }

    /// Records one step's reward.
    pub fn record_reward(&mut self, reward: f64) {
        self.rewards.push(reward);
    }

    /// Number of slots folded in so far.
    #[must_use]
    pub fn slots(&self) -> usize {
        self.drop_rates.len()
    }

    /// Collapses the episode into a telemetry record.
    #[must_use]
    pub fn finish(&self) -> SimulationRecord {
        let axis =
            |values: &[[f64; 3]], index: usize| mean(values.iter().map(|v| v[index]));
        SimulationRecord {
            drop_rate: mean(self.drop_rates.iter().copied()),
            server_cpu_rate: axis(&self.server_occupation, 0),
            server_mem_rate: axis(&self.server_occupation, 1),
            server_bw_rate: axis(&self.server_occupation, 2),
            worker_cpu_rate: axis(&self.worker_occupation, 0),
            worker_mem_rate: axis(&self.worker_occupation, 1),
            worker_bw_rate: axis(&self.worker_occupation, 2),
            start_delay: mean(self.qos.iter().map(|q| q.start_delay)),
            service_latency: mean(self.qos.iter().map(|q| q.service_latency)),
            speed: mean(self.qos.iter().map(|q| q.speed)),
            jilter: mean(self.qos.iter().map(|q| q.jitter)),
            mean_reward: mean(self.rewards.iter().copied()),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        {
            sum / count as f64
        }
    }
}

/// The flat keyed record one simulation produces.
///
/// `jilter` preserves the historical spelling of the external schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    /// Mean per-slot drop rate.
    pub drop_rate: f64,
    /// Mean server cpu occupation.
    pub server_cpu_rate: f64,
    /// Mean server memory occupation.
    pub server_mem_rate: f64,
    /// Mean server bandwidth occupation.
    pub server_bw_rate: f64,
    /// Mean worker cpu occupation (servers included).
    pub worker_cpu_rate: f64,
    /// Mean worker memory occupation.
    pub worker_mem_rate: f64,
    /// Mean worker bandwidth occupation.
    pub worker_bw_rate: f64,
    /// Mean start-up delay of served tasks, ms.
    pub start_delay: f64,
    /// Mean service latency of served tasks, ms.
    pub service_latency: f64,
    /// Mean achieved speed of served tasks, MBps.
    pub speed: f64,
    /// Mean jitter count of served tasks.
    pub jilter: f64,
    /// Mean per-step reward.
    pub mean_reward: f64,
}

impl SimulationRecord {
    /// A sentinel record standing in for a failed run.
    #[must_use]
    pub const fn sentinel() -> Self {
        Self {
            drop_rate: f64::NAN,
            server_cpu_rate: f64::NAN,
            server_mem_rate: f64::NAN,
            server_bw_rate: f64::NAN,
            worker_cpu_rate: f64::NAN,
            worker_mem_rate: f64::NAN,
            worker_bw_rate: f64::NAN,
            start_delay: f64::NAN,
            service_latency: f64::NAN,
            speed: f64::NAN,
            jilter: f64::NAN,
            mean_reward: f64::NAN,
        }
    }

    /// Whether this record stands in for a failed run.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.drop_rate.is_nan()
    }

    /// The record as a flat key/value map, keyed by the external schema
    /// names.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        [
            ("drop_rate", self.drop_rate),
            ("server_cpu_rate", self.server_cpu_rate),
            ("server_mem_rate", self.server_mem_rate),
            ("server_bw_rate", self.server_bw_rate),
            ("worker_cpu_rate", self.worker_cpu_rate),
            ("worker_mem_rate", self.worker_mem_rate),
            ("worker_bw_rate", self.worker_bw_rate),
            ("start_delay", self.start_delay),
            ("service_latency", self.service_latency),
            ("speed", self.speed),
            ("jilter", self.jilter),
            ("mean_reward", self.mean_reward),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
    }

    /// Field-wise mean over non-sentinel records; `None` when every record
    /// failed.
    #[must_use]
    pub fn mean_of(records: &[Self]) -> Option<Self> {
        let good: Vec<&Self> = records.iter().filter(|r| !r.is_sentinel()).collect();
        if good.is_empty() {
            return None;
        }
        let avg = |get: fn(&Self) -> f64| mean(good.iter().map(|r| get(r)));
        Some(Self {
            drop_rate: avg(|r| r.drop_rate),
            server_cpu_rate: avg(|r| r.server_cpu_rate),
            server_mem_rate: avg(|r| r.server_mem_rate),
            server_bw_rate: avg(|r| r.server_bw_rate),
            worker_cpu_rate: avg(|r| r.worker_cpu_rate),
            worker_mem_rate: avg(|r| r.worker_mem_rate),
            worker_bw_rate: avg(|r| r.worker_bw_rate),
            start_delay: avg(|r| r.start_delay),
            service_latency: avg(|r| r.service_latency),
            speed: avg(|r| r.speed),
            jilter: avg(|r| r.jilter),
            mean_reward: avg(|r| r.mean_reward),
        })
    }

    /// Stable digest of the record, used by determinism checks.
    ///
    /// # Panics
    ///
    /// Panics if JSON serialisation fails (it cannot for this type).
    #[must_use]
    pub fn digest(&self) -> u64 {
        let json = serde_json::to_string(self).expect("record serialises");
        xxh64(json.as_bytes(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tasks: usize, served: usize) -> SlotSnapshot {
        SlotSnapshot {
            slot: 1,
            tasks_num: tasks,
            served_num: served,
            qos: vec![QosSample {
                start_delay: 10.0,
                service_latency: 20.0,
                speed: 5.0,
                jitter: 2.0,
            }],
            worker_occupation: [0.5, 0.25, 0.1],
            server_occupation: [0.8, 0.4, 0.2],
        }
    }

    #[test]
    fn accumulator_averages_slots() {
        let mut acc = EpisodeAccumulator::new();
        acc.record_slot(&snapshot(4, 2));
        acc.record_slot(&snapshot(4, 4));
        acc.record_reward(1.0);
        acc.record_reward(3.0);

        let record = acc.finish();
        assert!((record.drop_rate - 0.25).abs() < 1e-12);
        assert!((record.server_cpu_rate - 0.8).abs() < 1e-12);
        assert!((record.worker_bw_rate - 0.1).abs() < 1e-12);
        assert!((record.start_delay - 10.0).abs() < 1e-12);
        assert!((record.jilter - 2.0).abs() < 1e-12);
        assert!((record.mean_reward - 2.0).abs() < 1e-12);
    }

    #[test]
    fn empty_slots_are_skipped() {
        let mut acc = EpisodeAccumulator::new();
        acc.record_slot(&snapshot(0, 0));
        assert_eq!(acc.slots(), 0);
        let record = acc.finish();
        assert!(record.drop_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn map_keys_follow_the_external_schema() {
        let record = EpisodeAccumulator::new().finish();
        let map = record.to_map();
        for key in [
            "drop_rate",
            "server_cpu_rate",
            "server_mem_rate",
            "server_bw_rate",
            "worker_cpu_rate",
            "worker_mem_rate",
            "worker_bw_rate",
            "start_delay",
            "service_latency",
            "speed",
            "jilter",
        ] {
            assert!(map.contains_key(key), "missing key {key}");
        }
        assert!(!map.contains_key("jitter"), "historical spelling required");
    }

    #[test]
    fn sentinel_records_are_excluded_from_means() {
        let mut good = EpisodeAccumulator::new();
        good.record_slot(&snapshot(2, 1));
        let records = vec![good.finish(), SimulationRecord::sentinel()];
        let mean = SimulationRecord::mean_of(&records).unwrap();
        assert!((mean.drop_rate - 0.5).abs() < 1e-12);

        let all_bad = vec![SimulationRecord::sentinel()];
        assert!(SimulationRecord::mean_of(&all_bad).is_none());
    }

    #[test]
    fn digest_is_stable_and_value_sensitive() {
        let mut acc = EpisodeAccumulator::new();
        acc.record_slot(&snapshot(2, 1));
        let a = acc.finish();
        assert_eq!(a.digest(), a.clone().digest());
        let mut b = a.clone();
        b.drop_rate += 0.1;
        assert_ne!(a.digest(), b.digest());
    }
}
