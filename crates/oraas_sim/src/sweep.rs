//! Parameter sweeps: independent simulations fanned out over threads.
//!
//! Each run owns an isolated environment and policy, so threads share
//! nothing mutable. A failing run is recorded as a sentinel and its peers
//! continue; completion order never affects the result order.

use crate::runner::{run_with_policy, PolicyKind};
use crate::telemetry::SimulationRecord;
use oraas_env::{CloudModel, SimSettings};
use serde::{Deserialize, Serialize};

/// The grid of simulations to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepPlan {
    /// Settings every run starts from.
    pub base: SimSettings,
    /// Client counts to sweep (empty = keep the base value).
    pub clients: Vec<usize>,
    /// Cloud models to sweep (empty = keep the base value).
    pub cloud_models: Vec<CloudModel>,
    /// Worker rates to sweep (empty = keep the base value).
    pub worker_rates: Vec<f64>,
    /// Policy evaluated in every run.
    pub policy: PolicyKind,
}

impl SweepPlan {
    /// A plan that runs the base settings once.
    #[must_use]
    pub const fn single(base: SimSettings, policy: PolicyKind) -> Self {
        Self {
            base,
            clients: Vec::new(),
            cloud_models: Vec::new(),
            worker_rates: Vec::new(),
            policy,
        }
    }

    /// Expands the grid into per-run settings (cartesian product).
    #[must_use]
    pub fn runs(&self) -> Vec<SimSettings> {
        let clients = non_empty(&self.clients, self.base.clients);
        let models = non_empty(&self.cloud_models, self.base.cloud_model);
        let rates = non_empty(&self.worker_rates, self.base.worker_rate);

        let mut runs = Vec::with_capacity(clients.len() * models.len() * rates.len());
        for &n in &clients {
            for &model in &models {
                for &rate in &rates {
                    let mut settings = self.base.clone();
                    settings.clients = n;
                    settings.cloud_model = model;
                    settings.worker_rate = rate;
                    runs.push(settings);
                }
            }
        }
        runs
    }
}

fn non_empty<T: Copy>(values: &[T], fallback: T) -> Vec<T> {
    if values.is_empty() {
        vec![fallback]
    } else {
        values.to_vec()
    }
}

/// Outcome of one sweep cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRun {
    /// The settings this run used.
    pub settings: SimSettings,
    /// Log label (cloud model + deduplication suffix).
    pub label: String,
    /// The telemetry record (sentinel on failure).
    pub record: SimulationRecord,
    /// The failure message, when the run aborted.
    pub error: Option<String>,
}

/// Runs every cell of the plan concurrently and returns results in plan
/// order.
#[must_use]
pub fn run_sweep(plan: &SweepPlan) -> Vec<SweepRun> {
    let runs = plan.runs();
    let policy = plan.policy;
    tracing::info!(cells = runs.len(), policy = policy.label(), "sweep started");

    std::thread::scope(|scope| {
        let handles: Vec<_> = runs
            .into_iter()
            .map(|settings| {
                scope.spawn(move || {
                    let label = settings.model_label();
                    match run_with_policy(settings.clone(), policy) {
                        Ok(record) => SweepRun {
                            settings,
                            label,
                            record,
                            error: None,
                        },
                        Err(error) => {
                            tracing::warn!(%error, label, "run failed, recording sentinel");
                            SweepRun {
                                settings,
                                label,
                                record: SimulationRecord::sentinel(),
                                error: Some(error.to_string()),
                            }
                        }
                    }
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(run) => run,
                Err(_) => {
                    tracing::warn!("run panicked, recording sentinel");
                    SweepRun {
                        settings: plan.base.clone(),
                        label: "panicked".to_string(),
                        record: SimulationRecord::sentinel(),
                        error: Some("worker thread panicked".to_string()),
                    }
                }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SimSettings {
        SimSettings {
            servers: 2,
            clients: 4,
            area_num: 2,
            max_ep_length: 15,
            num_ep_train: 1,
            seed: 3,
            ..SimSettings::default()
        }
    }

    #[test]
    fn grid_expansion_is_a_cartesian_product() {
        let plan = SweepPlan {
            base: base(),
            clients: vec![4, 8],
            cloud_models: vec![CloudModel::OpenRaas, CloudModel::Center, CloudModel::Edge],
            worker_rates: vec![0.1],
            policy: PolicyKind::Greedy,
        };
        let runs = plan.runs();
        assert_eq!(runs.len(), 6);
        assert!(runs.iter().all(|r| (r.worker_rate - 0.1).abs() < 1e-12));
    }

    #[test]
    fn empty_axes_fall_back_to_base() {
        let plan = SweepPlan::single(base(), PolicyKind::Greedy);
        let runs = plan.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0], base());
    }

    #[test]
    fn sweep_returns_one_result_per_cell_in_order() {
        let plan = SweepPlan {
            base: base(),
            clients: vec![3, 5],
            cloud_models: vec![CloudModel::OpenRaas],
            worker_rates: Vec::new(),
            policy: PolicyKind::Greedy,
        };
        let results = run_sweep(&plan);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].settings.clients, 3);
        assert_eq!(results[1].settings.clients, 5);
        assert!(results.iter().all(|r| r.error.is_none()));
    }

    #[test]
    fn failing_cell_yields_sentinel_while_peers_continue() {
        let mut bad = base();
        bad.cloud_model = CloudModel::Center;
        bad.area_num = 1; // centralized with one area cannot validate
        let plan = SweepPlan {
            base: bad,
            clients: Vec::new(),
            cloud_models: vec![CloudModel::Center, CloudModel::OpenRaas],
            worker_rates: Vec::new(),
            policy: PolicyKind::Greedy,
        };
        let results = run_sweep(&plan);
        assert_eq!(results.len(), 2);
        assert!(results[0].record.is_sentinel());
        assert!(results[0].error.is_some());
        assert!(!results[1].record.is_sentinel());
    }
}
