//! `oraas sweep` - a parameter grid of independent simulations.

use super::{experiment_dir, load_settings, write_config, write_results_csv};
use anyhow::{Context, Result};
use oraas_env::CloudModel;
use oraas_sim::{run_sweep, PolicyKind, SweepPlan};

#[allow(clippy::too_many_arguments)]
pub fn run(
    config: Option<&str>,
    sets: &[String],
    clients: &[usize],
    models: &[i64],
    worker_rates: &[f64],
    policy: PolicyKind,
    results: &str,
) -> Result<()> {
    let base = load_settings(config, sets)?;
    let cloud_models = models
        .iter()
        .map(|&code| CloudModel::try_from(code).map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()
        .context("invalid --models entry")?;

    let plan = SweepPlan {
        base: base.clone(),
        clients: clients.to_vec(),
        cloud_models,
        worker_rates: worker_rates.to_vec(),
        policy,
    };
    let cells = plan.runs().len();
    tracing::info!(cells, policy = policy.label(), "starting sweep");

    let runs = run_sweep(&plan);
    let failed = runs.iter().filter(|r| r.error.is_some()).count();

    let dir = experiment_dir(results)?;
    write_config(&dir, &base)?;
    let csv_path = write_results_csv(&dir, &runs)?;

    println!(
        "{} runs finished ({} failed), results written to {}",
        runs.len(),
        failed,
        csv_path.display()
    );
    for run in &runs {
        let status = run.error.as_deref().unwrap_or("ok");
        println!(
            "  {} N={} worker_rate={}: drop_rate={:.4} [{status}]",
            run.label, run.settings.clients, run.settings.worker_rate, run.record.drop_rate
        );
    }
    Ok(())
}
