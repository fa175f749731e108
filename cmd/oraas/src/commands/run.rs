//! `oraas run` - one simulation, one record.

use super::{experiment_dir, load_settings, write_config, write_results_csv};
use anyhow::Result;
use oraas_sim::{run_with_policy, PolicyKind, SweepRun};

pub fn run(
    config: Option<&str>,
    sets: &[String],
    policy: PolicyKind,
    results: &str,
) -> Result<()> {
    let settings = load_settings(config, sets)?;
    let label = settings.model_label();
    tracing::info!(
        label,
        policy = policy.label(),
        clients = settings.clients,
        servers = settings.servers,
        "starting simulation"
    );

    let run = match run_with_policy(settings.clone(), policy) {
        Ok(record) => SweepRun {
            settings: settings.clone(),
            label,
            record,
            error: None,
        },
        Err(error) => {
            tracing::error!(%error, "simulation failed");
            SweepRun {
                settings: settings.clone(),
                label,
                record: oraas_sim::SimulationRecord::sentinel(),
                error: Some(error.to_string()),
            }
        }
    };

    let dir = experiment_dir(results)?;
    write_config(&dir, &settings)?;
    let csv_path = write_results_csv(&dir, std::slice::from_ref(&run))?;

    for (key, value) in run.record.to_map() {
        println!("{key}: {value:.6}");
    }
    println!("results written to {}", csv_path.display());
    Ok(())
}
