//! CLI command implementations and shared plumbing.

pub mod run;
pub mod sweep;

use anyhow::{Context, Result};
use chrono::Local;
use oraas_env::SimSettings;
use oraas_sim::SweepRun;
use std::fs;
use std::path::{Path, PathBuf};

/// Loads settings from an optional YAML file and applies `key=value`
/// overrides on top.
pub fn load_settings(config: Option<&str>, sets: &[String]) -> Result<SimSettings> {
    let mut value: serde_yaml::Value = match config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {path}"))?;
            serde_yaml::from_str(&text).with_context(|| format!("cannot parse {path}"))?
        }
        None => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
    };

    let mapping = value
        .as_mapping_mut()
        .context("config root must be a YAML mapping")?;
    for entry in sets {
        let (key, raw) = entry
            .split_once('=')
            .with_context(|| format!("override '{entry}' is not KEY=VALUE"))?;
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("cannot parse value '{raw}'"))?;
        mapping.insert(serde_yaml::Value::String(key.to_string()), parsed);
    }

    let settings: SimSettings =
        serde_yaml::from_value(value).context("configuration does not match the schema")?;
    Ok(settings)
}

/// Creates the timestamped experiment directory.
pub fn experiment_dir(results: &str) -> Result<PathBuf> {
    let dir = Path::new(results).join(format!("openraas-{}", Local::now().format("%Y-%m-%d_%H:%M:%S")));
    fs::create_dir_all(&dir).with_context(|| format!("cannot create {}", dir.display()))?;
    Ok(dir)
}

/// Writes the resolved base configuration next to the results.
pub fn write_config(dir: &Path, settings: &SimSettings) -> Result<()> {
    let text = serde_yaml::to_string(settings).context("cannot serialise configuration")?;
    fs::write(dir.join("config.yaml"), text).context("cannot write config.yaml")?;
    Ok(())
}

/// Writes one CSV row per run: sweep axes first, then the record fields.
pub fn write_results_csv(dir: &Path, runs: &[SweepRun]) -> Result<PathBuf> {
    let path = dir.join("results.csv");
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("cannot create {}", path.display()))?;

    let mut header = vec![
        "label".to_string(),
        "N".to_string(),
        "M".to_string(),
        "worker_rate".to_string(),
        "seed".to_string(),
        "error".to_string(),
    ];
    if let Some(first) = runs.first() {
        header.extend(first.record.to_map().keys().cloned());
    }
    writer.write_record(&header)?;

    for run in runs {
        let mut row = vec![
            run.label.clone(),
            run.settings.clients.to_string(),
            run.settings.servers.to_string(),
            run.settings.worker_rate.to_string(),
            run.settings.seed.to_string(),
            run.error.clone().unwrap_or_default(),
        ];
        row.extend(run.record.to_map().values().map(ToString::to_string));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(path)
}
