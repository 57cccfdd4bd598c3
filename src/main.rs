use anyhow::{Context, Result};
use district_energy_hub::scenario::{run_batch, Scenario};
use district_energy_hub::{config, results::ScenarioResult, telemetry};
use config::Config;
use serde::{Deserialize, Serialize};
use telemetry::init_tracing;
use tracing::{info, warn};

/// A scenario file holds one scenario or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScenarioFile {
    Many(Vec<Scenario>),
    One(Box<Scenario>),
}

#[derive(Serialize)]
struct Failure {
    scenario: String,
    kind: &'static str,
    error: String,
}

#[derive(Serialize)]
struct BatchReport {
    results: Vec<ScenarioResult>,
    failures: Vec<Failure>,
}

fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load().context("loading configuration")?;
    let settings = cfg.run_settings();

    let raw = std::fs::read_to_string(&cfg.io.scenario_path)
        .with_context(|| format!("reading {}", cfg.io.scenario_path.display()))?;
    let scenarios = match serde_json::from_str::<ScenarioFile>(&raw)
        .with_context(|| format!("parsing {}", cfg.io.scenario_path.display()))?
    {
        ScenarioFile::Many(list) => list,
        ScenarioFile::One(one) => vec![*one],
    };
    info!(
        scenarios = scenarios.len(),
        solver = %settings.solver,
        objective = %settings.dispatch.objective,
        clustering = settings.clustering.is_some(),
        "starting district energy hub"
    );

    let mut report = BatchReport {
        results: Vec::new(),
        failures: Vec::new(),
    };
    for (scenario, outcome) in run_batch(&scenarios, &settings) {
        match outcome {
            Ok(result) => report.results.push(result),
            Err(e) => report.failures.push(Failure {
                scenario,
                kind: e.kind(),
                error: e.to_string(),
            }),
        }
    }

    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&cfg.io.output_path, json)
        .with_context(|| format!("writing {}", cfg.io.output_path.display()))?;

    if !report.failures.is_empty() {
        warn!(failed = report.failures.len(), "some scenarios failed");
    }
    if report.results.is_empty() && !scenarios.is_empty() {
        anyhow::bail!("all {} scenarios failed", scenarios.len());
    }
    info!(output = %cfg.io.output_path.display(), "done");
    Ok(())
}
