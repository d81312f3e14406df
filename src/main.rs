//! Curtailment agent entry point: CLI wiring, logging, and a simulated run.

use std::process;

use load_curtail::cli::{self, CliOptions};
use load_curtail::config::AgentConfig;
use load_curtail::control::Phase;
use load_curtail::io::export::export_csv;
use load_curtail::sim::Engine;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

fn load_config(options: &CliOptions) -> AgentConfig {
    let loaded = match &options.config {
        Some(path) => AgentConfig::from_toml_file(path),
        None => AgentConfig::demo(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        error!("{e}");
        process::exit(1);
    });

    if let Some(steps) = options.steps {
        config.simulation.steps = steps;
    }
    if let Some(seed) = options.seed {
        config.simulation.seed = seed;
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("{e}");
        }
        process::exit(1);
    }
    config
}

fn main() {
    let options = cli::parse_args().unwrap_or_else(|e| {
        eprintln!("error: {e}");
        cli::print_usage();
        process::exit(2);
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(options.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("error: cannot install logger: {e}");
        process::exit(1);
    }

    let config = load_config(&options);
    let mut engine = Engine::from_config(&config).unwrap_or_else(|e| {
        error!("{e}");
        process::exit(1);
    });
    info!(
        clusters = config.clusters.len(),
        steps = config.simulation.steps,
        limit_kw = config.policy.demand_limit,
        "simulation starting"
    );

    let records = engine.run().unwrap_or_else(|e| {
        error!("{e}");
        process::exit(1);
    });
    for record in &records {
        println!("{record}");
    }

    let curtailing = |phase: Phase| matches!(phase, Phase::Curtailing(_));
    let events = records
        .windows(2)
        .filter(|w| !curtailing(w[0].phase) && curtailing(w[1].phase))
        .count()
        + usize::from(records.first().is_some_and(|r| curtailing(r.phase)));
    let over_limit = records.iter().filter(|r| r.meter_kw > r.limit_kw).count();
    let peak = records.iter().map(|r| r.meter_kw).fold(0.0_f64, f64::max);
    let actuator = engine.controller().actuator();
    info!(
        events,
        over_limit_steps = over_limit,
        peak_kw = peak,
        writes = actuator.writes(),
        rejected_schedules = actuator.rejected(),
        "simulation finished"
    );

    if let Some(path) = &options.telemetry_out {
        match export_csv(&records, path) {
            Ok(()) => info!(path = %path.display(), "step records exported"),
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot export step records");
                process::exit(1);
            }
        }
    }
}
