//! End-to-end runs of the demo building through the simulation engine.

use load_curtail::config::AgentConfig;
use load_curtail::control::Phase;
use load_curtail::error::RankError;
use load_curtail::sim::{Engine, StepRecord};

fn demo_config(steps: usize) -> AgentConfig {
    let mut config = AgentConfig::demo().expect("demo parses");
    config.simulation.steps = steps;
    config
}

fn run(config: &AgentConfig) -> (Engine, Vec<StepRecord>) {
    let mut engine = Engine::from_config(config).expect("engine builds");
    let records = engine.run().expect("run completes");
    (engine, records)
}

#[test]
fn run_produces_one_record_per_step() {
    let (_, records) = run(&demo_config(60));
    assert_eq!(records.len(), 60);
    assert!(records.windows(2).all(|w| w[1].time_s > w[0].time_s));
}

#[test]
fn demo_building_triggers_an_event() {
    let (_, records) = run(&demo_config(30));
    assert!(records[0].meter_kw > records[0].limit_kw);
    assert!(matches!(records[0].phase, Phase::Curtailing(_)));
    assert!(records[0].curtailed > 0);
}

#[test]
fn curtailment_lowers_the_meter() {
    let mut config = demo_config(30);
    config.simulation.noise_std = 0.0;
    config.simulation.schedule_failure_rate = 0.0;
    let (_, records) = run(&config);
    // First step is metered before any curtailment
    assert!(records[1].meter_kw < records[0].meter_kw);
}

#[test]
fn same_seed_is_deterministic() {
    let config = demo_config(120);
    let (_, first) = run(&config);
    let (_, second) = run(&config);
    assert_eq!(first, second);
}

#[test]
fn run_end_releases_everything() {
    let (engine, _) = run(&demo_config(45));
    let controller = engine.controller();
    assert!(!controller.is_running());
    assert!(controller.curtailed_items().is_empty());

    let actuator = controller.actuator();
    assert!(actuator.reservations().is_empty());
    let building = actuator.building();
    for device in ["rtu1", "rtu2", "rtu3"] {
        assert_eq!(
            building.point(device, "CoolingTemperatureSetPoint"),
            Some(72.0)
        );
    }
    for device in ["light1", "light2"] {
        assert_eq!(building.point(device, "LightsOn"), Some(1.0));
        assert!(!building.is_overridden(&format!("{device}/LightsOn")));
    }
}

#[test]
fn rejected_schedules_block_all_writes() {
    let mut config = demo_config(20);
    config.simulation.schedule_failure_rate = 1.0;
    let (engine, records) = run(&config);
    assert!(records.iter().all(|r| r.curtailed == 0));
    assert_eq!(engine.controller().actuator().writes(), 0);
    assert!(engine.controller().actuator().rejected() > 0);
}

#[test]
fn cooldown_follows_event_end() {
    // 900 s events at 60 s steps end on step 15
    let (_, records) = run(&demo_config(20));
    assert!(matches!(records[14].phase, Phase::Curtailing(_)));
    assert_eq!(records[15].phase, Phase::Cooldown);
}

/// Curtailing `x` turns `y` on; `y` scores an inverse trend on a point
/// that never moves, so the re-rank at the first confirm fails.
const FLAT_TREND_TOML: &str = r#"
[policy]
demand_limit = 100.0
agent_id = "agent"

[[clusters]]
name = "c"

[clusters.matrix]
labels = ["trend"]
rows = [[1.0]]

[[clusters.devices]]
name = "a"

[clusters.devices.commands.x]
curtail = { point = "P", value = 0.0, load = 30.0 }
status = { point = "P" }

[clusters.devices.commands.x.criteria.trend]
operation_type = "constant"
value = 1.0

[clusters.devices.commands.y]
curtail = { point = "Q", value = 0.0, load = 10.0 }
status = { condition = "P < 1" }

[clusters.devices.commands.y.criteria.trend]
operation_type = "history"
point_name = "Flat"
previous_time = 60.0
comparison_type = "inverse"

[simulation]
steps = 10
step_seconds = 60.0
base_kw = 200.0
amp_kw = 0.0
noise_std = 0.0

[simulation.loads]
"a/x" = 30.0
"a/y" = 10.0

[simulation.points.a]
P = 1.0
Q = 1.0
Flat = 5.0
"#;

#[test]
fn ranking_failure_releases_the_running_event() {
    let config = AgentConfig::from_toml_str(FLAT_TREND_TOML).expect("parses");
    let mut engine = Engine::from_config(&config).expect("engine builds");

    let err = engine.run().unwrap_err();
    assert!(matches!(err, RankError::Eval { .. }), "{err}");

    let controller = engine.controller();
    assert!(!controller.is_running());
    assert!(controller.curtailed_items().is_empty());
    assert!(controller.scheduled_devices().is_empty());

    let actuator = controller.actuator();
    assert!(actuator.reservations().is_empty());
    assert!(!actuator.building().is_overridden("a/P"));
    assert_eq!(actuator.building().point("a", "P"), Some(1.0));
}
