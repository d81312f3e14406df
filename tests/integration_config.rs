//! Integration tests for loading agent configuration from disk.

use std::fs;
use std::path::{Path, PathBuf};

use load_curtail::config::AgentConfig;
use load_curtail::devices::CommandKey;

fn write_agent_toml(dir: &Path) -> PathBuf {
    let path = dir.join("agent.toml");
    fs::write(&path, AGENT_TOML).expect("write agent.toml");
    path
}

const AGENT_TOML: &str = r#"
[policy]
demand_limit = 60.0
agent_id = "bldg"

[[clusters]]
name = "ahus"
matrix_file = "matrices/ahus.csv"

[[clusters.devices]]
name = "ahu1"
[clusters.devices.commands.supply_fan]
curtail = { point = "FanSpeed", value = 40.0, load = 6.0 }
status = { condition = "FanSpeed > 10" }
[clusters.devices.commands.supply_fan.criteria.speed]
operation_type = "formula"
operation = "FanSpeed / 100"
operation_args = ["FanSpeed"]

[[clusters.devices]]
name = "ahu2"
[clusters.devices.commands.supply_fan]
curtail = { point = "FanSpeed", value = 40.0, load = 6.0 }
status = { condition = "FanSpeed > 10" }
[clusters.devices.commands.supply_fan.criteria.speed]
operation_type = "formula"
operation = "FanSpeed / 100"
operation_args = ["FanSpeed"]
"#;

const AHUS_CSV: &str = ",speed,curtail_count\nspeed,1,4\ncurtail_count,1/4,1\n";

#[test]
fn matrix_file_resolves_against_config_directory() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_agent_toml(dir.path());
    fs::create_dir_all(dir.path().join("matrices")).expect("create matrices dir");
    fs::write(dir.path().join("matrices/ahus.csv"), AHUS_CSV).expect("write matrix");

    let config = AgentConfig::from_toml_file(&path).expect("parses");
    assert!(config.validate().is_empty(), "{:?}", config.validate());
    let mut registry = config.build_registry().expect("builds");

    let cluster = &registry.clusters()[0];
    assert_eq!(cluster.labels(), ["speed", "curtail_count"]);
    assert!(cluster.weights()[0] > cluster.weights()[1]);

    let fast = load_curtail::criteria::PointValues::from([("FanSpeed".to_string(), 90.0)]);
    let slow = load_curtail::criteria::PointValues::from([("FanSpeed".to_string(), 30.0)]);
    registry.ingest("ahu1", 0.0, &fast);
    registry.ingest("ahu2", 0.0, &slow);
    let ranked = registry.rank().expect("ranks");
    assert_eq!(ranked[0].key, CommandKey::new("ahu2", "supply_fan"));
}

#[test]
fn missing_matrix_file_names_the_cluster() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = AgentConfig::from_toml_file(&write_agent_toml(dir.path())).expect("parses");
    let err = config.build_registry().unwrap_err();
    assert_eq!(err.field, "clusters.ahus.matrix_file");
}

#[test]
fn missing_config_file_is_an_error() {
    let err = AgentConfig::from_toml_file(&PathBuf::from("/nonexistent/agent.toml")).unwrap_err();
    assert_eq!(err.field, "config");
}
