//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use load_curtail::ahp::{AhpWeights, PairwiseMatrix};
use load_curtail::control::{CurtailmentController, CurtailmentPolicy, RecordingActuator};
use load_curtail::criteria::{
    Comparison, CriteriaSet, Criterion, CriterionConfig, CurtailDirective, CurtailValue, LoadEstimate,
    MapperTables, PointValues,
};
use load_curtail::devices::{ClusterRegistry, Device, DeviceCluster, StatusRule};

/// Policy with a 100 kW limit, 900 s events, 300 s confirms and a 1800 s break.
pub fn policy() -> CurtailmentPolicy {
    CurtailmentPolicy {
        demand_limit: 100.0,
        curtail_duration: 900.0,
        curtail_confirm_interval: 300.0,
        curtail_break: 1800.0,
        scheduling_buffer: 15.0,
        reset_curtail_count_interval: None,
        agent_id: "agent".to_string(),
        schedule_priority: "LOW".to_string(),
    }
}

/// Telemetry row with the `Status` point set.
pub fn status(on: bool) -> PointValues {
    PointValues::from([("Status".to_string(), if on { 1.0 } else { 0.0 })])
}

/// Device with one `fan` command scored by a constant `size` criterion.
///
/// Curtailing writes 0 to `Fan` and sheds `load_kw`.
pub fn device(name: &str, size: f64, load_kw: f64) -> Device {
    device_with_value(name, size, load_kw, CurtailValue::Absolute(0.0))
}

pub fn device_with_value(name: &str, size: f64, load_kw: f64, value: CurtailValue) -> Device {
    let config = CriterionConfig::Constant {
        value: size,
        minimum: None,
        maximum: None,
    };
    let criteria = BTreeMap::from([(
        "size".to_string(),
        Criterion::from_config("size", &config, &MapperTables::new()).expect("valid criterion"),
    )]);
    let set = CriteriaSet::new(
        criteria,
        CurtailDirective {
            point: "Fan".to_string(),
            value,
            load: LoadEstimate::Fixed(load_kw),
        },
    );
    Device::new(name).with_command("fan", set, StatusRule::Point("Status".to_string()))
}

/// Device whose `size` criterion is an inverse 60 s trend of `Flat`.
///
/// Feeding it two equal `Flat` readings 60 s apart makes ranking fail.
pub fn flat_trend_device(name: &str, load_kw: f64) -> Device {
    let config = CriterionConfig::History {
        point_name: "Flat".to_string(),
        previous_time: 60.0,
        comparison_type: Comparison::Inverse,
        minimum: None,
        maximum: None,
    };
    let criteria = BTreeMap::from([(
        "size".to_string(),
        Criterion::from_config("size", &config, &MapperTables::new()).expect("valid criterion"),
    )]);
    let set = CriteriaSet::new(
        criteria,
        CurtailDirective {
            point: "Fan".to_string(),
            value: CurtailValue::Absolute(0.0),
            load: LoadEstimate::Fixed(load_kw),
        },
    );
    Device::new(name).with_command("fan", set, StatusRule::Point("Status".to_string()))
}

/// Telemetry row with `Status` on and a `Flat` reading.
pub fn on_with_flat(value: f64) -> PointValues {
    PointValues::from([("Status".to_string(), 1.0), ("Flat".to_string(), value)])
}

/// Single-criterion cluster.
pub fn cluster(name: &str, priority: f64, devices: Vec<Device>) -> DeviceCluster {
    let matrix = PairwiseMatrix::new(vec!["size".to_string()], vec![vec![1.0]]).expect("valid");
    let weights = AhpWeights::derive(&matrix).expect("consistent");
    DeviceCluster::new(name, priority, weights, devices).expect("valid cluster")
}

/// Controller over `devices` in one cluster, each reported on at t=0.
pub fn controller(
    policy: CurtailmentPolicy,
    devices: Vec<Device>,
) -> CurtailmentController<RecordingActuator> {
    let names: Vec<String> = devices.iter().map(|d| d.name().to_string()).collect();
    let registry = ClusterRegistry::new(vec![cluster("rtus", 1.0, devices)]).expect("registry");
    let mut controller = CurtailmentController::new(policy, registry, RecordingActuator::new());
    for name in &names {
        assert!(controller.on_device_telemetry(name, 0.0, &status(true)));
    }
    controller
}

/// Two 30 kW devices; `a` ranks ahead of `b`.
pub fn two_device_controller() -> CurtailmentController<RecordingActuator> {
    controller(policy(), vec![device("a", 1.0, 30.0), device("b", 2.0, 30.0)])
}
