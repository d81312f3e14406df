//! TOML-based agent configuration: curtailment policy, mapper tables,
//! device clusters and the simulation harness.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::ahp::{AhpWeights, PairwiseMatrix};
use crate::control::CurtailmentPolicy;
use crate::criteria::{
    CriteriaSet, CriterionConfig, CurtailDirective, CurtailValue, Formula, LoadEstimate,
    MapperTables,
};
use crate::devices::{ClusterRegistry, Device, DeviceCluster, StatusRule};
use crate::io::matrix::read_matrix_file;

/// Built-in demo configuration, used when no `--config` is given.
const DEMO_CONFIG: &str = include_str!("../scenarios/demo.toml");

/// Top-level agent configuration parsed from TOML.
///
/// Load from TOML with [`AgentConfig::from_toml_file`] or use
/// [`AgentConfig::demo`] for the built-in building.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Controller thresholds and timing.
    #[serde(default)]
    pub policy: CurtailmentPolicy,
    /// Lookup tables for `mapper` criteria.
    #[serde(default)]
    pub mappers: MapperTables,
    /// Device clusters with their comparison matrices.
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
    /// Simulated building used by the command-line harness.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Directory that relative `matrix_file` paths resolve against.
    #[serde(skip)]
    base_dir: PathBuf,
}

/// One cluster: a priority, a pairwise comparison matrix, and devices.
///
/// Exactly one of `matrix_file` or `matrix` must be given.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub name: String,
    /// Lower values are curtailed first.
    #[serde(default = "default_cluster_priority")]
    pub priority: f64,
    /// CSV file holding the pairwise comparison matrix.
    #[serde(default)]
    pub matrix_file: Option<PathBuf>,
    /// Inline pairwise comparison matrix.
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

fn default_cluster_priority() -> f64 {
    1.0
}

/// Inline pairwise comparison matrix.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixConfig {
    pub labels: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub name: String,
    pub commands: BTreeMap<String, CommandConfig>,
}

/// A curtailable command on a device.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    pub curtail: CurtailConfig,
    pub status: StatusConfig,
    #[serde(default)]
    pub criteria: BTreeMap<String, CriterionConfig>,
}

/// Which point to write when curtailing. Exactly one of `value` or
/// `offset` must be given.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CurtailConfig {
    pub point: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub offset: Option<f64>,
    /// Expected load shed: a number or a formula over device points.
    pub load: LoadConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LoadConfig {
    Fixed(f64),
    Formula(String),
}

/// How a command reports on/off. Exactly one of `point` or `condition`
/// must be given.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusConfig {
    #[serde(default)]
    pub point: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

/// Simulated building parameters for the command-line harness.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Number of steps to run (must be > 0).
    pub steps: usize,
    /// Seconds between steps (must be > 0).
    pub step_seconds: f64,
    /// Master random seed.
    pub seed: u64,
    /// Uncontrolled building load (kW).
    pub base_kw: f64,
    /// Daily sinusoidal amplitude of the uncontrolled load (kW).
    pub amp_kw: f64,
    /// Phase offset of the daily pattern (radians).
    pub phase_rad: f64,
    /// Gaussian noise on the uncontrolled load (kW).
    pub noise_std: f64,
    /// Steps per simulated day, for the daily pattern.
    pub steps_per_day: usize,
    /// Probability in `[0, 1]` that a schedule request is rejected.
    pub schedule_failure_rate: f64,
    /// Load drawn while a command is on, keyed `"device/command"` (kW).
    pub loads: BTreeMap<String, f64>,
    /// Initial point values per device.
    pub points: BTreeMap<String, BTreeMap<String, f64>>,
    /// Random-walk standard deviation per step, keyed `"device/point"`.
    pub drift: BTreeMap<String, f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps: 96,
            step_seconds: 60.0,
            seed: 42,
            base_kw: 80.0,
            amp_kw: 10.0,
            phase_rad: 0.0,
            noise_std: 1.0,
            steps_per_day: 1440,
            schedule_failure_rate: 0.0,
            loads: BTreeMap::new(),
            points: BTreeMap::new(),
            drift: BTreeMap::new(),
        }
    }
}

/// A validation error for a configuration field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted path to the offending field.
    pub field: String,
    /// Human-readable description.
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Prefixes the field path with an enclosing section.
    pub fn within(self, prefix: &str) -> Self {
        Self {
            field: format!("{prefix}.{}", self.field),
            message: self.message,
        }
    }
}

impl AgentConfig {
    /// The built-in demo building.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the bundled TOML does not parse.
    pub fn demo() -> Result<Self, ConfigError> {
        let mut config = Self::from_toml_str(DEMO_CONFIG)?;
        config.base_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        Ok(config)
    }

    /// Parses a configuration from a TOML file. Relative `matrix_file`
    /// paths resolve against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Sets the directory relative `matrix_file` paths resolve against.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid. Matrix
    /// consistency and criterion construction are checked by
    /// [`AgentConfig::build_registry`].
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let p = &self.policy;

        let positive = [
            ("policy.demand_limit", p.demand_limit),
            ("policy.curtail_duration", p.curtail_duration),
            ("policy.curtail_confirm_interval", p.curtail_confirm_interval),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                errors.push(ConfigError::new(field, "must be > 0"));
            }
        }
        let non_negative = [
            ("policy.curtail_break", p.curtail_break),
            ("policy.scheduling_buffer", p.scheduling_buffer),
        ];
        for (field, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                errors.push(ConfigError::new(field, "must be >= 0"));
            }
        }
        if p.curtail_confirm_interval > p.curtail_duration {
            errors.push(ConfigError::new(
                "policy.curtail_confirm_interval",
                "must not exceed policy.curtail_duration",
            ));
        }
        if p
            .reset_curtail_count_interval
            .is_some_and(|interval| !(interval.is_finite() && interval > 0.0))
        {
            errors.push(ConfigError::new(
                "policy.reset_curtail_count_interval",
                "must be > 0 when set",
            ));
        }
        if p.agent_id.trim().is_empty() {
            errors.push(ConfigError::new("policy.agent_id", "must not be empty"));
        }

        if self.clusters.is_empty() {
            errors.push(ConfigError::new("clusters", "at least one cluster is required"));
        }
        for cluster in &self.clusters {
            let prefix = format!("clusters.{}", cluster.name);
            if !cluster.priority.is_finite() {
                errors.push(ConfigError::new(
                    format!("{prefix}.priority"),
                    "must be finite",
                ));
            }
            if cluster.matrix.is_some() == cluster.matrix_file.is_some() {
                errors.push(ConfigError::new(
                    format!("{prefix}.matrix"),
                    "exactly one of matrix or matrix_file is required",
                ));
            }
            if cluster.devices.is_empty() {
                errors.push(ConfigError::new(
                    format!("{prefix}.devices"),
                    "at least one device is required",
                ));
            }
            for device in &cluster.devices {
                let prefix = format!("{prefix}.devices.{}", device.name);
                if device.commands.is_empty() {
                    errors.push(ConfigError::new(
                        format!("{prefix}.commands"),
                        "at least one command is required",
                    ));
                }
                for (command, cfg) in &device.commands {
                    let prefix = format!("{prefix}.commands.{command}");
                    if cfg.curtail.value.is_some() == cfg.curtail.offset.is_some() {
                        errors.push(ConfigError::new(
                            format!("{prefix}.curtail"),
                            "exactly one of value or offset is required",
                        ));
                    }
                    if cfg.status.point.is_some() == cfg.status.condition.is_some() {
                        errors.push(ConfigError::new(
                            format!("{prefix}.status"),
                            "exactly one of point or condition is required",
                        ));
                    }
                }
            }
        }

        let s = &self.simulation;
        if s.steps == 0 {
            errors.push(ConfigError::new("simulation.steps", "must be > 0"));
        }
        if !(s.step_seconds.is_finite() && s.step_seconds > 0.0) {
            errors.push(ConfigError::new("simulation.step_seconds", "must be > 0"));
        }
        if s.steps_per_day == 0 {
            errors.push(ConfigError::new("simulation.steps_per_day", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&s.schedule_failure_rate) {
            errors.push(ConfigError::new(
                "simulation.schedule_failure_rate",
                format!("must be in [0, 1], got {}", s.schedule_failure_rate),
            ));
        }

        errors
    }

    /// Builds the cluster registry: reads and checks every matrix, derives
    /// weights, and constructs each device's criteria.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found, with the field path pointing
    /// at the offending cluster, device or command.
    pub fn build_registry(&self) -> Result<ClusterRegistry, ConfigError> {
        let mut clusters = Vec::with_capacity(self.clusters.len());
        for cluster in &self.clusters {
            let prefix = format!("clusters.{}", cluster.name);
            let matrix = self.load_matrix(cluster).map_err(|e| e.within(&prefix))?;
            let weights = AhpWeights::derive(&matrix)
                .map_err(|e| ConfigError::new(format!("{prefix}.matrix"), e.to_string()))?;
            info!(
                cluster = %cluster.name,
                consistency_ratio = weights.consistency_ratio(),
                criteria = weights.labels().len(),
                "cluster weights derived"
            );

            let devices = cluster
                .devices
                .iter()
                .map(|d| self.build_device(d).map_err(|e| e.within(&prefix)))
                .collect::<Result<Vec<_>, _>>()?;
            clusters.push(DeviceCluster::new(
                cluster.name.clone(),
                cluster.priority,
                weights,
                devices,
            )?);
        }
        ClusterRegistry::new(clusters)
    }

    fn load_matrix(&self, cluster: &ClusterConfig) -> Result<PairwiseMatrix, ConfigError> {
        match (&cluster.matrix, &cluster.matrix_file) {
            (Some(inline), None) => PairwiseMatrix::new(inline.labels.clone(), inline.rows.clone())
                .map_err(|e| ConfigError::new("matrix", e.to_string())),
            (None, Some(path)) => read_matrix_file(&self.base_dir.join(path)),
            _ => Err(ConfigError::new(
                "matrix",
                "exactly one of matrix or matrix_file is required",
            )),
        }
    }

    fn build_device(&self, config: &DeviceConfig) -> Result<Device, ConfigError> {
        let prefix = format!("devices.{}", config.name);
        let mut device = Device::new(config.name.clone());
        for (command, cfg) in &config.commands {
            let prefix = format!("{prefix}.commands.{command}");
            let directive = cfg.curtail.directive().map_err(|e| e.within(&prefix))?;
            let status = cfg.status.rule().map_err(|e| e.within(&prefix))?;
            let criteria = CriteriaSet::from_config(&cfg.criteria, directive, &self.mappers)
                .map_err(|e| e.within(&prefix))?;
            device = device.with_command(command.clone(), criteria, status);
        }
        Ok(device)
    }
}

impl CurtailConfig {
    fn directive(&self) -> Result<CurtailDirective, ConfigError> {
        let value = match (self.value, self.offset) {
            (Some(v), None) => CurtailValue::Absolute(v),
            (None, Some(offset)) => CurtailValue::Offset(offset),
            _ => {
                return Err(ConfigError::new(
                    "curtail",
                    "exactly one of value or offset is required",
                ));
            }
        };
        let load = match &self.load {
            LoadConfig::Fixed(kw) => LoadEstimate::Fixed(*kw),
            LoadConfig::Formula(source) => LoadEstimate::Formula(
                Formula::parse(source)
                    .map_err(|e| ConfigError::new("curtail.load", e.to_string()))?,
            ),
        };
        Ok(CurtailDirective {
            point: self.point.clone(),
            value,
            load,
        })
    }
}

impl StatusConfig {
    fn rule(&self) -> Result<StatusRule, ConfigError> {
        match (&self.point, &self.condition) {
            (Some(point), None) => Ok(StatusRule::Point(point.clone())),
            (None, Some(condition)) => Formula::parse(condition)
                .map(StatusRule::Condition)
                .map_err(|e| ConfigError::new("status.condition", e.to_string())),
            _ => Err(ConfigError::new(
                "status",
                "exactly one of point or condition is required",
            )),
        }
    }
}
