//! Controllable devices and their grouping into AHP clusters.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::criteria::{CriteriaSet, Formula, PointValues, Timestamp};

/// Controllable devices sharing one AHP weight vector.
pub mod cluster;
/// All clusters and the global candidate ranking.
pub mod registry;

pub use cluster::DeviceCluster;
pub use registry::{ClusterRegistry, ScoredCandidate};

/// A `(device, command)` pair, the unit of curtailment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandKey {
    pub device: String,
    pub command: String,
}

impl CommandKey {
    pub fn new(device: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            command: command.into(),
        }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.command)
    }
}

/// How a command's on/off status is read from telemetry.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusRule {
    /// On when the point is present and non-zero.
    Point(String),
    /// On when the condition evaluates to non-zero.
    Condition(Formula),
}

impl StatusRule {
    fn is_on(&self, points: &PointValues) -> bool {
        match self {
            StatusRule::Point(name) => points.get(name).is_some_and(|v| *v != 0.0),
            StatusRule::Condition(formula) => match formula.eval(points) {
                Ok(v) => v != 0.0,
                Err(e) => {
                    debug!(condition = %formula, error = %e, "status condition unavailable");
                    false
                }
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Command {
    criteria: CriteriaSet,
    status: StatusRule,
    on: bool,
}

/// A device with one [`CriteriaSet`] per controllable command.
///
/// Every ingested row replaces the device's point snapshot and recomputes
/// each command's on/off status.
#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    commands: BTreeMap<String, Command>,
    points: PointValues,
    last_seen: Option<Timestamp>,
}

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: BTreeMap::new(),
            points: PointValues::new(),
            last_seen: None,
        }
    }

    /// Adds a controllable command. Commands start off.
    pub fn with_command(
        mut self,
        command: impl Into<String>,
        criteria: CriteriaSet,
        status: StatusRule,
    ) -> Self {
        self.commands.insert(
            command.into(),
            Command {
                criteria,
                status,
                on: false,
            },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fans telemetry out to every command's criteria and refreshes status.
    pub fn ingest(&mut self, timestamp: Timestamp, points: &PointValues) {
        for command in self.commands.values_mut() {
            command.criteria.ingest(timestamp, points);
            command.on = command.status.is_on(points);
        }
        self.points = points.clone();
        self.last_seen = Some(timestamp);
    }

    /// Command names in sorted order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Returns `true` if `command` exists and is currently on.
    pub fn is_on(&self, command: &str) -> bool {
        self.commands.get(command).is_some_and(|c| c.on)
    }

    pub fn criteria(&self, command: &str) -> Option<&CriteriaSet> {
        self.commands.get(command).map(|c| &c.criteria)
    }

    pub fn criteria_mut(&mut self, command: &str) -> Option<&mut CriteriaSet> {
        self.commands.get_mut(command).map(|c| &mut c.criteria)
    }

    /// Latest ingested point values.
    pub fn points(&self) -> &PointValues {
        &self.points
    }

    /// Timestamp of the latest ingested row.
    pub fn last_seen(&self) -> Option<Timestamp> {
        self.last_seen
    }
}
