use std::collections::{BTreeMap, BTreeSet};

use crate::ahp::AhpWeights;
use crate::config::ConfigError;
use crate::criteria::{CURTAIL_COUNT_LABEL, PointValues, Timestamp};
use crate::error::RankError;

use super::registry::ScoredCandidate;
use super::{CommandKey, Device};

/// Devices that share one priority class, one ordered criterion label list,
/// and one AHP weight vector.
///
/// The label list must equal the criterion names configured on every
/// command in the cluster. [`CURTAIL_COUNT_LABEL`] takes part in scoring
/// only when it is one of the labels.
#[derive(Debug, Clone)]
pub struct DeviceCluster {
    name: String,
    priority: f64,
    weights: AhpWeights,
    devices: BTreeMap<String, Device>,
}

impl DeviceCluster {
    /// Creates a cluster, checking every command's criteria against the
    /// weight labels.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] on a duplicate device name or a label
    /// mismatch.
    pub fn new(
        name: impl Into<String>,
        priority: f64,
        weights: AhpWeights,
        devices: Vec<Device>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let expected: BTreeSet<&str> = weights.labels().iter().map(String::as_str).collect();
        let counts_curtails = expected.contains(CURTAIL_COUNT_LABEL);

        let mut by_name = BTreeMap::new();
        for device in devices {
            for command in device.commands() {
                let Some(criteria) = device.criteria(command) else {
                    continue;
                };
                let mut configured: BTreeSet<&str> = criteria.names().collect();
                if counts_curtails {
                    configured.insert(CURTAIL_COUNT_LABEL);
                }
                if configured != expected {
                    return Err(ConfigError::new(
                        format!("clusters.{name}.devices.{}.{command}", device.name()),
                        format!("criteria {configured:?} do not match matrix labels {expected:?}"),
                    ));
                }
            }
            if by_name.contains_key(device.name()) {
                return Err(ConfigError::new(
                    format!("clusters.{name}.devices"),
                    format!("duplicate device \"{}\"", device.name()),
                ));
            }
            by_name.insert(device.name().to_string(), device);
        }

        Ok(Self {
            name,
            priority,
            weights,
            devices: by_name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn labels(&self) -> &[String] {
        self.weights.labels()
    }

    pub fn weights(&self) -> &[f64] {
        self.weights.weights()
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.get_mut(name)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn devices_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.values_mut()
    }

    /// Routes a telemetry row to `device`. Returns `false` if it is not here.
    pub fn ingest(&mut self, device: &str, timestamp: Timestamp, points: &PointValues) -> bool {
        match self.devices.get_mut(device) {
            Some(d) => {
                d.ingest(timestamp, points);
                true
            }
            None => false,
        }
    }

    fn commands_where(&self, on: bool) -> BTreeSet<CommandKey> {
        self.devices
            .values()
            .flat_map(|d| {
                d.commands()
                    .filter(move |c| d.is_on(c) == on)
                    .map(move |c| CommandKey::new(d.name(), c))
            })
            .collect()
    }

    /// Commands currently on.
    pub fn on_set(&self) -> BTreeSet<CommandKey> {
        self.commands_where(true)
    }

    /// Commands currently off.
    pub fn off_set(&self) -> BTreeSet<CommandKey> {
        self.commands_where(false)
    }

    /// Evaluates the criteria of every command currently on.
    ///
    /// # Errors
    ///
    /// Returns [`RankError::Eval`] for the first criterion that fails.
    pub fn evaluate_on_commands(
        &self,
    ) -> Result<BTreeMap<CommandKey, BTreeMap<String, f64>>, RankError> {
        let mut out = BTreeMap::new();
        for key in self.on_set() {
            let Some(criteria) = self.device(&key.device).and_then(|d| d.criteria(&key.command))
            else {
                continue;
            };
            let values = criteria.evaluate().map_err(|source| RankError::Eval {
                cluster: self.name.clone(),
                key: key.clone(),
                source,
            })?;
            out.insert(key, values);
        }
        Ok(out)
    }

    /// Scores every command currently on.
    ///
    /// Each criterion column is divided by its sum across the cluster's
    /// candidates (a zero column stays zero), then dotted with the weight
    /// vector.
    ///
    /// # Errors
    ///
    /// Returns [`RankError::LabelMismatch`] if a command's evaluated
    /// criteria differ from the labels, or any evaluation failure.
    pub fn score(&self) -> Result<Vec<ScoredCandidate>, RankError> {
        let labels = self.labels();
        let counts_curtails = labels.iter().any(|l| l == CURTAIL_COUNT_LABEL);

        let mut keys = Vec::new();
        let mut matrix: Vec<Vec<f64>> = Vec::new();
        for (key, mut values) in self.evaluate_on_commands()? {
            if !counts_curtails {
                values.remove(CURTAIL_COUNT_LABEL);
            }
            let row: Option<Vec<f64>> = labels.iter().map(|l| values.get(l).copied()).collect();
            match row {
                Some(row) if values.len() == labels.len() => {
                    keys.push(key);
                    matrix.push(row);
                }
                _ => {
                    return Err(RankError::LabelMismatch {
                        cluster: self.name.clone(),
                        key,
                        expected: labels.to_vec(),
                        got: values.into_keys().collect(),
                    });
                }
            }
        }

        let sums: Vec<f64> = (0..labels.len())
            .map(|j| matrix.iter().map(|row| row[j]).sum())
            .collect();

        Ok(keys
            .into_iter()
            .zip(matrix)
            .map(|(key, row)| {
                let score = row
                    .iter()
                    .zip(&sums)
                    .zip(self.weights())
                    .map(|((v, sum), w)| if *sum == 0.0 { 0.0 } else { w * v / sum })
                    .sum();
                ScoredCandidate {
                    key,
                    cluster: self.name.clone(),
                    priority: self.priority,
                    score,
                }
            })
            .collect())
    }
}
