use std::collections::{BTreeMap, BTreeSet};

use rand::{SeedableRng, rngs::StdRng};

use crate::config::{ConfigError, SimulationConfig};
use crate::criteria::PointValues;
use crate::devices::CommandKey;
use crate::error::ActuationError;

use super::baseload::{BaseLoad, gaussian_noise};

/// Seed offset for point drift so it does not mirror the baseload noise.
const DRIFT_SEED_OFFSET: u64 = 31;

fn split_path(path: &str) -> Option<(&str, &str)> {
    path.split_once('/')
        .filter(|(device, point)| !device.is_empty() && !point.is_empty())
}

/// A simulated building: device points, per-command loads and a meter.
///
/// Written points stay overridden until released, which restores the
/// value seen before the first write.
#[derive(Debug, Clone)]
pub struct SimulatedBuilding {
    points: BTreeMap<String, PointValues>,
    saved: BTreeMap<String, Option<f64>>,
    loads: BTreeMap<CommandKey, f64>,
    drift: BTreeMap<(String, String), f64>,
    base: BaseLoad,
    rng: StdRng,
}

impl SimulatedBuilding {
    /// Builds the building from the `[simulation]` table.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for a `loads` or `drift` key that is not
    /// of the form `device/name`.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, ConfigError> {
        let mut loads = BTreeMap::new();
        for (key, kw) in &config.loads {
            let (device, command) = split_path(key).ok_or_else(|| {
                ConfigError::new(
                    format!("simulation.loads.{key}"),
                    "expected \"device/command\"",
                )
            })?;
            loads.insert(CommandKey::new(device, command), *kw);
        }
        let mut drift = BTreeMap::new();
        for (key, std_dev) in &config.drift {
            let (device, point) = split_path(key).ok_or_else(|| {
                ConfigError::new(format!("simulation.drift.{key}"), "expected \"device/point\"")
            })?;
            drift.insert((device.to_string(), point.to_string()), *std_dev);
        }
        let points = config
            .points
            .iter()
            .map(|(device, values)| {
                let values: PointValues = values.iter().map(|(k, v)| (k.clone(), *v)).collect();
                (device.clone(), values)
            })
            .collect();

        Ok(Self {
            points,
            saved: BTreeMap::new(),
            loads,
            drift,
            base: BaseLoad::new(
                config.base_kw,
                config.amp_kw,
                config.phase_rad,
                config.noise_std,
                config.steps_per_day,
                config.seed,
            ),
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(DRIFT_SEED_OFFSET)),
        })
    }

    /// Current telemetry row of every device.
    pub fn telemetry(&self) -> impl Iterator<Item = (&str, &PointValues)> {
        self.points.iter().map(|(name, values)| (name.as_str(), values))
    }

    pub fn point(&self, device: &str, point: &str) -> Option<f64> {
        self.points.get(device)?.get(point).copied()
    }

    /// Returns `true` while `path` holds a written value.
    pub fn is_overridden(&self, path: &str) -> bool {
        self.saved.contains_key(path)
    }

    /// Applies one step of random-walk drift to points not overridden.
    pub fn advance(&mut self) {
        for ((device, point), std_dev) in &self.drift {
            if self.saved.contains_key(&format!("{device}/{point}")) {
                continue;
            }
            let delta = gaussian_noise(&mut self.rng, *std_dev);
            if let Some(value) = self.points.get_mut(device).and_then(|p| p.get_mut(point)) {
                *value += delta;
            }
        }
    }

    /// Writes `value` to `path`, or restores the pre-write value for `None`.
    ///
    /// # Errors
    ///
    /// Returns an `ActuationError` if the path does not name a known device.
    pub fn write(&mut self, path: &str, value: Option<f64>) -> Result<(), ActuationError> {
        let remote = |message: &str| ActuationError::Remote {
            path: path.to_string(),
            message: message.to_string(),
        };
        let (device, point) = split_path(path).ok_or_else(|| remote("malformed point path"))?;
        let values = self
            .points
            .get_mut(device)
            .ok_or_else(|| remote("unknown device"))?;

        match value {
            Some(v) => {
                let previous = values.insert(point.to_string(), v);
                self.saved.entry(path.to_string()).or_insert(previous);
            }
            None => match self.saved.remove(path) {
                Some(Some(original)) => {
                    values.insert(point.to_string(), original);
                }
                Some(None) => {
                    values.remove(point);
                }
                None => {}
            },
        }
        Ok(())
    }

    /// Meter reading at `step`: baseload plus the draw of every command in
    /// `on`, less the expected reduction of commands in `shed`.
    pub fn meter_kw(
        &mut self,
        step: usize,
        on: &BTreeSet<CommandKey>,
        shed: &BTreeMap<CommandKey, f64>,
    ) -> f64 {
        let controlled: f64 = on
            .iter()
            .map(|key| {
                let draw = self.loads.get(key).copied().unwrap_or(0.0);
                let reduction = shed.get(key).copied().unwrap_or(0.0);
                (draw - reduction.min(draw)).max(0.0)
            })
            .sum();
        self.base.demand_kw(step) + controlled
    }
}
