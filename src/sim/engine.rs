//! Simulation engine that feeds a building's telemetry and meter into the
//! curtailment controller.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use crate::config::{AgentConfig, ConfigError};
use crate::control::{CurtailmentController, Phase};
use crate::criteria::Timestamp;
use crate::error::RankError;

use super::actuator::SimulatedActuator;
use super::building::SimulatedBuilding;

/// Seed offset for schedule rejections.
const ACTUATOR_SEED_OFFSET: u64 = 57;

/// One simulated step as seen by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub step: usize,
    pub time_s: Timestamp,
    pub meter_kw: f64,
    pub limit_kw: f64,
    pub phase: Phase,
    pub curtailed: usize,
    pub remaining: usize,
    pub scheduled: usize,
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>4} ({:>7.0}s) | meter={:>7.2} kW  limit={:>7.2} kW | {:<28} \
             curtailed={} remaining={} scheduled={}",
            self.step,
            self.time_s,
            self.meter_kw,
            self.limit_kw,
            self.phase,
            self.curtailed,
            self.remaining,
            self.scheduled,
        )
    }
}

/// Steps a [`SimulatedBuilding`] and its controller on a fixed clock.
///
/// Each step drifts the building's points, delivers every device's
/// telemetry, then delivers the meter reading.
pub struct Engine {
    controller: CurtailmentController<SimulatedActuator>,
    steps: usize,
    step_seconds: f64,
}

impl Engine {
    pub fn new(
        controller: CurtailmentController<SimulatedActuator>,
        steps: usize,
        step_seconds: f64,
    ) -> Self {
        Self {
            controller,
            steps,
            step_seconds,
        }
    }

    /// Builds the registry, building and controller from configuration.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` from building the registry or the
    /// simulated building.
    pub fn from_config(config: &AgentConfig) -> Result<Self, ConfigError> {
        let registry = config.build_registry()?;
        let sim = &config.simulation;
        let building = SimulatedBuilding::from_config(sim)?;
        let actuator = SimulatedActuator::new(
            building,
            sim.schedule_failure_rate,
            sim.seed.wrapping_add(ACTUATOR_SEED_OFFSET),
        );
        let controller = CurtailmentController::new(config.policy.clone(), registry, actuator);
        Ok(Self::new(controller, sim.steps, sim.step_seconds))
    }

    /// Executes one step and returns its record.
    ///
    /// # Errors
    ///
    /// Propagates a [`RankError`] from the controller.
    pub fn step(&mut self, step: usize) -> Result<StepRecord, RankError> {
        let now = step as f64 * self.step_seconds;

        // 1. Drift and deliver telemetry
        self.controller.actuator_mut().building_mut().advance();
        let rows: Vec<_> = self
            .controller
            .actuator()
            .building()
            .telemetry()
            .map(|(device, points)| (device.to_string(), points.clone()))
            .collect();
        for (device, points) in &rows {
            self.controller.on_device_telemetry(device, now, points);
        }

        // 2. Meter: commands still on whose curtail point is overridden
        //    draw their load less the expected reduction
        let registry = self.controller.registry();
        let building = self.controller.actuator().building();
        let on = registry.on_set();
        let shed: BTreeMap<_, _> = on
            .iter()
            .filter_map(|key| {
                let device = registry.device(&key.device)?;
                let directive = device.criteria(&key.command)?.directive();
                let path = format!("{}/{}", key.device, directive.point);
                if !building.is_overridden(&path) {
                    return None;
                }
                let load = directive.expected_load(device.points()).unwrap_or(0.0);
                Some((key.clone(), load))
            })
            .collect();
        let meter_kw = self
            .controller
            .actuator_mut()
            .building_mut()
            .meter_kw(step, &on, &shed);
        debug!(step, meter_kw, on = on.len(), "meter reading");

        // 3. Controller
        self.controller.on_meter_reading(now, meter_kw)?;

        let status = self.controller.status();
        Ok(StepRecord {
            step,
            time_s: now,
            meter_kw,
            limit_kw: self.controller.policy().demand_limit,
            phase: status.phase,
            curtailed: status.curtailed.len(),
            remaining: status.remaining.len(),
            scheduled: status.scheduled.len(),
        })
    }

    /// Executes every step, then releases any running event.
    ///
    /// # Errors
    ///
    /// Stops at the first [`RankError`], after releasing the running event.
    pub fn run(&mut self) -> Result<Vec<StepRecord>, RankError> {
        let mut records = Vec::with_capacity(self.steps);
        for step in 0..self.steps {
            match self.step(step) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(step, error = %e, "ranking failed, releasing curtailed devices");
                    self.controller.release_all(step as f64 * self.step_seconds);
                    return Err(e);
                }
            }
        }
        self.controller
            .release_all(self.steps as f64 * self.step_seconds);
        Ok(records)
    }

    pub fn controller(&self) -> &CurtailmentController<SimulatedActuator> {
        &self.controller
    }
}
