use std::collections::BTreeSet;

use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::debug;

use crate::control::{Actuator, ScheduleRequest, ScheduleResponse};
use crate::criteria::Timestamp;
use crate::error::ActuationError;

use super::building::SimulatedBuilding;

/// Actuator backed by a [`SimulatedBuilding`].
///
/// Schedule requests are rejected with probability `failure_rate`;
/// writes require a reservation and land on the building's points.
#[derive(Debug, Clone)]
pub struct SimulatedActuator {
    building: SimulatedBuilding,
    reservations: BTreeSet<String>,
    failure_rate: f64,
    rng: StdRng,
    rejected: usize,
    writes: usize,
}

impl SimulatedActuator {
    pub fn new(building: SimulatedBuilding, failure_rate: f64, seed: u64) -> Self {
        Self {
            building,
            reservations: BTreeSet::new(),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
            rejected: 0,
            writes: 0,
        }
    }

    pub fn building(&self) -> &SimulatedBuilding {
        &self.building
    }

    pub fn building_mut(&mut self) -> &mut SimulatedBuilding {
        &mut self.building
    }

    pub fn reservations(&self) -> &BTreeSet<String> {
        &self.reservations
    }

    /// Schedule requests rejected so far.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Point writes applied so far, releases included.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl Actuator for SimulatedActuator {
    fn request_schedule(
        &mut self,
        request: &ScheduleRequest,
    ) -> Result<ScheduleResponse, ActuationError> {
        if self.failure_rate > 0.0 && self.rng.random::<f64>() < self.failure_rate {
            self.rejected += 1;
            return Ok(ScheduleResponse::failure("CONFLICTS_WITH_EXISTING_SCHEDULES"));
        }
        let span: Timestamp = request.end - request.start;
        debug!(device = %request.device, span, "simulated reservation");
        self.reservations.insert(request.device.clone());
        Ok(ScheduleResponse::success())
    }

    fn set_point(
        &mut self,
        _task_id: &str,
        point_path: &str,
        value: Option<f64>,
    ) -> Result<Option<f64>, ActuationError> {
        let device = point_path.split_once('/').map_or(point_path, |(d, _)| d);
        if !self.reservations.contains(device) {
            return Err(ActuationError::Remote {
                path: point_path.to_string(),
                message: "caller does not hold a reservation".to_string(),
            });
        }
        self.building.write(point_path, value)?;
        self.writes += 1;
        Ok(value)
    }

    fn cancel_schedule(&mut self, _task_id: &str, device: &str) -> Result<(), ActuationError> {
        self.reservations.remove(device);
        Ok(())
    }
}
