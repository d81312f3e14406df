//! Contract of the remote scheduling and set-point service.

use std::collections::{BTreeMap, BTreeSet};

use crate::criteria::Timestamp;
use crate::error::ActuationError;

/// Request for exclusive control of one device over `[start, end]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRequest {
    pub task_id: String,
    pub device: String,
    pub priority: String,
    pub start: Timestamp,
    pub end: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleResult {
    Success,
    Failure,
}

/// Application-level answer to a [`ScheduleRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleResponse {
    pub result: ScheduleResult,
    pub info: String,
}

impl ScheduleResponse {
    pub fn success() -> Self {
        Self {
            result: ScheduleResult::Success,
            info: String::new(),
        }
    }

    pub fn failure(info: impl Into<String>) -> Self {
        Self {
            result: ScheduleResult::Failure,
            info: info.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == ScheduleResult::Success
    }
}

/// Synchronous client of the actuation service.
///
/// Implementations bound each call by their own timeout and report it as
/// [`ActuationError::Timeout`]. Point paths are `"<device>/<point>"`.
pub trait Actuator {
    /// Reserves `request.device` for the requested window.
    fn request_schedule(
        &mut self,
        request: &ScheduleRequest,
    ) -> Result<ScheduleResponse, ActuationError>;

    /// Writes `value` to `point_path`; `None` reverts the point to its
    /// default. Returns the applied value.
    fn set_point(
        &mut self,
        task_id: &str,
        point_path: &str,
        value: Option<f64>,
    ) -> Result<Option<f64>, ActuationError>;

    /// Releases the reservation held on `device`.
    fn cancel_schedule(&mut self, task_id: &str, device: &str) -> Result<(), ActuationError>;
}

/// One call received by a [`RecordingActuator`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    Schedule {
        task_id: String,
        device: String,
        start: Timestamp,
        end: Timestamp,
    },
    SetPoint {
        task_id: String,
        path: String,
        value: Option<f64>,
    },
    Cancel {
        task_id: String,
        device: String,
    },
}

/// In-process actuator that records every call and keeps written overrides.
///
/// Like the real service, it refuses writes to devices without a
/// reservation. Rejections, write failures and timeouts can be injected
/// per device or point path.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    calls: Vec<ActuatorCall>,
    reservations: BTreeSet<String>,
    rejected_devices: BTreeSet<String>,
    failing_points: BTreeSet<String>,
    timed_out_points: BTreeSet<String>,
    overrides: BTreeMap<String, f64>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every schedule request for `device` with a failure.
    pub fn reject_schedules_for(&mut self, device: impl Into<String>) {
        self.rejected_devices.insert(device.into());
    }

    /// Fails every write to `point_path` with a remote error.
    pub fn fail_writes_to(&mut self, point_path: impl Into<String>) {
        self.failing_points.insert(point_path.into());
    }

    /// Answers every write to `point_path` with a timeout.
    pub fn time_out_writes_to(&mut self, point_path: impl Into<String>) {
        self.timed_out_points.insert(point_path.into());
    }

    pub fn calls(&self) -> &[ActuatorCall] {
        &self.calls
    }

    /// Clears the call log, keeping reservations and overrides.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Devices currently reserved.
    pub fn reservations(&self) -> &BTreeSet<String> {
        &self.reservations
    }

    /// Point paths currently overridden, with their written values.
    pub fn overrides(&self) -> &BTreeMap<String, f64> {
        &self.overrides
    }
}

impl Actuator for RecordingActuator {
    fn request_schedule(
        &mut self,
        request: &ScheduleRequest,
    ) -> Result<ScheduleResponse, ActuationError> {
        self.calls.push(ActuatorCall::Schedule {
            task_id: request.task_id.clone(),
            device: request.device.clone(),
            start: request.start,
            end: request.end,
        });
        if self.rejected_devices.contains(&request.device) {
            return Ok(ScheduleResponse::failure("CONFLICTS_WITH_EXISTING_SCHEDULES"));
        }
        self.reservations.insert(request.device.clone());
        Ok(ScheduleResponse::success())
    }

    fn set_point(
        &mut self,
        task_id: &str,
        point_path: &str,
        value: Option<f64>,
    ) -> Result<Option<f64>, ActuationError> {
        self.calls.push(ActuatorCall::SetPoint {
            task_id: task_id.to_string(),
            path: point_path.to_string(),
            value,
        });
        if self.timed_out_points.contains(point_path) {
            return Err(ActuationError::Timeout {
                path: point_path.to_string(),
            });
        }
        if self.failing_points.contains(point_path) {
            return Err(ActuationError::Remote {
                path: point_path.to_string(),
                message: "injected failure".to_string(),
            });
        }
        let device = point_path.rsplit_once('/').map_or(point_path, |(d, _)| d);
        if !self.reservations.contains(device) {
            return Err(ActuationError::Remote {
                path: point_path.to_string(),
                message: "caller does not hold a reservation".to_string(),
            });
        }
        match value {
            Some(v) => {
                self.overrides.insert(point_path.to_string(), v);
            }
            None => {
                self.overrides.remove(point_path);
            }
        }
        Ok(value)
    }

    fn cancel_schedule(&mut self, task_id: &str, device: &str) -> Result<(), ActuationError> {
        self.calls.push(ActuatorCall::Cancel {
            task_id: task_id.to_string(),
            device: device.to_string(),
        });
        self.reservations.remove(device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(device: &str) -> ScheduleRequest {
        ScheduleRequest {
            task_id: "t".to_string(),
            device: device.to_string(),
            priority: "LOW".to_string(),
            start: 0.0,
            end: 10.0,
        }
    }

    #[test]
    fn writes_require_a_reservation() {
        let mut a = RecordingActuator::new();
        assert!(a.set_point("t", "rtu1/Fan", Some(0.0)).is_err());

        let resp = a.request_schedule(&request("rtu1")).expect("reachable");
        assert!(resp.is_success());
        assert_eq!(a.set_point("t", "rtu1/Fan", Some(0.0)), Ok(Some(0.0)));
        assert_eq!(a.overrides().get("rtu1/Fan"), Some(&0.0));

        assert_eq!(a.set_point("t", "rtu1/Fan", None), Ok(None));
        assert!(a.overrides().is_empty());

        a.cancel_schedule("t", "rtu1").expect("ack");
        assert!(a.reservations().is_empty());
        assert_eq!(a.calls().len(), 5);
    }

    #[test]
    fn injected_failures() {
        let mut a = RecordingActuator::new();
        a.reject_schedules_for("rtu2");
        a.fail_writes_to("rtu1/Fan");

        let resp = a.request_schedule(&request("rtu2")).expect("reachable");
        assert_eq!(resp.result, ScheduleResult::Failure);
        assert!(!resp.info.is_empty());

        a.request_schedule(&request("rtu1")).expect("reachable");
        assert!(matches!(
            a.set_point("t", "rtu1/Fan", Some(1.0)),
            Err(ActuationError::Remote { .. })
        ));
    }

    #[test]
    fn injected_timeout_leaves_point_untouched() {
        let mut a = RecordingActuator::new();
        a.time_out_writes_to("rtu1/Damper");
        a.request_schedule(&request("rtu1")).expect("reachable");

        assert_eq!(
            a.set_point("t", "rtu1/Damper", Some(0.0)),
            Err(ActuationError::Timeout {
                path: "rtu1/Damper".to_string()
            })
        );
        assert!(a.overrides().is_empty());
        assert_eq!(a.set_point("t", "rtu1/Fan", Some(0.0)), Ok(Some(0.0)));
    }
}
