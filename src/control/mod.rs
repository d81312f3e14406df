//! Actuation contract and the curtailment state machine.

pub mod actuator;
pub mod controller;

pub use actuator::{
    Actuator, ActuatorCall, RecordingActuator, ScheduleRequest, ScheduleResponse, ScheduleResult,
};
pub use controller::{ControllerStatus, CurtailmentController, CurtailmentPolicy, Phase, Stage};
