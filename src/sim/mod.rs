//! Simulated building, actuator and engine for exercising the controller
//! offline.

pub mod actuator;
pub mod baseload;
pub mod building;
pub mod engine;

pub use actuator::SimulatedActuator;
pub use building::SimulatedBuilding;
pub use engine::{Engine, StepRecord};
