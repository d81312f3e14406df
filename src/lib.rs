//! Demand-limit load curtailment for building devices.
//!
//! Devices are grouped into clusters whose criteria are weighted by an AHP
//! pairwise comparison matrix. When the building meter exceeds the demand
//! limit, the controller reserves and curtails the lowest-scoring devices
//! until the expected reduction covers the excess, confirms the effect, and
//! releases everything when the event ends.

/// Pairwise comparison matrices, weights and consistency checks.
pub mod ahp;
pub mod cli;
pub mod config;
/// Actuation contract and the curtailment state machine.
pub mod control;
pub mod criteria;
pub mod devices;
pub mod error;
pub mod io;
/// Simulated building, actuator and engine.
pub mod sim;
