//! Runtime error taxonomy for evaluation, ranking, and actuation.
//!
//! Startup-time failures use [`crate::config::ConfigError`]; AHP matrix
//! failures use [`crate::ahp::AhpError`].

use crate::devices::CommandKey;

/// Errors produced while evaluating a criterion or formula.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("formula parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("formula references unknown variable: {0}")]
    UnknownVariable(String),

    #[error("division by zero in formula \"{0}\"")]
    FormulaDivisionByZero(String),

    #[error("inverse history comparison on {point}: value unchanged over lookback")]
    DivisionByZero { point: String },
}

/// Errors produced while ranking curtailment candidates.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RankError {
    #[error("cluster {cluster}: {key} evaluated criteria {got:?}, expected labels {expected:?}")]
    LabelMismatch {
        cluster: String,
        key: CommandKey,
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("cluster {cluster}: {key}: {source}")]
    Eval {
        cluster: String,
        key: CommandKey,
        #[source]
        source: EvalError,
    },
}

/// Errors returned by the actuation service for a single device or point.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActuationError {
    #[error("schedule request for {device} rejected: {info}")]
    Rejected { device: String, info: String },

    #[error("remote call on {path} failed: {message}")]
    Remote { path: String, message: String },

    #[error("remote call on {path} timed out")]
    Timeout { path: String },
}
