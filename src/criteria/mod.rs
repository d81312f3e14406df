//! Per-point decision factors used to rank curtailment candidates.
//!
//! A [`Criterion`] is one of a closed set of kinds built from a
//! [`CriterionConfig`] by [`Criterion::from_config`]. Each is fed telemetry
//! rows through [`Criterion::ingest`] and produces a clamped scalar through
//! [`Criterion::evaluate`].

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::config::ConfigError;
use crate::error::EvalError;

pub mod formula;
pub mod history;
pub mod set;

pub use formula::Formula;
pub use history::{Comparison, HistoryCriterion};
pub use set::{CURTAIL_COUNT_LABEL, CriteriaSet, CurtailDirective, CurtailValue, LoadEstimate};

/// Seconds on a monotonic or epoch time base chosen by the caller.
pub type Timestamp = f64;

/// One telemetry row: point name to value. Booleans arrive as `0.0`/`1.0`.
pub type PointValues = HashMap<String, f64>;

/// Optional clamp bounds shared by every criterion kind.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl Bounds {
    pub fn new(minimum: Option<f64>, maximum: Option<f64>) -> Self {
        Self { minimum, maximum }
    }

    /// Clamps `value` to whichever bounds are set.
    pub fn clamp(&self, value: f64) -> f64 {
        let value = self.minimum.map_or(value, |lo| value.max(lo));
        self.maximum.map_or(value, |hi| value.min(hi))
    }

    /// Value reported when a criterion has no usable data yet.
    pub fn floor(&self) -> f64 {
        self.clamp(self.minimum.unwrap_or(0.0))
    }
}

/// Process-wide read-only lookup tables for [`Criterion::Mapper`].
///
/// Loaded once from configuration and handed to criterion constructors.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct MapperTables(BTreeMap<String, BTreeMap<String, f64>>);

impl MapperTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a table.
    pub fn insert(&mut self, name: impl Into<String>, table: BTreeMap<String, f64>) {
        self.0.insert(name.into(), table);
    }

    /// Looks up `key` in table `name`.
    pub fn lookup(&self, name: &str, key: &str) -> Option<f64> {
        self.0.get(name)?.get(key).copied()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
}

/// Criterion parameters as written in configuration, tagged by
/// `operation_type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "operation_type", rename_all = "snake_case")]
pub enum CriterionConfig {
    Status {
        point_name: String,
        on_value: f64,
        off_value: f64,
        #[serde(default)]
        minimum: Option<f64>,
        #[serde(default)]
        maximum: Option<f64>,
    },
    Constant {
        value: f64,
        #[serde(default)]
        minimum: Option<f64>,
        #[serde(default)]
        maximum: Option<f64>,
    },
    Formula {
        operation: String,
        operation_args: Vec<String>,
        #[serde(default)]
        minimum: Option<f64>,
        #[serde(default)]
        maximum: Option<f64>,
    },
    Mapper {
        dict_name: String,
        map_key: String,
        #[serde(default)]
        minimum: Option<f64>,
        #[serde(default)]
        maximum: Option<f64>,
    },
    History {
        point_name: String,
        previous_time: f64,
        comparison_type: Comparison,
        #[serde(default)]
        minimum: Option<f64>,
        #[serde(default)]
        maximum: Option<f64>,
    },
}

impl CriterionConfig {
    fn bounds(&self) -> Bounds {
        match self {
            CriterionConfig::Status {
                minimum, maximum, ..
            }
            | CriterionConfig::Constant {
                minimum, maximum, ..
            }
            | CriterionConfig::Formula {
                minimum, maximum, ..
            }
            | CriterionConfig::Mapper {
                minimum, maximum, ..
            }
            | CriterionConfig::History {
                minimum, maximum, ..
            } => Bounds::new(*minimum, *maximum),
        }
    }
}

/// Reports the configured on- or off-value from the last boolean status.
#[derive(Debug, Clone)]
pub struct StatusCriterion {
    point_name: String,
    on_value: f64,
    off_value: f64,
    bounds: Bounds,
    on: bool,
}

/// Substitutes the latest values of its arguments into a formula.
#[derive(Debug, Clone)]
pub struct FormulaCriterion {
    formula: Formula,
    args: Vec<String>,
    bounds: Bounds,
    latest: Option<PointValues>,
}

/// A single named decision factor.
#[derive(Debug, Clone)]
pub enum Criterion {
    Status(StatusCriterion),
    Constant { value: f64, bounds: Bounds },
    Formula(FormulaCriterion),
    /// Resolved from [`MapperTables`] at construction.
    Mapper { value: f64, bounds: Bounds },
    History(HistoryCriterion),
}

impl Criterion {
    /// Builds the criterion named `name` from its configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the formula does not parse or uses
    /// points outside `operation_args`, the mapper table or key is missing,
    /// the lookback is not positive, or `minimum > maximum`.
    pub fn from_config(
        name: &str,
        config: &CriterionConfig,
        mappers: &MapperTables,
    ) -> Result<Self, ConfigError> {
        let field = |suffix: &str| format!("criteria.{name}.{suffix}");
        let bounds = config.bounds();
        if bounds
            .minimum
            .zip(bounds.maximum)
            .is_some_and(|(lo, hi)| lo > hi)
        {
            return Err(ConfigError::new(field("minimum"), "must be <= maximum"));
        }

        match config {
            CriterionConfig::Status {
                point_name,
                on_value,
                off_value,
                ..
            } => Ok(Criterion::Status(StatusCriterion {
                point_name: point_name.clone(),
                on_value: *on_value,
                off_value: *off_value,
                bounds,
                on: false,
            })),
            CriterionConfig::Constant { value, .. } => Ok(Criterion::Constant {
                value: *value,
                bounds,
            }),
            CriterionConfig::Formula {
                operation,
                operation_args,
                ..
            } => {
                let formula = Formula::parse(operation)
                    .map_err(|e| ConfigError::new(field("operation"), e.to_string()))?;
                if let Some(missing) = formula
                    .variables()
                    .iter()
                    .find(|v| !operation_args.contains(v))
                {
                    return Err(ConfigError::new(
                        field("operation_args"),
                        format!("does not list \"{missing}\" used by the operation"),
                    ));
                }
                Ok(Criterion::Formula(FormulaCriterion {
                    formula,
                    args: operation_args.clone(),
                    bounds,
                    latest: None,
                }))
            }
            CriterionConfig::Mapper {
                dict_name, map_key, ..
            } => {
                if !mappers.has_table(dict_name) {
                    return Err(ConfigError::new(
                        field("dict_name"),
                        format!("unknown mapper table \"{dict_name}\""),
                    ));
                }
                let value = mappers.lookup(dict_name, map_key).ok_or_else(|| {
                    ConfigError::new(
                        field("map_key"),
                        format!("table \"{dict_name}\" has no key \"{map_key}\""),
                    )
                })?;
                Ok(Criterion::Mapper { value, bounds })
            }
            CriterionConfig::History {
                point_name,
                previous_time,
                comparison_type,
                ..
            } => {
                if *previous_time <= 0.0 {
                    return Err(ConfigError::new(field("previous_time"), "must be > 0"));
                }
                Ok(Criterion::History(HistoryCriterion::new(
                    point_name.clone(),
                    *previous_time,
                    *comparison_type,
                    bounds,
                )))
            }
        }
    }

    /// Updates internal state from one telemetry row.
    pub fn ingest(&mut self, timestamp: Timestamp, points: &PointValues) {
        match self {
            Criterion::Status(s) => {
                if let Some(v) = points.get(&s.point_name) {
                    s.on = *v != 0.0;
                }
            }
            Criterion::Formula(f) => {
                let row: Option<PointValues> = f
                    .args
                    .iter()
                    .map(|arg| points.get(arg).map(|v| (arg.clone(), *v)))
                    .collect();
                if row.is_some() {
                    f.latest = row;
                }
            }
            Criterion::History(h) => h.ingest(timestamp, points),
            Criterion::Constant { .. } | Criterion::Mapper { .. } => {}
        }
    }

    /// Evaluates the criterion, clamped to its bounds.
    ///
    /// # Errors
    ///
    /// Propagates formula evaluation failures and inverse-history division
    /// by zero.
    pub fn evaluate(&self) -> Result<f64, EvalError> {
        match self {
            Criterion::Status(s) => Ok(s.bounds.clamp(if s.on { s.on_value } else { s.off_value })),
            Criterion::Constant { value, bounds } | Criterion::Mapper { value, bounds } => {
                Ok(bounds.clamp(*value))
            }
            Criterion::Formula(f) => match &f.latest {
                None => Ok(f.bounds.floor()),
                Some(row) => Ok(f.bounds.clamp(f.formula.eval(row)?)),
            },
            Criterion::History(h) => h.evaluate(),
        }
    }

    /// Configuration tag of this kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Criterion::Status(_) => "status",
            Criterion::Constant { .. } => "constant",
            Criterion::Formula(_) => "formula",
            Criterion::Mapper { .. } => "mapper",
            Criterion::History(_) => "history",
        }
    }
}
