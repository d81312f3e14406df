//! Criteria and curtailment directive for one controllable command.

use std::collections::BTreeMap;

use crate::config::ConfigError;
use crate::error::EvalError;

use super::{Criterion, CriterionConfig, Formula, MapperTables, PointValues, Timestamp};

/// Label under which the curtail count is reported by [`CriteriaSet::evaluate`].
pub const CURTAIL_COUNT_LABEL: &str = "curtail_count";

/// Value written to the curtail point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CurtailValue {
    /// Write this value.
    Absolute(f64),
    /// Write the point's last ingested value plus this offset.
    Offset(f64),
}

/// Expected load reduction when the command is curtailed.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEstimate {
    Fixed(f64),
    /// Evaluated over the device's latest point values.
    Formula(Formula),
}

/// Which point to write, with what, and how much load that sheds.
#[derive(Debug, Clone, PartialEq)]
pub struct CurtailDirective {
    pub point: String,
    pub value: CurtailValue,
    pub load: LoadEstimate,
}

impl CurtailDirective {
    /// Value to write given the device's latest points.
    ///
    /// Returns `None` for an offset directive whose point has not been seen.
    pub fn target_value(&self, points: &PointValues) -> Option<f64> {
        match self.value {
            CurtailValue::Absolute(v) => Some(v),
            CurtailValue::Offset(offset) => points.get(&self.point).map(|v| v + offset),
        }
    }

    /// Expected load reduction given the device's latest points.
    ///
    /// # Errors
    ///
    /// Propagates formula evaluation failures.
    pub fn expected_load(&self, points: &PointValues) -> Result<f64, EvalError> {
        match &self.load {
            LoadEstimate::Fixed(kw) => Ok(*kw),
            LoadEstimate::Formula(f) => f.eval(points),
        }
    }
}

/// The named criteria configured for one command on one device, its
/// curtailment directive, and how often it has been curtailed.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use load_curtail::criteria::{
///     CriteriaSet, Criterion, CurtailDirective, CurtailValue, LoadEstimate, MapperTables,
///     CriterionConfig,
/// };
///
/// let config = CriterionConfig::Constant { value: 2.0, minimum: None, maximum: None };
/// let criteria = BTreeMap::from([(
///     "zonetype".to_string(),
///     Criterion::from_config("zonetype", &config, &MapperTables::new()).unwrap(),
/// )]);
/// let directive = CurtailDirective {
///     point: "FanSpeed".to_string(),
///     value: CurtailValue::Absolute(0.0),
///     load: LoadEstimate::Fixed(5.0),
/// };
/// let mut set = CriteriaSet::new(criteria, directive);
/// set.increment_curtail();
///
/// let scores = set.evaluate().unwrap();
/// assert_eq!(scores["zonetype"], 2.0);
/// assert_eq!(scores["curtail_count"], 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct CriteriaSet {
    criteria: BTreeMap<String, Criterion>,
    directive: CurtailDirective,
    curtail_count: f64,
}

impl CriteriaSet {
    pub fn new(criteria: BTreeMap<String, Criterion>, directive: CurtailDirective) -> Self {
        Self {
            criteria,
            directive,
            curtail_count: 0.0,
        }
    }

    /// Builds every criterion from configuration.
    ///
    /// # Errors
    ///
    /// Returns the first criterion construction failure, or a
    /// [`ConfigError`] if a criterion is named [`CURTAIL_COUNT_LABEL`].
    pub fn from_config(
        configs: &BTreeMap<String, CriterionConfig>,
        directive: CurtailDirective,
        mappers: &MapperTables,
    ) -> Result<Self, ConfigError> {
        let mut criteria = BTreeMap::new();
        for (name, config) in configs {
            if name == CURTAIL_COUNT_LABEL {
                return Err(ConfigError::new(
                    format!("criteria.{name}"),
                    "name is reserved for the curtail count",
                ));
            }
            criteria.insert(name.clone(), Criterion::from_config(name, config, mappers)?);
        }
        Ok(Self::new(criteria, directive))
    }

    /// Fans one telemetry row out to every criterion.
    pub fn ingest(&mut self, timestamp: Timestamp, points: &PointValues) {
        for criterion in self.criteria.values_mut() {
            criterion.ingest(timestamp, points);
        }
    }

    /// Evaluates every criterion and adds the curtail count under
    /// [`CURTAIL_COUNT_LABEL`].
    ///
    /// # Errors
    ///
    /// Returns the first criterion evaluation failure.
    pub fn evaluate(&self) -> Result<BTreeMap<String, f64>, EvalError> {
        let mut values = BTreeMap::new();
        for (name, criterion) in &self.criteria {
            values.insert(name.clone(), criterion.evaluate()?);
        }
        values.insert(CURTAIL_COUNT_LABEL.to_string(), self.curtail_count);
        Ok(values)
    }

    /// Configured criterion names, excluding the curtail count.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.criteria.keys().map(String::as_str)
    }

    pub fn directive(&self) -> &CurtailDirective {
        &self.directive
    }

    pub fn curtail_count(&self) -> f64 {
        self.curtail_count
    }

    pub fn increment_curtail(&mut self) {
        self.curtail_count += 1.0;
    }

    pub fn reset_curtail(&mut self) {
        self.curtail_count = 0.0;
    }
}
