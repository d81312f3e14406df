//! Time-interpolated comparison against a point's past value.

use std::collections::VecDeque;

use serde::Deserialize;

use crate::error::EvalError;

use super::{Bounds, PointValues, Timestamp};

/// How the interpolated past value is compared with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// `|past - current|`
    Direct,
    /// `1 / |past - current|`
    Inverse,
}

/// Linearly interpolates between `pre` and `post` (`(timestamp, value)`)
/// at `target`.
///
/// Returns the `pre` value when both samples share a timestamp.
///
/// ```
/// use load_curtail::criteria::history::interpolate;
///
/// assert_eq!(interpolate((0.0, 0.0), (10.0, 10.0), 5.0), 5.0);
/// ```
pub fn interpolate(pre: (Timestamp, f64), post: (Timestamp, f64), target: Timestamp) -> f64 {
    let (t_pre, v_pre) = pre;
    let (t_post, v_post) = post;
    if t_post == t_pre {
        return v_pre;
    }
    v_pre + (v_post - v_pre) * (target - t_pre) / (t_post - t_pre)
}

/// Compares the latest value of one point with its value `lookback`
/// seconds earlier.
///
/// Samples are kept newest first. Until the buffer brackets
/// `last_ingest - lookback`, evaluation returns the floor.
#[derive(Debug, Clone)]
pub struct HistoryCriterion {
    point_name: String,
    lookback: f64,
    comparison: Comparison,
    bounds: Bounds,
    samples: VecDeque<(Timestamp, f64)>,
}

impl HistoryCriterion {
    /// Creates a history criterion with an empty buffer.
    pub fn new(point_name: String, lookback: f64, comparison: Comparison, bounds: Bounds) -> Self {
        Self {
            point_name,
            lookback,
            comparison,
            bounds,
            samples: VecDeque::new(),
        }
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if no sample has been ingested.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Records the point's value at `timestamp`, if present.
    ///
    /// Samples that can no longer be the older side of a bracket are
    /// dropped.
    pub fn ingest(&mut self, timestamp: Timestamp, points: &PointValues) {
        let Some(value) = points.get(&self.point_name) else {
            return;
        };
        self.samples.push_front((timestamp, *value));

        let target = timestamp - self.lookback;
        while self.samples.len() >= 2 && self.samples[self.samples.len() - 2].0 <= target {
            self.samples.pop_back();
        }
    }

    /// Interpolated value at `last_ingest - lookback`, or `None` while the
    /// buffer does not bracket that time.
    pub fn past_value(&self) -> Option<f64> {
        let (now, _) = *self.samples.front()?;
        let target = now - self.lookback;
        self.samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .find(|(post, pre)| pre.0 <= target && target <= post.0)
            .map(|(post, pre)| interpolate(*pre, *post, target))
    }

    /// Evaluates the comparison, clamped to the configured bounds.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::DivisionByZero`] in inverse mode when the
    /// current and past values are equal.
    pub fn evaluate(&self) -> Result<f64, EvalError> {
        let (Some(past), Some((_, current))) = (self.past_value(), self.samples.front()) else {
            return Ok(self.bounds.floor());
        };
        let diff = (past - current).abs();
        let raw = match self.comparison {
            Comparison::Direct => diff,
            Comparison::Inverse => {
                if diff == 0.0 {
                    return Err(EvalError::DivisionByZero {
                        point: self.point_name.clone(),
                    });
                }
                1.0 / diff
            }
        };
        Ok(self.bounds.clamp(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(value: f64) -> PointValues {
        PointValues::from([("ZoneTemp".to_string(), value)])
    }

    fn history(comparison: Comparison) -> HistoryCriterion {
        HistoryCriterion::new("ZoneTemp".to_string(), 5.0, comparison, Bounds::default())
    }

    #[test]
    fn interpolates_midpoint() {
        assert_eq!(interpolate((0.0, 0.0), (10.0, 10.0), 5.0), 5.0);
        assert_eq!(interpolate((0.0, 4.0), (4.0, 0.0), 1.0), 3.0);
        assert_eq!(interpolate((3.0, 7.0), (3.0, 9.0), 3.0), 7.0);
    }

    #[test]
    fn returns_floor_until_bracketed() {
        let mut h = HistoryCriterion::new(
            "ZoneTemp".to_string(),
            5.0,
            Comparison::Direct,
            Bounds::new(Some(0.5), None),
        );
        assert_eq!(h.evaluate(), Ok(0.5));

        h.ingest(10.0, &point(70.0));
        h.ingest(12.0, &point(71.0));
        // target = 7.0, oldest sample is at 10.0
        assert_eq!(h.past_value(), None);
        assert_eq!(h.evaluate(), Ok(0.5));
    }

    #[test]
    fn direct_comparison_uses_interpolated_past() {
        let mut h = history(Comparison::Direct);
        h.ingest(0.0, &point(0.0));
        h.ingest(10.0, &point(10.0));
        // target = 5.0 -> past 5.0, current 10.0
        assert_eq!(h.past_value(), Some(5.0));
        assert_eq!(h.evaluate(), Ok(5.0));
    }

    #[test]
    fn inverse_comparison() {
        let mut h = history(Comparison::Inverse);
        h.ingest(0.0, &point(70.0));
        h.ingest(10.0, &point(74.0));
        // target = 5.0 -> past 72.0, |72 - 74| = 2
        assert_eq!(h.evaluate(), Ok(0.5));
    }

    #[test]
    fn inverse_comparison_of_flat_signal_fails() {
        let mut h = history(Comparison::Inverse);
        h.ingest(0.0, &point(70.0));
        h.ingest(10.0, &point(70.0));
        assert!(matches!(
            h.evaluate(),
            Err(EvalError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn result_is_clamped() {
        let mut h = HistoryCriterion::new(
            "ZoneTemp".to_string(),
            5.0,
            Comparison::Direct,
            Bounds::new(None, Some(1.0)),
        );
        h.ingest(0.0, &point(0.0));
        h.ingest(10.0, &point(10.0));
        assert_eq!(h.evaluate(), Ok(1.0));
    }

    #[test]
    fn ignores_rows_without_the_point() {
        let mut h = history(Comparison::Direct);
        h.ingest(0.0, &PointValues::new());
        assert!(h.is_empty());
    }

    #[test]
    fn buffer_stays_bounded() {
        let mut h = history(Comparison::Direct);
        for t in 0..100 {
            h.ingest(t as f64, &point(t as f64));
        }
        // samples at 99..=94 cover the bracket for target 94
        assert!(h.len() <= 7, "buffer grew to {}", h.len());
        assert_eq!(h.past_value(), Some(94.0));
    }
}
