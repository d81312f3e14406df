//! Analytic Hierarchy Process weight derivation and consistency check.
//!
//! A [`PairwiseMatrix`] holds human-authored comparisons where entry
//! `(i, j)` states how much more important criterion `i` is than `j`.
//! [`AhpWeights::derive`] turns it into a weight vector, rejecting matrices
//! whose consistency ratio is not below [`CONSISTENCY_THRESHOLD`].

use std::collections::BTreeSet;

/// Matrices at or above this consistency ratio are rejected.
pub const CONSISTENCY_THRESHOLD: f64 = 0.2;

/// Saaty's random consistency index, indexed by `N - 1`.
const RANDOM_INDEX: [f64; 15] = [
    0.0, 0.0, 0.58, 0.90, 1.12, 1.24, 1.32, 1.41, 1.45, 1.49, 1.51, 1.48, 1.56, 1.57, 1.59,
];

/// Errors raised while validating a pairwise comparison matrix.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AhpError {
    #[error("matrix has {rows} rows for {labels} labels")]
    Shape { labels: usize, rows: usize },

    #[error("row {row} has {len} entries, expected {expected}")]
    RowLength {
        row: usize,
        len: usize,
        expected: usize,
    },

    #[error("entry ({row}, {col}) must be positive and finite, got {value}")]
    NonPositive { row: usize, col: usize, value: f64 },

    #[error("duplicate label \"{0}\"")]
    DuplicateLabel(String),

    #[error("matrix size {0} is outside the random-index table (1..=15)")]
    UnsupportedSize(usize),

    #[error("consistency ratio {ratio:.3} is not below {threshold}")]
    Inconsistent { ratio: f64, threshold: f64 },
}

/// Sum of each column.
pub fn column_sums(rows: &[Vec<f64>]) -> Vec<f64> {
    let n = rows.first().map_or(0, Vec::len);
    (0..n).map(|j| rows.iter().map(|row| row[j]).sum()).collect()
}

/// Divides every entry by its column sum, so each column sums to one.
///
/// ```
/// use load_curtail::ahp::normalize_matrix;
///
/// let n = normalize_matrix(&[vec![1.0, 3.0], vec![1.0 / 3.0, 1.0]]);
/// assert!((n[0][0] - 0.75).abs() < 1e-12);
/// assert!((n[0][1] + n[1][1] - 1.0).abs() < 1e-12);
/// ```
pub fn normalize_matrix(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let sums = column_sums(rows);
    rows.iter()
        .map(|row| row.iter().zip(&sums).map(|(v, s)| v / s).collect())
        .collect()
}

/// Row averages of a normalized matrix.
pub fn row_averages(normalized: &[Vec<f64>]) -> Vec<f64> {
    normalized
        .iter()
        .map(|row| row.iter().sum::<f64>() / row.len() as f64)
        .collect()
}

/// Normalized geometric mean of each row.
pub fn geometric_priority(rows: &[Vec<f64>]) -> Vec<f64> {
    let means: Vec<f64> = rows
        .iter()
        .map(|row| (row.iter().map(|v| v.ln()).sum::<f64>() / row.len() as f64).exp())
        .collect();
    let total: f64 = means.iter().sum();
    means.iter().map(|m| m / total).collect()
}

/// Consistency measures of a pairwise matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consistency {
    /// Column sums dotted with the geometric priority vector.
    pub lambda_max: f64,
    /// `(lambda_max - N) / (N - 1)`
    pub index: f64,
    /// `index / RI[N]`, zero when `RI[N]` is zero.
    pub ratio: f64,
}

/// A validated square matrix of positive pairwise comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseMatrix {
    labels: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl PairwiseMatrix {
    /// Validates shape, labels, and entries.
    ///
    /// # Errors
    ///
    /// Returns an [`AhpError`] if the matrix is not square with one row per
    /// label, a label repeats, an entry is not positive, or the size has no
    /// random index.
    pub fn new(labels: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self, AhpError> {
        let n = labels.len();
        if n == 0 || n > RANDOM_INDEX.len() {
            return Err(AhpError::UnsupportedSize(n));
        }
        if rows.len() != n {
            return Err(AhpError::Shape {
                labels: n,
                rows: rows.len(),
            });
        }
        let mut seen = BTreeSet::new();
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(AhpError::DuplicateLabel(label.clone()));
            }
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(AhpError::RowLength {
                    row: i,
                    len: row.len(),
                    expected: n,
                });
            }
            if let Some((j, value)) = row
                .iter()
                .enumerate()
                .find(|(_, v)| !(v.is_finite() && **v > 0.0))
            {
                return Err(AhpError::NonPositive {
                    row: i,
                    col: j,
                    value: *value,
                });
            }
        }
        Ok(Self { labels, rows })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn size(&self) -> usize {
        self.labels.len()
    }

    /// Saaty consistency of the matrix.
    pub fn consistency(&self) -> Consistency {
        let n = self.size();
        let sums = column_sums(&self.rows);
        let priority = geometric_priority(&self.rows);
        let lambda_max: f64 = sums.iter().zip(&priority).map(|(s, p)| s * p).sum();
        if n < 2 {
            return Consistency {
                lambda_max,
                index: 0.0,
                ratio: 0.0,
            };
        }
        let index = (lambda_max - n as f64) / (n as f64 - 1.0);
        let random_index = RANDOM_INDEX[n - 1];
        let ratio = if random_index > 0.0 {
            index / random_index
        } else {
            0.0
        };
        Consistency {
            lambda_max,
            index,
            ratio,
        }
    }
}

/// Per-label weights derived from a consistent [`PairwiseMatrix`].
///
/// # Examples
///
/// ```
/// use load_curtail::ahp::{AhpWeights, PairwiseMatrix};
///
/// let labels = vec!["occupancy".to_string(), "zone_temp".to_string()];
/// let matrix = PairwiseMatrix::new(labels, vec![vec![1.0, 3.0], vec![1.0 / 3.0, 1.0]]).unwrap();
/// let weights = AhpWeights::derive(&matrix).unwrap();
///
/// assert!((weights.weight("occupancy").unwrap() - 0.75).abs() < 1e-12);
/// assert!((weights.weights().iter().sum::<f64>() - 1.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AhpWeights {
    labels: Vec<String>,
    weights: Vec<f64>,
    consistency_ratio: f64,
}

impl AhpWeights {
    /// Derives weights as the row averages of the normalized matrix.
    ///
    /// # Errors
    ///
    /// Returns [`AhpError::Inconsistent`] if the consistency ratio is not
    /// below [`CONSISTENCY_THRESHOLD`].
    pub fn derive(matrix: &PairwiseMatrix) -> Result<Self, AhpError> {
        let consistency = matrix.consistency();
        if consistency.ratio.is_nan() || consistency.ratio >= CONSISTENCY_THRESHOLD {
            return Err(AhpError::Inconsistent {
                ratio: consistency.ratio,
                threshold: CONSISTENCY_THRESHOLD,
            });
        }
        Ok(Self {
            labels: matrix.labels.clone(),
            weights: row_averages(&normalize_matrix(&matrix.rows)),
            consistency_ratio: consistency.ratio,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Weight of `label`, if present.
    pub fn weight(&self, label: &str) -> Option<f64> {
        let i = self.labels.iter().position(|l| l == label)?;
        Some(self.weights[i])
    }

    pub fn consistency_ratio(&self) -> f64 {
        self.consistency_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// `a_ij = w_i / w_j` is perfectly consistent.
    fn transitive(weights: &[f64]) -> Vec<Vec<f64>> {
        weights
            .iter()
            .map(|wi| weights.iter().map(|wj| wi / wj).collect())
            .collect()
    }

    #[test]
    fn normalized_columns_sum_to_one() {
        let rows = vec![
            vec![1.0, 3.0, 5.0],
            vec![1.0 / 3.0, 1.0, 2.0],
            vec![0.2, 0.5, 1.0],
        ];
        let n = normalize_matrix(&rows);
        for j in 0..3 {
            let col: f64 = n.iter().map(|row| row[j]).sum();
            assert!((col - 1.0).abs() < EPS, "column {j} sums to {col}");
        }
        let w = row_averages(&n);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < EPS);
    }

    #[test]
    fn transitive_matrix_is_consistent() {
        let rows = transitive(&[4.0, 2.0, 1.0]);
        let m = PairwiseMatrix::new(labels(&["a", "b", "c"]), rows).expect("valid matrix");
        let c = m.consistency();
        assert!((c.lambda_max - 3.0).abs() < EPS);
        assert!(c.ratio.abs() < EPS);

        let w = AhpWeights::derive(&m).expect("consistent matrix");
        assert!((w.weights()[0] - 4.0 / 7.0).abs() < EPS);
        assert!((w.weights()[1] - 2.0 / 7.0).abs() < EPS);
        assert!((w.weights()[2] - 1.0 / 7.0).abs() < EPS);
    }

    #[test]
    fn five_criteria_transitive_matrix_is_consistent() {
        let rows = transitive(&[9.0, 5.0, 3.0, 2.0, 1.0]);
        let m = PairwiseMatrix::new(labels(&["a", "b", "c", "d", "e"]), rows).expect("valid");
        let w = AhpWeights::derive(&m).expect("consistent matrix");
        assert!(w.consistency_ratio() < CONSISTENCY_THRESHOLD);
        assert!((w.weights().iter().sum::<f64>() - 1.0).abs() < EPS);
        assert!((w.weight("a").unwrap_or_default() - 0.45).abs() < EPS);
    }

    #[test]
    fn contradictory_matrix_is_rejected() {
        // a >> b, b >> c, but c >> a
        let rows = vec![
            vec![1.0, 9.0, 1.0 / 9.0],
            vec![1.0 / 9.0, 1.0, 9.0],
            vec![9.0, 1.0 / 9.0, 1.0],
        ];
        let m = PairwiseMatrix::new(labels(&["a", "b", "c"]), rows).expect("valid shape");
        assert!(m.consistency().ratio > CONSISTENCY_THRESHOLD);
        match AhpWeights::derive(&m) {
            Err(AhpError::Inconsistent { ratio, .. }) => assert!(ratio > 0.2),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn small_matrices_are_trivially_consistent() {
        let one = PairwiseMatrix::new(labels(&["a"]), vec![vec![1.0]]).expect("valid");
        assert_eq!(one.consistency().ratio, 0.0);
        assert_eq!(AhpWeights::derive(&one).map(|w| w.weights().to_vec()), Ok(vec![1.0]));

        let two = PairwiseMatrix::new(labels(&["a", "b"]), vec![vec![1.0, 7.0], vec![1.0, 1.0]])
            .expect("valid");
        assert_eq!(two.consistency().ratio, 0.0);
    }

    #[test]
    fn rejects_malformed_matrices() {
        assert_eq!(
            PairwiseMatrix::new(vec![], vec![]),
            Err(AhpError::UnsupportedSize(0))
        );
        assert!(matches!(
            PairwiseMatrix::new(labels(&["a", "b"]), vec![vec![1.0, 2.0]]),
            Err(AhpError::Shape { .. })
        ));
        assert!(matches!(
            PairwiseMatrix::new(labels(&["a", "b"]), vec![vec![1.0, 2.0], vec![0.5]]),
            Err(AhpError::RowLength { row: 1, .. })
        ));
        assert!(matches!(
            PairwiseMatrix::new(labels(&["a", "b"]), vec![vec![1.0, 0.0], vec![0.5, 1.0]]),
            Err(AhpError::NonPositive { row: 0, col: 1, .. })
        ));
        assert!(matches!(
            PairwiseMatrix::new(labels(&["a", "a"]), vec![vec![1.0, 1.0], vec![1.0, 1.0]]),
            Err(AhpError::DuplicateLabel(_))
        ));
    }
}
