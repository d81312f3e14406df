use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::ahp::PairwiseMatrix;
use crate::config::ConfigError;

/// Parses a matrix cell; accepts decimals and fractions such as `1/3`.
fn parse_cell(text: &str) -> Option<f64> {
    match text.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => text.parse().ok(),
    }
}

/// Reads a pairwise comparison matrix from CSV.
///
/// The header row is `,<label1>,<label2>,...`; each following row is
/// `<label>,<v1>,<v2>,...` with rows in the same order as the columns.
///
/// # Errors
///
/// Returns a [`ConfigError`] on malformed CSV, a row label that does not
/// match its column, an unparsable cell, or an invalid matrix.
///
/// # Examples
///
/// ```
/// use load_curtail::io::matrix::read_matrix;
///
/// let csv = ",occupancy,zone_temp\noccupancy,1,3\nzone_temp,1/3,1\n";
/// let matrix = read_matrix(csv.as_bytes()).unwrap();
/// assert_eq!(matrix.labels(), ["occupancy", "zone_temp"]);
/// ```
pub fn read_matrix<R: Read>(reader: R) -> Result<PairwiseMatrix, ConfigError> {
    let csv_error = |e: csv::Error| ConfigError::new("matrix", e.to_string());
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let labels: Vec<String> = rdr
        .headers()
        .map_err(csv_error)?
        .iter()
        .skip(1)
        .map(str::to_string)
        .collect();

    let mut rows = Vec::with_capacity(labels.len());
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let row_label = record.get(0).unwrap_or_default();
        if labels.get(i).map(String::as_str) != Some(row_label) {
            return Err(ConfigError::new(
                "matrix",
                format!("row {i} is labeled \"{row_label}\" but column {i} is not"),
            ));
        }
        let row = record
            .iter()
            .skip(1)
            .map(|cell| {
                parse_cell(cell).ok_or_else(|| {
                    ConfigError::new(
                        "matrix",
                        format!("row \"{row_label}\": cannot parse \"{cell}\""),
                    )
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        rows.push(row);
    }

    PairwiseMatrix::new(labels, rows).map_err(|e| ConfigError::new("matrix", e.to_string()))
}

/// Reads a pairwise comparison matrix from a CSV file.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be opened or parsed.
pub fn read_matrix_file(path: &Path) -> Result<PairwiseMatrix, ConfigError> {
    let file = File::open(path).map_err(|e| {
        ConfigError::new("matrix_file", format!("cannot read \"{}\": {e}", path.display()))
    })?;
    read_matrix(file)
}
