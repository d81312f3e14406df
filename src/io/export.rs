//! CSV export of simulation step records.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::sim::StepRecord;

const HEADER: [&str; 8] = [
    "step",
    "time_s",
    "meter_kw",
    "limit_kw",
    "phase",
    "curtailed",
    "remaining",
    "scheduled",
];

/// Exports step records to a CSV file at `path`.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(records: &[StepRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_csv(records, io::BufWriter::new(file))
}

/// Writes step records as CSV to any writer, one row per step.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(records: &[StepRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(HEADER)?;
    for r in records {
        wtr.write_record(&[
            r.step.to_string(),
            format!("{:.1}", r.time_s),
            format!("{:.4}", r.meter_kw),
            format!("{:.4}", r.limit_kw),
            r.phase.to_string(),
            r.curtailed.to_string(),
            r.remaining.to_string(),
            r.scheduled.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{Phase, Stage};

    fn record(step: usize) -> StepRecord {
        StepRecord {
            step,
            time_s: step as f64 * 60.0,
            meter_kw: 131.5,
            limit_kw: 120.0,
            phase: Phase::Curtailing(Stage::AwaitingConfirm),
            curtailed: 2,
            remaining: 1,
            scheduled: 2,
        }
    }

    #[test]
    fn header_and_one_row_per_step() {
        let records: Vec<StepRecord> = (0..4).map(record).collect();
        let mut buf = Vec::new();
        write_csv(&records, &mut buf).expect("writes");
        let output = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines[0],
            "step,time_s,meter_kw,limit_kw,phase,curtailed,remaining,scheduled"
        );
        assert_eq!(lines.len(), 5);
        assert_eq!(
            lines[2],
            "1,60.0,131.5000,120.0000,curtailing/awaiting_confirm,2,1,2"
        );
    }

    #[test]
    fn output_reads_back() {
        let records: Vec<StepRecord> = (0..3).map(record).collect();
        let mut buf = Vec::new();
        write_csv(&records, &mut buf).expect("writes");

        let mut rdr = csv::Reader::from_reader(buf.as_slice());
        let rows: Vec<csv::StringRecord> = rdr.records().collect::<Result<_, _>>().expect("parses");
        assert_eq!(rows.len(), 3);
        let meter: f64 = rows[0][2].parse().expect("numeric");
        assert_eq!(meter, 131.5);
    }
}
