//! Solver history log reader.
//!
//! The solver appends one comma-separated row of scalars per iteration,
//! headed by a line of (possibly quoted) column names. The final row is
//! where the workflow takes its function values from.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::state::HistoryRecord;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("read history {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("history {} has no header line", path.display())]
    MissingHeader { path: PathBuf },

    #[error("history {} has no data rows", path.display())]
    Empty { path: PathBuf },
}

/// Parse a history log into per-iteration records.
///
/// Rows whose field count disagrees with the header, or with unparseable
/// numbers, are skipped with a warning; solvers truncated mid-write leave
/// exactly such a trailing row.
pub fn read_history(path: &Path) -> Result<Vec<HistoryRecord>, HistoryError> {
    let contents = fs::read_to_string(path).map_err(|source| HistoryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut lines = contents.lines().filter(|line| !line.trim().is_empty());

    let header = lines.next().ok_or_else(|| HistoryError::MissingHeader {
        path: path.to_path_buf(),
    })?;
    let columns: Vec<String> = header
        .split(',')
        .map(|field| field.trim().trim_matches('"').to_string())
        .collect();

    let mut records = Vec::new();
    for (idx, line) in lines.enumerate() {
        match parse_row(line, &columns) {
            Some(record) => records.push(record),
            None => {
                warn!(path = %path.display(), row = idx + 1, "skipping malformed history row");
            }
        }
    }
    if records.is_empty() {
        return Err(HistoryError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(records)
}

/// Function values for the run: the final history row.
pub fn final_functions(records: &[HistoryRecord]) -> BTreeMap<String, f64> {
    records.last().cloned().unwrap_or_default()
}

fn parse_row(line: &str, columns: &[String]) -> Option<HistoryRecord> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != columns.len() {
        return None;
    }
    let mut record = HistoryRecord::new();
    for (name, field) in columns.iter().zip(&fields) {
        record.insert(name.clone(), field.parse().ok()?);
    }
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_history(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("history.dat");
        fs::write(&path, contents).expect("write history");
        path
    }

    #[test]
    fn reads_quoted_headers_and_takes_final_row() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_history(
            temp.path(),
            "\"ITER\", \"DRAG\", \"LIFT\"\n1, 0.5, 0.1\n2, 0.021, 0.31\n",
        );

        let records = read_history(&path).expect("read");
        assert_eq!(records.len(), 2);
        let finals = final_functions(&records);
        assert_eq!(finals["DRAG"], 0.021);
        assert_eq!(finals["LIFT"], 0.31);
        assert_eq!(finals["ITER"], 2.0);
    }

    #[test]
    fn skips_truncated_trailing_row() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_history(temp.path(), "\"ITER\", \"DRAG\"\n1, 0.5\n2, 0.021\n3, 0.0");

        // The last row parses fine; truncate harder.
        let records = read_history(&path).expect("read");
        assert_eq!(records.len(), 3);

        let path = write_history(temp.path(), "\"ITER\", \"DRAG\"\n1, 0.5\n2,\n");
        let records = read_history(&path).expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(final_functions(&records)["DRAG"], 0.5);
    }

    #[test]
    fn header_only_file_is_empty_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_history(temp.path(), "\"ITER\", \"DRAG\"\n");
        assert!(matches!(
            read_history(&path),
            Err(HistoryError::Empty { .. })
        ));
    }

    #[test]
    fn empty_file_is_missing_header() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_history(temp.path(), "");
        assert!(matches!(
            read_history(&path),
            Err(HistoryError::MissingHeader { .. })
        ));
    }
}
