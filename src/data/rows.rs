//! JSON-lines reader for persisted portfolio rows.

use std::fs;
use std::path::PathBuf;

use super::PortfolioSource;
use crate::engine::sweep::SweepRecord;
use crate::engine::types::PortfolioRow;
use crate::manifest::{Diagnostic, DiagnosticKind};

/// Reads one JSON object per line from each file: either a full sweep
/// record (the `JsonlSink` format) or a bare portfolio row. A malformed
/// line abandons its file (partially read rows from that file are
/// discarded); the remaining files are still processed.
pub struct JsonlRows {
    paths: Vec<PathBuf>,
}

impl JsonlRows {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }
}

impl PortfolioSource for JsonlRows {
    fn collect_rows(&mut self) -> (Vec<PortfolioRow>, Vec<Diagnostic>) {
        let mut rows = Vec::new();
        let mut diagnostics = Vec::new();

        for path in &self.paths {
            let scope = path.display().to_string();
            let body = match fs::read_to_string(path) {
                Ok(body) => body,
                Err(err) => {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::SchemaError,
                        scope,
                        format!("unreadable file: {err}"),
                    ));
                    continue;
                }
            };

            match parse_file(&body) {
                Ok(file_rows) => rows.extend(file_rows),
                Err((line_no, err)) => {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::SchemaError,
                        scope,
                        format!("line {line_no}: {err}"),
                    ));
                }
            }
        }

        (rows, diagnostics)
    }
}

fn parse_file(body: &str) -> Result<Vec<PortfolioRow>, (usize, serde_json::Error)> {
    let mut rows = Vec::new();
    for (idx, line) in body.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = match serde_json::from_str::<SweepRecord>(line) {
            Ok(record) => record.row,
            Err(_) => serde_json::from_str::<PortfolioRow>(line).map_err(|e| (idx + 1, e))?,
        };
        rows.push(row);
    }
    Ok(rows)
}
