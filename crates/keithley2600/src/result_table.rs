// Copyright 2025 SmuLab Desktop Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tabular measurement results with a plain-text on-disk format.
//!
//! The format is tab-separated values with a `#`-prefixed header block:
//!
//! ```text
//! # recorded: 2025-06-01T12:00:00+00:00
//! # sweep_type: iv
//! # t_int: 0.1
//! Voltage [V]	Current [A]
//! 0.000000000e0	1.234000000e-6
//! ```
//!
//! Header lines carry the sweep parameters as `key: value` pairs; the first
//! non-comment row names the columns with their units in square brackets.

use chrono::Utc;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::{Error, Result};

/// Key used for the timestamp header line.
const RECORDED_KEY: &str = "recorded";

/// A table of measurement results: named, unit-annotated float columns plus
/// the sweep parameters that produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    pub column_titles: Vec<String>,
    /// Unit per column, empty string for dimensionless.
    pub units: Vec<String>,
    /// Row-major data. Every row has `column_titles.len()` entries.
    pub data: Vec<Vec<f64>>,
    pub params: BTreeMap<String, String>,
}

impl ResultTable {
    /// Create an empty table with the given columns.
    ///
    /// # Panics
    /// Panics if `titles` and `units` differ in length.
    pub fn new(titles: Vec<String>, units: Vec<String>) -> Self {
        assert_eq!(titles.len(), units.len(), "one unit per column");
        Self {
            column_titles: titles,
            units,
            data: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn n_cols(&self) -> usize {
        self.column_titles.len()
    }

    pub fn n_rows(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append one row.
    ///
    /// # Panics
    /// Panics if the row width does not match the column count.
    pub fn push_row(&mut self, row: Vec<f64>) {
        assert_eq!(row.len(), self.n_cols(), "row width mismatch");
        self.data.push(row);
    }

    /// Record a sweep parameter for the header block.
    pub fn set_param(&mut self, key: impl Into<String>, value: impl ToString) {
        self.params.insert(key.into(), value.to_string());
    }

    /// Values of one column.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.data.iter().map(|row| row[index]).collect()
    }

    /// Column header label, `Title [unit]` or bare `Title`.
    pub fn header_label(&self, index: usize) -> String {
        let title = &self.column_titles[index];
        let unit = &self.units[index];
        if unit.is_empty() {
            title.clone()
        } else {
            format!("{title} [{unit}]")
        }
    }

    /// Serialize to a writer in the text format.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "# {RECORDED_KEY}: {}", Utc::now().to_rfc3339())?;
        for (key, value) in &self.params {
            writeln!(writer, "# {key}: {value}")?;
        }

        let mut csv = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(writer);
        csv.write_record(
            (0..self.n_cols())
                .map(|i| self.header_label(i))
                .collect::<Vec<_>>(),
        )?;
        for row in &self.data {
            csv.write_record(row.iter().map(|v| format!("{v:.9e}")))?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Parse a table from a reader.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        let mut params = BTreeMap::new();
        let mut body = String::new();
        for line in text.lines() {
            if let Some(comment) = line.strip_prefix('#') {
                if let Some((key, value)) = comment.split_once(':') {
                    params.insert(key.trim().to_owned(), value.trim().to_owned());
                }
            } else if !line.trim().is_empty() {
                body.push_str(line);
                body.push('\n');
            }
        }
        // The timestamp is written on save, not a sweep parameter.
        params.remove(RECORDED_KEY);

        let mut csv = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(body.as_bytes());

        let headers = csv
            .headers()
            .map_err(|e| Error::Table(e.to_string()))?
            .clone();
        if headers.is_empty() {
            return Err(Error::Table("missing column header row".into()));
        }

        let mut titles = Vec::new();
        let mut units = Vec::new();
        for label in headers.iter() {
            let (title, unit) = split_header_label(label);
            titles.push(title);
            units.push(unit);
        }

        let mut table = ResultTable::new(titles, units);
        table.params = params;

        for record in csv.records() {
            let record = record?;
            if record.len() != table.n_cols() {
                return Err(Error::Table(format!(
                    "row with {} fields, expected {}",
                    record.len(),
                    table.n_cols()
                )));
            }
            let mut row = Vec::with_capacity(record.len());
            for field in record.iter() {
                let value = field
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| Error::Table(format!("non-numeric field {field:?}")))?;
                row.push(value);
            }
            table.data.push(row);
        }

        Ok(table)
    }

    /// Save to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        self.write_to(file)
    }

    /// Load from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_from(file)
    }
}

/// Split `Title [unit]` into its parts; the unit is empty if absent.
fn split_header_label(label: &str) -> (String, String) {
    let label = label.trim();
    if let Some(stripped) = label.strip_suffix(']') {
        if let Some((title, unit)) = stripped.rsplit_once(" [") {
            return (title.trim().to_owned(), unit.trim().to_owned());
        }
    }
    (label.to_owned(), String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> ResultTable {
        let mut table = ResultTable::new(
            vec!["Voltage".into(), "Current".into()],
            vec!["V".into(), "A".into()],
        );
        table.set_param("sweep_type", "iv");
        table.set_param("t_int", 0.1);
        table.push_row(vec![0.0, 1.5e-9]);
        table.push_row(vec![0.5, 2.25e-6]);
        table.push_row(vec![-1.0, -4.5e-6]);
        table
    }

    #[test]
    fn test_roundtrip() {
        let table = sample_table();
        let mut buf = Vec::new();
        table.write_to(&mut buf).unwrap();

        let restored = ResultTable::read_from(buf.as_slice()).unwrap();
        assert_eq!(restored.column_titles, table.column_titles);
        assert_eq!(restored.units, table.units);
        assert_eq!(restored.params, table.params);
        assert_eq!(restored.n_rows(), 3);
        for (a, b) in restored.data.iter().flatten().zip(table.data.iter().flatten()) {
            assert!((a - b).abs() < 1e-15, "{a} != {b}");
        }
    }

    #[test]
    fn test_written_format() {
        let table = sample_table();
        let mut buf = Vec::new();
        table.write_to(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("# recorded: "));
        assert!(text.contains("# sweep_type: iv\n"));
        assert!(text.contains("Voltage [V]\tCurrent [A]\n"));
    }

    #[test]
    fn test_header_label_split() {
        assert_eq!(
            split_header_label("Gate voltage [V]"),
            ("Gate voltage".to_owned(), "V".to_owned())
        );
        assert_eq!(
            split_header_label("Step index"),
            ("Step index".to_owned(), String::new())
        );
        assert_eq!(
            split_header_label("Drain current (Vd = -5 V) [A]"),
            ("Drain current (Vd = -5 V)".to_owned(), "A".to_owned())
        );
    }

    #[test]
    fn test_rejects_ragged_rows() {
        let text = "Voltage [V]\tCurrent [A]\n1.0\n";
        let err = ResultTable::read_from(text.as_bytes());
        assert!(err.is_err());
    }

    #[test]
    fn test_column_access() {
        let table = sample_table();
        assert_eq!(table.column(0), vec![0.0, 0.5, -1.0]);
        assert_eq!(table.header_label(1), "Current [A]");
    }
}
