//! Tabular parameter storage
//!
//! A [`ParameterTable`] holds one row per parameter combination, with an
//! `ID` column identifying each row. List-valued cells (e.g. a 3-component
//! size) are flattened into suffixed columns (`size_0`, `size_1`, ...) for
//! storage and collapsed back into lists when a row is turned into method
//! parameters. Tables persist as CSV.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::params::ParamValue;

/// Separator between a list parameter's stem and its element index
pub const LIST_COLUMN_SEP: char = '_';

/// An ordered table of parameter combinations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterTable {
    columns: Vec<String>,
    rows: Vec<Vec<ParamValue>>,
}

impl ParameterTable {
    /// Create an empty table with no columns
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table with the given columns
    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows (parameter combinations)
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row(&self, index: usize) -> Option<&[ParamValue]> {
        self.rows.get(index).map(|r| r.as_slice())
    }

    /// Append a row; its length must match the column count
    pub fn push_row(&mut self, row: Vec<ParamValue>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(EngineError::Malformed {
                what: "parameter table row",
                detail: format!(
                    "row has {} values, table has {} columns",
                    row.len(),
                    self.columns.len()
                ),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Look up a cell by row index and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&ParamValue> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(col)
    }

    /// Add a column with the same value broadcast onto every existing row
    ///
    /// On an empty table this only records the column, matching the
    /// behavior of assigning a scalar column to an empty data frame.
    pub fn add_broadcast_column(&mut self, name: impl Into<String>, value: ParamValue) {
        self.columns.push(name.into());
        for row in &mut self.rows {
            row.push(value.clone());
        }
    }

    /// Broadcast a value onto a column, replacing the column if it exists
    ///
    /// Used for engine-managed columns such as the `min_inputs` readiness
    /// gate, which must override a method's declared default rather than
    /// shadow it with a duplicate column.
    pub fn set_broadcast_column(&mut self, name: impl Into<String>, value: ParamValue) {
        let name = name.into();
        match self.columns.iter().position(|c| c == &name) {
            Some(col) => {
                for row in &mut self.rows {
                    if let Some(slot) = row.get_mut(col) {
                        *slot = value.clone();
                    }
                }
            }
            None => self.add_broadcast_column(name, value),
        }
    }

    /// Row-wise concatenation with column union
    ///
    /// Columns missing on either side are filled with empty strings.
    pub fn concat(&mut self, other: &ParameterTable) {
        for col in &other.columns {
            if !self.columns.contains(col) {
                self.add_broadcast_column(col.clone(), ParamValue::Str(String::new()));
            }
        }
        for row in &other.rows {
            let mut new_row = Vec::with_capacity(self.columns.len());
            for col in &self.columns {
                let value = other
                    .columns
                    .iter()
                    .position(|c| c == col)
                    .and_then(|i| row.get(i).cloned())
                    .unwrap_or_else(|| ParamValue::Str(String::new()));
                new_row.push(value);
            }
            self.rows.push(new_row);
        }
    }

    /// The named cells of one row, in column order
    pub fn row_entries(&self, index: usize) -> Vec<(String, ParamValue)> {
        match self.rows.get(index) {
            Some(row) => self
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Serialize the table to CSV text
    pub fn to_csv_string(&self) -> String {
        let mut out = String::new();
        out.push_str(
            &self
                .columns
                .iter()
                .map(|c| encode_cell_str(c))
                .collect::<Vec<_>>()
                .join(","),
        );
        out.push('\n');
        for row in &self.rows {
            out.push_str(
                &row.iter()
                    .map(encode_cell)
                    .collect::<Vec<_>>()
                    .join(","),
            );
            out.push('\n');
        }
        out
    }

    /// Parse a table from CSV text
    pub fn from_csv_string(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let header = lines.next().ok_or(EngineError::Malformed {
            what: "parameter CSV",
            detail: "missing header line".to_string(),
        })?;
        let columns = split_csv_line(header);
        let mut table = ParameterTable::with_columns(columns);
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let cells = split_csv_line(line);
            let row: Vec<ParamValue> = cells.iter().map(|c| decode_cell(c)).collect();
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Write the table to a CSV file, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_csv_string())?;
        Ok(())
    }

    /// Load a table from a CSV file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_csv_string(&text)
    }
}

/// Flatten list-valued entries into suffixed scalar entries
///
/// `("size", [10, 6, 6])` becomes `("size_0", 10), ("size_1", 6), ("size_2", 6)`.
/// Scalar entries pass through unchanged.
pub fn flatten_lists(entries: Vec<(String, ParamValue)>) -> Vec<(String, ParamValue)> {
    let mut out = Vec::with_capacity(entries.len());
    for (name, value) in entries {
        match value {
            ParamValue::List(items) => {
                for (i, item) in items.into_iter().enumerate() {
                    out.push((format!("{}{}{}", name, LIST_COLUMN_SEP, i), item));
                }
            }
            other => out.push((name, other)),
        }
    }
    out
}

/// Collapse suffix-numbered entries sharing a stem back into one list entry
///
/// A stem needs more than one matching column to be reconstituted; a single
/// `name_0` column stays scalar. The list takes the position of the stem's
/// first column; elements are ordered by their numeric suffix.
pub fn collapse_lists(entries: Vec<(String, ParamValue)>) -> Vec<(String, ParamValue)> {
    let stem_of = |name: &str| -> Option<(String, usize)> {
        let idx = name.rfind(LIST_COLUMN_SEP)?;
        let (stem, suffix) = name.split_at(idx);
        let digits = &suffix[1..];
        if stem.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((stem.to_string(), digits.parse().ok()?))
    };

    // count members per stem first
    let mut counts: Vec<(String, usize)> = Vec::new();
    for (name, _) in &entries {
        if let Some((stem, _)) = stem_of(name) {
            match counts.iter_mut().find(|(s, _)| *s == stem) {
                Some((_, n)) => *n += 1,
                None => counts.push((stem, 1)),
            }
        }
    }

    let mut out: Vec<(String, ParamValue)> = Vec::new();
    for (name, value) in entries {
        match stem_of(&name) {
            Some((stem, index))
                if counts.iter().any(|(s, n)| *s == stem && *n > 1) =>
            {
                if let Some((_, ParamValue::List(items))) =
                    out.iter_mut().find(|(n, _)| *n == stem)
                {
                    while items.len() <= index {
                        items.push(ParamValue::Str(String::new()));
                    }
                    items[index] = value;
                } else {
                    let mut items = vec![ParamValue::Str(String::new()); index + 1];
                    items[index] = value;
                    out.push((stem, ParamValue::List(items)));
                }
            }
            _ => out.push((name, value)),
        }
    }
    out
}

fn encode_cell(value: &ParamValue) -> String {
    match value {
        ParamValue::Bool(v) => v.to_string(),
        ParamValue::Int(v) => v.to_string(),
        // Debug formatting keeps the decimal point so floats survive re-parsing
        ParamValue::Float(v) => format!("{:?}", v),
        ParamValue::Str(v) => encode_cell_str(v),
        ParamValue::List(items) => encode_cell_str(
            &serde_json::to_string(items).unwrap_or_default(),
        ),
    }
}

fn encode_cell_str(text: &str) -> String {
    if text.contains(',') || text.contains('"') || text.contains('\n') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

fn decode_cell(cell: &str) -> ParamValue {
    if cell == "true" {
        return ParamValue::Bool(true);
    }
    if cell == "false" {
        return ParamValue::Bool(false);
    }
    if let Ok(v) = cell.parse::<i64>() {
        return ParamValue::Int(v);
    }
    if let Ok(v) = cell.parse::<f64>() {
        return ParamValue::Float(v);
    }
    ParamValue::Str(cell.to_string())
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                cells.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    cells.push(current);
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> ParameterTable {
        let mut table = ParameterTable::with_columns(vec![
            "sigma".to_string(),
            "aspect".to_string(),
            "ID".to_string(),
        ]);
        table
            .push_row(vec![
                ParamValue::Float(1.0),
                ParamValue::Float(3.0),
                ParamValue::from("PSF0000"),
            ])
            .unwrap();
        table
            .push_row(vec![
                ParamValue::Float(2.0),
                ParamValue::Float(2.0),
                ParamValue::from("PSF0001"),
            ])
            .unwrap();
        table
    }

    #[test]
    fn test_csv_round_trip() {
        let table = sample_table();
        let csv = table.to_csv_string();
        let back = ParameterTable::from_csv_string(&csv).unwrap();
        assert_eq!(table, back);
    }

    #[test]
    fn test_csv_round_trip_preserves_float_vs_int() {
        let mut table = ParameterTable::with_columns(vec!["a".to_string(), "b".to_string()]);
        table
            .push_row(vec![ParamValue::Float(1.0), ParamValue::Int(1)])
            .unwrap();
        let back = ParameterTable::from_csv_string(&table.to_csv_string()).unwrap();
        assert_eq!(back.get(0, "a"), Some(&ParamValue::Float(1.0)));
        assert_eq!(back.get(0, "b"), Some(&ParamValue::Int(1)));
    }

    #[test]
    fn test_flatten_and_collapse() {
        let entries = vec![
            ("size".to_string(), ParamValue::from(vec![10.0, 6.0, 6.0])),
            ("theta".to_string(), ParamValue::Float(0.0)),
        ];
        let flat = flatten_lists(entries);
        assert_eq!(flat.len(), 4);
        assert_eq!(flat[0].0, "size_0");
        assert_eq!(flat[3].0, "theta");

        let back = collapse_lists(flat);
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].0, "size");
        assert_eq!(back[0].1, ParamValue::from(vec![10.0, 6.0, 6.0]));
    }

    #[test]
    fn test_collapse_requires_multiple_columns() {
        let entries = vec![("lone_0".to_string(), ParamValue::Int(5))];
        let back = collapse_lists(entries);
        assert_eq!(back[0].0, "lone_0");
    }

    #[test]
    fn test_collapse_groups_by_stem() {
        let entries = vec![
            ("size_0".to_string(), ParamValue::Float(10.0)),
            ("size_1".to_string(), ParamValue::Float(6.0)),
            ("voxel_size_0".to_string(), ParamValue::Float(0.5)),
            ("voxel_size_1".to_string(), ParamValue::Float(0.2)),
        ];
        let back = collapse_lists(entries);
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].0, "size");
        assert_eq!(back[1].0, "voxel_size");
        assert_eq!(back[1].1, ParamValue::from(vec![0.5, 0.2]));
    }

    #[test]
    fn test_set_broadcast_column_overwrites_existing() {
        let mut table = sample_table();
        table.set_broadcast_column("aspect", ParamValue::Float(5.0));
        let aspects = table.columns().iter().filter(|c| c.as_str() == "aspect").count();
        assert_eq!(aspects, 1);
        assert_eq!(table.get(0, "aspect"), Some(&ParamValue::Float(5.0)));
        assert_eq!(table.get(1, "aspect"), Some(&ParamValue::Float(5.0)));

        table.set_broadcast_column("extra", ParamValue::Int(1));
        assert_eq!(table.get(1, "extra"), Some(&ParamValue::Int(1)));
    }

    #[test]
    fn test_concat_with_column_union() {
        let mut a = ParameterTable::with_columns(vec!["x".to_string()]);
        a.push_row(vec![ParamValue::Int(1)]).unwrap();
        let mut b = ParameterTable::with_columns(vec!["x".to_string(), "y".to_string()]);
        b.push_row(vec![ParamValue::Int(2), ParamValue::Int(3)])
            .unwrap();
        a.concat(&b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.columns(), &["x".to_string(), "y".to_string()]);
        assert_eq!(a.get(0, "y"), Some(&ParamValue::Str(String::new())));
        assert_eq!(a.get(1, "y"), Some(&ParamValue::Int(3)));
    }

    #[test]
    fn test_quoted_cells() {
        let mut table = ParameterTable::with_columns(vec!["name".to_string()]);
        table
            .push_row(vec![ParamValue::from("a,b \"c\"")])
            .unwrap();
        let back = ParameterTable::from_csv_string(&table.to_csv_string()).unwrap();
        assert_eq!(back.get(0, "name"), Some(&ParamValue::from("a,b \"c\"")));
    }
}
