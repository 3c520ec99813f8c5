//! Column types and the schema that pins a series to a fixed layout.
//!
//! Schema string-parsing (a compact `"ts:timestamp*,val:float"` notation
//! for a command-line tool) is out of scope here; callers build a
//! `Schema` programmatically and it is then carried verbatim in every
//! commit/segment manifest.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int64,
    Float64,
    Str,
    Bool,
    Timestamp,
    /// Days since the epoch, stored as a bare `i64` (no time-of-day).
    Date,
    Bytes,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::Str => "str",
            ColumnType::Bool => "bool",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Date => "date",
            ColumnType::Bytes => "bytes",
        }
    }
}

/// Granularity a `Timestamp` column's raw `i64` counts are denominated in.
/// Carried as a hint on `Column` rather than folded into `ColumnType`
/// itself: it changes how a caller interprets the integer, not how the
/// column is stored, ordered, or deduplicated, so it has no bearing on
/// `Array`'s variant set or the wire codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampUnit {
    Nanos,
    Micros,
    Millis,
    Secs,
}

impl TimestampUnit {
    pub fn name(&self) -> &'static str {
        match self {
            TimestampUnit::Nanos => "ns",
            TimestampUnit::Micros => "us",
            TimestampUnit::Millis => "ms",
            TimestampUnit::Secs => "s",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    /// Part of the series' index key, in declaration order.
    pub is_index: bool,
    /// Meaningful only when `ty` is `Timestamp`; `None` means microseconds,
    /// matching the changelog's own epoch convention.
    pub timestamp_unit: Option<TimestampUnit>,
}

impl Column {
    pub fn index(name: impl Into<String>, ty: ColumnType) -> Self {
        Column {
            name: name.into(),
            ty,
            is_index: true,
            timestamp_unit: None,
        }
    }

    pub fn data(name: impl Into<String>, ty: ColumnType) -> Self {
        Column {
            name: name.into(),
            ty,
            is_index: false,
            timestamp_unit: None,
        }
    }

    /// Attach a granularity to a `Timestamp` column. A no-op marker on any
    /// other column type; `ty` alone still governs storage and codec.
    pub fn with_timestamp_unit(mut self, unit: TimestampUnit) -> Self {
        self.timestamp_unit = Some(unit);
        self
    }
}

/// The fixed column layout a series is created with. Schema evolution is
/// out of scope: a `Schema` is immutable for the lifetime of a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Build a schema, checking the invariants every commit and segment
    /// relies on: unique column names, at least one index column, and
    /// index columns declared before data columns.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if columns.is_empty() {
            bail!("schema must declare at least one column");
        }
        let mut seen = std::collections::HashSet::new();
        let mut seen_data = false;
        let mut index_count = 0;
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                bail!("duplicate column name: {}", col.name);
            }
            if col.is_index {
                index_count += 1;
                if seen_data {
                    bail!(
                        "index column '{}' declared after a data column",
                        col.name
                    );
                }
            } else {
                seen_data = true;
            }
        }
        if index_count == 0 {
            bail!("schema must declare at least one index column");
        }
        Ok(Schema { columns })
    }

    /// Build a schema without validating invariants, for internal callers
    /// (segment/commit decoding) that already trust the bytes they read.
    pub fn new_unchecked(columns: Vec<Column>) -> Self {
        Schema { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn index_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_index)
    }

    pub fn data_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_index)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_names() {
        let err = Schema::new(vec![
            Column::index("ts", ColumnType::Timestamp),
            Column::data("ts", ColumnType::Float64),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_no_index_column() {
        let err = Schema::new(vec![Column::data("val", ColumnType::Float64)]).unwrap_err();
        assert!(err.to_string().contains("index"));
    }

    #[test]
    fn rejects_index_after_data() {
        let err = Schema::new(vec![
            Column::data("val", ColumnType::Float64),
            Column::index("ts", ColumnType::Timestamp),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("after a data column"));
    }

    #[test]
    fn accepts_well_formed_schema() {
        let schema = Schema::new(vec![
            Column::index("ts", ColumnType::Timestamp),
            Column::data("val", ColumnType::Float64),
        ])
        .unwrap();
        assert_eq!(schema.index_columns().count(), 1);
        assert_eq!(schema.data_columns().count(), 1);
    }
}
