//! In-memory columnar frames: the unit `Series::write` accepts and
//! `Series::read` returns.
//!
//! Binding to a particular dataframe or array library (Arrow, Polars...)
//! is out of scope; `Array` is a small, crate-local columnar vector just
//! rich enough to carry the index/commit/segment machinery.

use std::cmp::Ordering;

use anyhow::{bail, Result};

use crate::schema::{ColumnType, Schema};

#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    Int64(i64),
    Float64(f64),
    Str(String),
    Bool(bool),
    Timestamp(i64),
    Date(i64),
    Bytes(Vec<u8>),
}

impl IndexValue {
    fn rank(&self) -> u8 {
        match self {
            IndexValue::Int64(_) => 0,
            IndexValue::Float64(_) => 1,
            IndexValue::Str(_) => 2,
            IndexValue::Bool(_) => 3,
            IndexValue::Timestamp(_) => 4,
            IndexValue::Date(_) => 5,
            IndexValue::Bytes(_) => 6,
        }
    }
}

impl Eq for IndexValue {}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Index columns come from a fixed schema, so two `IndexValue`s being
/// compared always carry the same variant in practice; the mismatched-
/// variant arm exists only so the order stays total instead of panicking.
impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use IndexValue::*;
        match (self, other) {
            (Int64(a), Int64(b)) => a.cmp(b),
            (Float64(a), Float64(b)) => a.total_cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// A row's full index-column tuple, in schema order. Orders frames and
/// commits; the row-comparison key the whole read/write/merge path sorts
/// and masks ranges on.
pub type IndexKey = Vec<IndexValue>;

#[derive(Debug, Clone)]
pub enum Array {
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Str(Vec<Option<String>>),
    Bool(Vec<Option<bool>>),
    Timestamp(Vec<Option<i64>>),
    Date(Vec<Option<i64>>),
    Bytes(Vec<Option<Vec<u8>>>),
}

impl Array {
    pub fn ty(&self) -> ColumnType {
        match self {
            Array::Int64(_) => ColumnType::Int64,
            Array::Float64(_) => ColumnType::Float64,
            Array::Str(_) => ColumnType::Str,
            Array::Bool(_) => ColumnType::Bool,
            Array::Timestamp(_) => ColumnType::Timestamp,
            Array::Date(_) => ColumnType::Date,
            Array::Bytes(_) => ColumnType::Bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Array::Int64(v) => v.len(),
            Array::Float64(v) => v.len(),
            Array::Str(v) => v.len(),
            Array::Bool(v) => v.len(),
            Array::Timestamp(v) => v.len(),
            Array::Date(v) => v.len(),
            Array::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A zero-length array of the given type, for an empty read result.
    pub fn empty(ty: ColumnType) -> Array {
        match ty {
            ColumnType::Int64 => Array::Int64(vec![]),
            ColumnType::Float64 => Array::Float64(vec![]),
            ColumnType::Str => Array::Str(vec![]),
            ColumnType::Bool => Array::Bool(vec![]),
            ColumnType::Timestamp => Array::Timestamp(vec![]),
            ColumnType::Date => Array::Date(vec![]),
            ColumnType::Bytes => Array::Bytes(vec![]),
        }
    }

    /// Pull the value at `row` out as an `IndexValue`. Errors if the cell
    /// is null: index columns may not contain nulls.
    pub fn index_value(&self, row: usize) -> Result<IndexValue> {
        Ok(match self {
            Array::Int64(v) => IndexValue::Int64(v[row].ok_or_else(|| anyhow::anyhow!("null index value"))?),
            Array::Float64(v) => IndexValue::Float64(v[row].ok_or_else(|| anyhow::anyhow!("null index value"))?),
            Array::Str(v) => IndexValue::Str(
                v[row]
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("null index value"))?,
            ),
            Array::Bool(v) => IndexValue::Bool(v[row].ok_or_else(|| anyhow::anyhow!("null index value"))?),
            Array::Timestamp(v) => {
                IndexValue::Timestamp(v[row].ok_or_else(|| anyhow::anyhow!("null index value"))?)
            }
            Array::Date(v) => IndexValue::Date(v[row].ok_or_else(|| anyhow::anyhow!("null index value"))?),
            Array::Bytes(v) => IndexValue::Bytes(
                v[row]
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("null index value"))?,
            ),
        })
    }

    pub fn slice(&self, start: usize, end: usize) -> Array {
        match self {
            Array::Int64(v) => Array::Int64(v[start..end].to_vec()),
            Array::Float64(v) => Array::Float64(v[start..end].to_vec()),
            Array::Str(v) => Array::Str(v[start..end].to_vec()),
            Array::Bool(v) => Array::Bool(v[start..end].to_vec()),
            Array::Timestamp(v) => Array::Timestamp(v[start..end].to_vec()),
            Array::Date(v) => Array::Date(v[start..end].to_vec()),
            Array::Bytes(v) => Array::Bytes(v[start..end].to_vec()),
        }
    }

    pub fn take(&self, indices: &[usize]) -> Array {
        match self {
            Array::Int64(v) => Array::Int64(indices.iter().map(|&i| v[i]).collect()),
            Array::Float64(v) => Array::Float64(indices.iter().map(|&i| v[i]).collect()),
            Array::Str(v) => Array::Str(indices.iter().map(|&i| v[i].clone()).collect()),
            Array::Bool(v) => Array::Bool(indices.iter().map(|&i| v[i]).collect()),
            Array::Timestamp(v) => Array::Timestamp(indices.iter().map(|&i| v[i]).collect()),
            Array::Date(v) => Array::Date(indices.iter().map(|&i| v[i]).collect()),
            Array::Bytes(v) => Array::Bytes(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    pub fn concat(&self, other: &Array) -> Result<Array> {
        Ok(match (self, other) {
            (Array::Int64(a), Array::Int64(b)) => Array::Int64([a.as_slice(), b.as_slice()].concat()),
            (Array::Float64(a), Array::Float64(b)) => Array::Float64([a.as_slice(), b.as_slice()].concat()),
            (Array::Str(a), Array::Str(b)) => Array::Str([a.as_slice(), b.as_slice()].concat()),
            (Array::Bool(a), Array::Bool(b)) => Array::Bool([a.as_slice(), b.as_slice()].concat()),
            (Array::Timestamp(a), Array::Timestamp(b)) => {
                Array::Timestamp([a.as_slice(), b.as_slice()].concat())
            }
            (Array::Date(a), Array::Date(b)) => Array::Date([a.as_slice(), b.as_slice()].concat()),
            (Array::Bytes(a), Array::Bytes(b)) => Array::Bytes([a.as_slice(), b.as_slice()].concat()),
            _ => bail!("cannot concat columns of different types"),
        })
    }
}

/// A columnar batch of rows bound to a `Schema`: one `Array` per column,
/// all the same length.
#[derive(Debug, Clone)]
pub struct Frame {
    schema: Schema,
    columns: Vec<Array>,
}

impl Frame {
    pub fn new(schema: Schema, columns: Vec<Array>) -> Result<Self> {
        if columns.len() != schema.columns().len() {
            bail!(
                "frame has {} columns but schema declares {}",
                columns.len(),
                schema.columns().len()
            );
        }
        let len = columns.first().map(|c| c.len()).unwrap_or(0);
        for (col, array) in schema.columns().iter().zip(&columns) {
            if array.len() != len {
                bail!("column '{}' has length {} but frame length is {}", col.name, array.len(), len);
            }
            if array.ty() != col.ty {
                bail!(
                    "column '{}' is {:?} but schema declares {:?}",
                    col.name,
                    array.ty(),
                    col.ty
                );
            }
        }
        Ok(Frame { schema, columns })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn columns(&self) -> &[Array] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Array> {
        let idx = self.schema.column_index(name)?;
        self.columns.get(idx)
    }

    /// The full index-column tuple for `row`.
    pub fn index_key(&self, row: usize) -> Result<IndexKey> {
        self.schema
            .index_columns()
            .map(|col| {
                let idx = self.schema.column_index(&col.name).expect("column exists");
                self.columns[idx].index_value(row)
            })
            .collect()
    }

    pub fn first_key(&self) -> Result<Option<IndexKey>> {
        if self.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.index_key(0)?))
        }
    }

    pub fn last_key(&self) -> Result<Option<IndexKey>> {
        if self.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.index_key(self.len() - 1)?))
        }
    }

    pub fn slice_rows(&self, start: usize, end: usize) -> Frame {
        Frame {
            schema: self.schema.clone(),
            columns: self.columns.iter().map(|c| c.slice(start, end)).collect(),
        }
    }

    /// Sort rows by index key and drop all but the last row for any
    /// repeated key, matching the "last write wins" rule a single write
    /// batch follows when it contains duplicate index values.
    pub fn sort_and_dedup(&self) -> Result<Frame> {
        let mut keyed: Vec<(IndexKey, usize)> = (0..self.len())
            .map(|row| Ok((self.index_key(row)?, row)))
            .collect::<Result<_>>()?;
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut order = Vec::with_capacity(keyed.len());
        let mut i = 0;
        while i < keyed.len() {
            let mut j = i;
            while j + 1 < keyed.len() && keyed[j + 1].0 == keyed[i].0 {
                j += 1;
            }
            order.push(keyed[j].1);
            i = j + 1;
        }

        Ok(Frame {
            schema: self.schema.clone(),
            columns: self.columns.iter().map(|c| c.take(&order)).collect(),
        })
    }

    /// Concatenate two frames with the same schema, in row order. Callers
    /// are responsible for ensuring index-key ordering already holds
    /// across the boundary; this does not re-sort.
    pub fn concat(&self, other: &Frame) -> Result<Frame> {
        if self.schema != other.schema {
            bail!("cannot concat frames with different schemas");
        }
        let columns = self
            .columns
            .iter()
            .zip(&other.columns)
            .map(|(a, b)| a.concat(b))
            .collect::<Result<Vec<_>>>()?;
        Ok(Frame {
            schema: self.schema.clone(),
            columns,
        })
    }
}
