// In-memory tabular model shared by every pipeline stage
//
// A MeasurementTable is a list of equally long, named columns. Stages take a
// table by value and hand back a new one; nothing here is shared between
// callers.

pub mod cell;
pub mod schema;

use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use cell::{Cell, INVALID_SENTINEL};
pub use schema::{AnalyteColumns, AnalyteSchema, SchemaError};

/// Canonical metadata column names
pub const SITE_ID: &str = "site_id";
pub const SAMPLING_DATE: &str = "sampling_date";
pub const SAMPLING_TYPE: &str = "sampling_type";

/// Column name suffixes used by NAPS speciation sheets
pub const MDL_SUFFIX: &str = "-MDL";
pub const FLAG_SUFFIX: &str = "-VFlag";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Column '{name}' has {actual} rows, expected {expected}")]
    RaggedColumn {
        name: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Measurements(Vec<Cell>),
    Text(Vec<Option<String>>),
    Dates(Vec<Option<NaiveDate>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Measurements(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Dates(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ColumnData::Measurements(_) => "measurements",
            ColumnData::Text(_) => "text",
            ColumnData::Dates(_) => "dates",
        }
    }

    /// Keep only the rows whose index is in `rows` (ascending)
    fn take(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Measurements(v) => {
                ColumnData::Measurements(rows.iter().map(|&i| v[i]).collect())
            }
            ColumnData::Text(v) => ColumnData::Text(rows.iter().map(|&i| v[i].clone()).collect()),
            ColumnData::Dates(v) => ColumnData::Dates(rows.iter().map(|&i| v[i]).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn measurements(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self::new(name, ColumnData::Measurements(cells))
    }

    pub fn text<S: Into<String>>(name: impl Into<String>, values: Vec<Option<S>>) -> Self {
        Self::new(
            name,
            ColumnData::Text(values.into_iter().map(|v| v.map(Into::into)).collect()),
        )
    }

    pub fn dates(name: impl Into<String>, values: Vec<Option<NaiveDate>>) -> Self {
        Self::new(name, ColumnData::Dates(values))
    }
}

/// Ordered rows addressed by named columns
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeasurementTable {
    columns: Vec<Column>,
    row_count: usize,
}

impl MeasurementTable {
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let row_count = columns.first().map(|c| c.data.len()).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.data.len() != row_count) {
            return Err(TableError::RaggedColumn {
                name: bad.name.clone(),
                expected: row_count,
                actual: bad.data.len(),
            });
        }
        Ok(Self { columns, row_count })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_at(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub(crate) fn column_at_mut(&mut self, index: usize) -> &mut Column {
        &mut self.columns[index]
    }

    /// Drop every column for which `keep` returns false
    pub fn retain_columns(mut self, keep: impl Fn(&Column) -> bool) -> Self {
        self.columns.retain(keep);
        self
    }

    /// Rename every column through `rename`; `None` keeps the current name
    pub fn rename_columns(mut self, rename: impl Fn(&str) -> Option<String>) -> Self {
        for column in &mut self.columns {
            if let Some(new_name) = rename(&column.name) {
                column.name = new_name;
            }
        }
        self
    }

    /// Keep rows for which `keep(row_index)` is true, preserving order
    pub fn filter_rows(self, keep: impl Fn(usize) -> bool) -> Self {
        let rows: Vec<usize> = (0..self.row_count).filter(|&i| keep(i)).collect();
        let columns = self
            .columns
            .into_iter()
            .map(|c| Column::new(c.name, c.data.take(&rows)))
            .collect();
        Self {
            columns,
            row_count: rows.len(),
        }
    }
}

/// Category of a sample row (`sampling_type` column)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SamplingType {
    /// `R`
    Real,
    /// `FB`
    FieldBlank,
    /// `TB`
    TravelBlank,
    Other(String),
}

impl SamplingType {
    pub fn is_blank(&self) -> bool {
        matches!(self, SamplingType::FieldBlank | SamplingType::TravelBlank)
    }

    pub fn is_real(&self) -> bool {
        matches!(self, SamplingType::Real)
    }
}

impl FromStr for SamplingType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "R" => SamplingType::Real,
            "FB" => SamplingType::FieldBlank,
            "TB" => SamplingType::TravelBlank,
            other => SamplingType::Other(other.to_string()),
        })
    }
}

impl fmt::Display for SamplingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingType::Real => write!(f, "R"),
            SamplingType::FieldBlank => write!(f, "FB"),
            SamplingType::TravelBlank => write!(f, "TB"),
            SamplingType::Other(code) => write!(f, "{code}"),
        }
    }
}
