use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};

use super::{
    ColumnData, MeasurementTable, SamplingType, FLAG_SUFFIX, MDL_SUFFIX, SAMPLING_DATE,
    SAMPLING_TYPE, SITE_ID,
};

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Duplicate column name after normalization: {0}")]
    DuplicateColumn(String),

    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),

    #[error("Column '{name}' must hold {expected}, found {found}")]
    WrongKind {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Table columns do not match the schema it was validated with")]
    TableMismatch,
}

/// Column handles for one analyte code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyteColumns {
    pub code: String,
    pub value: Option<usize>,
    pub mdl: Option<usize>,
    pub flag: Option<usize>,
}

impl AnalyteColumns {
    fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            value: None,
            mdl: None,
            flag: None,
        }
    }

    /// Value and MDL column indices when both exist
    pub fn pair(&self) -> Option<(usize, usize)> {
        Some((self.value?, self.mdl?))
    }

    pub fn mdl_column_name(&self) -> String {
        format!("{}{MDL_SUFFIX}", self.code)
    }
}

/// Explicit column layout of a normalized table
///
/// Built once after column normalization. Later stages address columns
/// through these handles instead of re-matching name suffixes.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyteSchema {
    column_names: Vec<String>,
    sampling_date: usize,
    sampling_type: usize,
    site_id: Option<usize>,
    analytes: Vec<AnalyteColumns>,
}

impl AnalyteSchema {
    pub fn from_table(table: &MeasurementTable) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for name in table.column_names() {
            if !seen.insert(name) {
                return Err(SchemaError::DuplicateColumn(name.to_string()));
            }
        }

        let sampling_date = find_column(table, SAMPLING_DATE)?;
        expect_kind(table, sampling_date, "dates", |d| {
            matches!(d, ColumnData::Dates(_))
        })?;
        let sampling_type = find_column(table, SAMPLING_TYPE)?;
        expect_kind(table, sampling_type, "text", |d| matches!(d, ColumnData::Text(_)))?;
        let site_id = table.columns().iter().position(|c| c.name == SITE_ID);

        let mut analytes: Vec<AnalyteColumns> = Vec::new();
        let mut by_code: HashMap<String, usize> = HashMap::new();

        for (index, column) in table.columns().iter().enumerate() {
            let name = column.name.as_str();
            if name == SAMPLING_DATE || name == SAMPLING_TYPE || name == SITE_ID {
                continue;
            }

            let (code, role) = if let Some(code) = name.strip_suffix(MDL_SUFFIX) {
                (code, Role::Mdl)
            } else if let Some(code) = name.strip_suffix(FLAG_SUFFIX) {
                (code, Role::Flag)
            } else {
                (name, Role::Value)
            };

            let slot = *by_code.entry(code.to_string()).or_insert_with(|| {
                analytes.push(AnalyteColumns::new(code));
                analytes.len() - 1
            });
            let entry = &mut analytes[slot];
            match role {
                Role::Value => entry.value = Some(index),
                Role::Mdl => entry.mdl = Some(index),
                Role::Flag => entry.flag = Some(index),
            }
        }

        // Text columns without an MDL partner are descriptive, not analytes
        analytes.retain(|a| {
            let descriptive = a.mdl.is_none()
                && a.value
                    .map(|i| !matches!(table.column_at(i).data, ColumnData::Measurements(_)))
                    .unwrap_or(false);
            if descriptive {
                debug!("Column {} is not numeric, not treated as an analyte", a.code);
            }
            !descriptive
        });

        for analyte in &analytes {
            for index in [analyte.value, analyte.mdl].into_iter().flatten() {
                expect_kind(table, index, "measurements", |d| {
                    matches!(d, ColumnData::Measurements(_))
                })?;
            }
            match (analyte.value, analyte.mdl) {
                (Some(_), None) => info!("Analyte {} has no MDL column, excluded", analyte.code),
                (None, Some(_)) => info!(
                    "MDL column {} has no value column, excluded",
                    analyte.mdl_column_name()
                ),
                _ => {}
            }
        }

        Ok(Self {
            column_names: table.column_names().map(str::to_string).collect(),
            sampling_date,
            sampling_type,
            site_id,
            analytes,
        })
    }

    /// Fails when `table` is not laid out the way this schema was built
    pub fn ensure_matches(&self, table: &MeasurementTable) -> Result<(), SchemaError> {
        if table.columns().len() == self.column_names.len()
            && table.column_names().zip(&self.column_names).all(|(a, b)| a == b)
        {
            Ok(())
        } else {
            Err(SchemaError::TableMismatch)
        }
    }

    pub fn analytes(&self) -> &[AnalyteColumns] {
        &self.analytes
    }

    pub fn analyte(&self, code: &str) -> Option<&AnalyteColumns> {
        self.analytes.iter().find(|a| a.code == code)
    }

    /// Analytes that have both a value and an MDL column
    pub fn complete_analytes(&self) -> impl Iterator<Item = &AnalyteColumns> {
        self.analytes.iter().filter(|a| a.pair().is_some())
    }

    /// Indices of every value and MDL column
    pub fn concentration_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.analytes
            .iter()
            .flat_map(|a| [a.value, a.mdl])
            .flatten()
    }

    pub fn sampling_date_index(&self) -> usize {
        self.sampling_date
    }

    pub fn site_id_index(&self) -> Option<usize> {
        self.site_id
    }

    /// Parsed `sampling_type` of every row
    pub fn sampling_types(&self, table: &MeasurementTable) -> Vec<Option<SamplingType>> {
        match &table.column_at(self.sampling_type).data {
            ColumnData::Text(values) => values
                .iter()
                .map(|v| v.as_deref().and_then(|s| s.parse().ok()))
                .collect(),
            _ => vec![None; table.row_count()],
        }
    }
}

enum Role {
    Value,
    Mdl,
    Flag,
}

fn find_column(table: &MeasurementTable, name: &'static str) -> Result<usize, SchemaError> {
    table
        .columns()
        .iter()
        .position(|c| c.name == name)
        .ok_or(SchemaError::MissingColumn(name))
}

fn expect_kind(
    table: &MeasurementTable,
    index: usize,
    expected: &'static str,
    ok: impl Fn(&ColumnData) -> bool,
) -> Result<(), SchemaError> {
    let column = table.column_at(index);
    if ok(&column.data) {
        Ok(())
    } else {
        Err(SchemaError::WrongKind {
            name: column.name.clone(),
            expected,
            found: column.data.kind(),
        })
    }
}
