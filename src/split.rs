// Decomposition of a cleaned wide table into one PMF input series per analyte

use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::persist::{read_table_csv, AnalyteSink, PersistError};
use crate::table::{AnalyteSchema, Cell, ColumnData, MeasurementTable, SchemaError};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to load cleaned table: {0}")]
    Load(#[from] PersistError),

    #[error("Invalid table layout: {0}")]
    Schema(#[from] SchemaError),

    #[error("Failed to write series {name}: {source}")]
    Write {
        name: String,
        #[source]
        source: PersistError,
    },
}

/// One dated observation of an analyte
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub date: Option<NaiveDate>,
    pub value: Cell,
    pub mdl: Cell,
}

/// Narrow per-analyte table: date, value, MDL
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyteSeries {
    pub code: String,
    pub rows: Vec<SeriesRow>,
}

impl AnalyteSeries {
    pub fn mdl_column_name(&self) -> String {
        format!("{}{}", self.code, crate::table::MDL_SUFFIX)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitOutcome {
    pub series: Vec<AnalyteSeries>,
    /// Analytes with no row left after filtering
    pub skipped_empty: Vec<String>,
    /// Value columns without a matching MDL column
    pub skipped_without_mdl: Vec<String>,
}

/// Where the cleaned table for an export comes from
#[derive(Debug, Clone)]
pub enum TableSource {
    Loaded(MeasurementTable),
    /// Cleaned CSV previously written by [`crate::persist::write_table_csv`]
    Csv(PathBuf),
}

impl From<MeasurementTable> for TableSource {
    fn from(table: MeasurementTable) -> Self {
        TableSource::Loaded(table)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportReport {
    pub exported: Vec<String>,
    pub skipped_empty: Vec<String>,
    pub skipped_without_mdl: Vec<String>,
}

impl ExportReport {
    pub fn exported_count(&self) -> usize {
        self.exported.len()
    }
}

/// Keep real samples and build one series per analyte
///
/// Rows where both value and MDL are unknown are dropped; a row with one
/// known side is kept.
pub fn split_analytes(
    table: MeasurementTable,
    schema: &AnalyteSchema,
) -> Result<SplitOutcome, SchemaError> {
    schema.ensure_matches(&table)?;

    let real: Vec<bool> = schema
        .sampling_types(&table)
        .iter()
        .map(|t| t.as_ref().map(|t| t.is_real()).unwrap_or(false))
        .collect();
    let table = table.filter_rows(|i| real[i]);
    debug!("{} real sample rows", table.row_count());

    let dates = match &table.column_at(schema.sampling_date_index()).data {
        ColumnData::Dates(dates) => dates.clone(),
        _ => vec![None; table.row_count()],
    };

    let mut outcome = SplitOutcome::default();

    for analyte in schema.analytes() {
        let (value_index, mdl_index) = match (analyte.value, analyte.mdl) {
            (Some(v), Some(m)) => (v, m),
            (Some(_), None) => {
                outcome.skipped_without_mdl.push(analyte.code.clone());
                continue;
            }
            _ => continue,
        };

        let (ColumnData::Measurements(values), ColumnData::Measurements(mdls)) = (
            &table.column_at(value_index).data,
            &table.column_at(mdl_index).data,
        ) else {
            continue;
        };

        let rows: Vec<SeriesRow> = dates
            .iter()
            .zip(values.iter().zip(mdls))
            .filter(|(_, (value, mdl))| !(value.is_unknown() && mdl.is_unknown()))
            .map(|(date, (value, mdl))| SeriesRow {
                date: *date,
                value: *value,
                mdl: *mdl,
            })
            .collect();

        if rows.is_empty() {
            info!("Analyte {} has no data after filtering, skipping", analyte.code);
            outcome.skipped_empty.push(analyte.code.clone());
            continue;
        }

        outcome.series.push(AnalyteSeries {
            code: analyte.code.clone(),
            rows,
        });
    }

    Ok(outcome)
}

/// Split a cleaned table and hand each series to `sink` as `<prefix><code>`
///
/// Skipped analytes are reported, not treated as errors. A series is only
/// passed to the sink once it is fully assembled.
#[instrument(skip(source, sink))]
pub fn export_per_analyte(
    source: TableSource,
    sink: &impl AnalyteSink,
    prefix: &str,
) -> Result<ExportReport, ExportError> {
    let table = match source {
        TableSource::Loaded(table) => table,
        TableSource::Csv(path) => {
            let table = read_table_csv(&path)?;
            info!("Loaded: {}", path.display());
            table
        }
    };

    let schema = AnalyteSchema::from_table(&table)?;
    let outcome = split_analytes(table, &schema)?;

    let mut report = ExportReport {
        exported: Vec::with_capacity(outcome.series.len()),
        skipped_empty: outcome.skipped_empty,
        skipped_without_mdl: outcome.skipped_without_mdl,
    };

    for series in &outcome.series {
        let name = format!("{prefix}{}", series.code);
        sink.write(&name, series)
            .map_err(|source| ExportError::Write {
                name: name.clone(),
                source,
            })?;
        debug!("Wrote {} ({} rows)", name, series.rows.len());
        report.exported.push(series.code.clone());
    }

    info!(
        "Exported {} analytes ({} empty, {} without MDL)",
        report.exported_count(),
        report.skipped_empty.len(),
        report.skipped_without_mdl.len()
    );
    Ok(report)
}
