//! Method detection limit (MDL) imputation
//!
//! Fills MDL cells that are unknown with one value per analyte, derived
//! either from the spread of blank samples or from the smallest positive
//! measurement. Cells already holding a number or the invalid marker are
//! kept as reported.
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::table::{AnalyteSchema, Cell, ColumnData, MeasurementTable, SchemaError};

/// Which standard deviation the blank rule uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StdDevConvention {
    /// Divide by `n`
    #[default]
    Population,
    /// Divide by `n - 1`
    Sample,
}

/// Parameters of the imputation rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MdlRule {
    /// Blank samples needed before the blank-based rule applies
    pub min_blank_count: usize,
    pub blank_multiplier: f64,
    /// Share of the smallest positive value used as the fallback MDL
    pub fallback_fraction: f64,
    pub std_dev: StdDevConvention,
}

impl Default for MdlRule {
    fn default() -> Self {
        Self {
            min_blank_count: 7,
            blank_multiplier: 3.0,
            fallback_fraction: 0.5,
            std_dev: StdDevConvention::Population,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImputationOptions {
    /// Analyte codes to process; `None` processes every analyte with a value and MDL column
    pub analytes: Option<Vec<String>>,
    pub rule: MdlRule,
}

/// How an analyte's missing MDL was resolved
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MdlSource {
    Blanks { count: usize, value: f64 },
    PositiveMinimum { value: f64 },
    Unresolved,
}

impl MdlSource {
    pub fn value(&self) -> Option<f64> {
        match self {
            MdlSource::Blanks { value, .. } | MdlSource::PositiveMinimum { value } => Some(*value),
            MdlSource::Unresolved => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyteImputation {
    pub analyte: String,
    pub source: MdlSource,
    /// Unknown MDL cells for this analyte (all of them receive the same value)
    pub missing_cells: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImputationReport {
    pub analytes: Vec<AnalyteImputation>,
}

impl ImputationReport {
    pub fn get(&self, analyte: &str) -> Option<&AnalyteImputation> {
        self.analytes.iter().find(|a| a.analyte == analyte)
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.analytes
            .iter()
            .filter(|a| a.source == MdlSource::Unresolved)
            .map(|a| a.analyte.as_str())
    }
}

/// Fill unknown MDL cells analyte by analyte
#[instrument(skip_all, fields(rows = table.row_count()))]
pub fn fill_missing_mdl(
    mut table: MeasurementTable,
    schema: &AnalyteSchema,
    options: &ImputationOptions,
) -> Result<(MeasurementTable, ImputationReport), SchemaError> {
    schema.ensure_matches(&table)?;

    let targets: Vec<(String, usize, usize)> = match &options.analytes {
        None => schema
            .complete_analytes()
            .filter_map(|a| a.pair().map(|(v, m)| (a.code.clone(), v, m)))
            .collect(),
        Some(codes) => codes
            .iter()
            .filter_map(|code| match schema.analyte(code).and_then(|a| a.pair()) {
                Some((v, m)) => Some((code.clone(), v, m)),
                None => {
                    info!("Analyte {} has no value/MDL column pair, skipping", code);
                    None
                }
            })
            .collect(),
    };

    let blank_rows: Vec<bool> = schema
        .sampling_types(&table)
        .iter()
        .map(|t| t.as_ref().map(|t| t.is_blank()).unwrap_or(false))
        .collect();

    let mut report = ImputationReport::default();

    for (code, value_index, mdl_index) in targets {
        let missing_cells = match &table.column_at(mdl_index).data {
            ColumnData::Measurements(cells) => cells.iter().filter(|c| c.is_unknown()).count(),
            _ => 0,
        };
        if missing_cells == 0 {
            debug!("Analyte {} has no unknown MDL cells", code);
            continue;
        }

        let source = match &table.column_at(value_index).data {
            ColumnData::Measurements(values) => resolve_mdl(values, &blank_rows, &options.rule),
            _ => MdlSource::Unresolved,
        };

        if let Some(mdl) = source.value() {
            if let ColumnData::Measurements(cells) = &mut table.column_at_mut(mdl_index).data {
                for cell in cells.iter_mut().filter(|c| c.is_unknown()) {
                    *cell = Cell::Detected(mdl);
                }
            }
        }

        debug!(
            "Analyte {}: {} unknown MDL cells, source {:?}",
            code, missing_cells, source
        );
        report.analytes.push(AnalyteImputation {
            analyte: code,
            source,
            missing_cells,
        });
    }

    info!(
        "Imputed MDL for {} analytes ({} unresolved)",
        report.analytes.len(),
        report.unresolved().count()
    );
    Ok((table, report))
}

/// Apply the rule to one analyte's value column
///
/// `blank_rows[i]` says whether row `i` is a field or travel blank.
pub fn resolve_mdl(values: &[Cell], blank_rows: &[bool], rule: &MdlRule) -> MdlSource {
    let blanks: Vec<f64> = values
        .iter()
        .zip(blank_rows)
        .filter(|(_, is_blank)| **is_blank)
        .filter_map(|(cell, _)| cell.detected())
        .collect();

    if blanks.len() >= rule.min_blank_count {
        if let Some(sd) = std_dev(&blanks, rule.std_dev) {
            return MdlSource::Blanks {
                count: blanks.len(),
                value: rule.blank_multiplier * sd,
            };
        }
    }

    values
        .iter()
        .filter_map(Cell::detected)
        .filter(|v| *v > 0.0)
        .min_by(f64::total_cmp)
        .map(|min| MdlSource::PositiveMinimum {
            value: rule.fallback_fraction * min,
        })
        .unwrap_or(MdlSource::Unresolved)
}

fn std_dev(values: &[f64], convention: StdDevConvention) -> Option<f64> {
    let n = values.len();
    let denominator = match convention {
        StdDevConvention::Population if n > 0 => n as f64,
        StdDevConvention::Sample if n > 1 => (n - 1) as f64,
        _ => return None,
    };
    let mean = values.iter().sum::<f64>() / n as f64;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((sum_sq / denominator).sqrt())
}
