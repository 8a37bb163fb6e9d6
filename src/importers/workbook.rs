use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use chrono::NaiveDate;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::table::{Cell, Column, ColumnData, MeasurementTable, TableError};
use crate::utils::excel_serial_to_date;

/// Header row (zero-based) of the speciation sheets; rows above it hold
/// a free-text preamble
pub const INTEGRATED_HEADER_ROW: usize = 9;

/// Sheet of the NAPS stations workbook used for site metadata
pub const STATIONS_SHEET: &str = "Stations2023";

#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("Failed to open workbook: {0}")]
    Open(String),

    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    #[error("Sheet {sheet} has no header at row {row}")]
    MissingHeader { sheet: String, row: usize },

    #[error("Malformed table: {0}")]
    Table(#[from] TableError),
}

/// Reads worksheets of NAPS `.xlsx` files into [`MeasurementTable`]s
///
/// Parsing is synchronous; async callers should use `spawn_blocking`.
pub struct WorkbookLoader {
    workbook_path: PathBuf,
}

impl WorkbookLoader {
    pub fn new(workbook_path: impl Into<PathBuf>) -> Self {
        Self {
            workbook_path: workbook_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.workbook_path
    }

    /// Load `sheet_name` with column names taken from `header_row`
    ///
    /// # Expected Sheet Structure:
    /// ```text
    /// Rows 0..header_row: preamble (ignored)
    /// Row header_row:     column headers
    /// Rows below:         one sample per row
    /// ```
    pub fn load_sheet(
        &self,
        sheet_name: &str,
        header_row: usize,
    ) -> Result<MeasurementTable, WorkbookError> {
        self.load(sheet_name, header_row, 0)
    }

    /// Stations sheet: English header on row 0, French header on row 1
    pub fn load_stations(&self, sheet_name: &str) -> Result<MeasurementTable, WorkbookError> {
        self.load(sheet_name, 0, 1)
    }

    fn load(
        &self,
        sheet_name: &str,
        header_row: usize,
        skip_after_header: usize,
    ) -> Result<MeasurementTable, WorkbookError> {
        info!("Loading sheet '{}' from {}", sheet_name, self.workbook_path.display());

        let mut workbook: Xlsx<BufReader<File>> = match open_workbook(&self.workbook_path) {
            Ok(wb) => wb,
            Err(e) => return Err(WorkbookError::Open(e.to_string())),
        };

        let range = match workbook.worksheet_range(sheet_name) {
            Ok(range) => range,
            Err(_) => return Err(WorkbookError::SheetNotFound(sheet_name.to_string())),
        };

        let table = table_from_range(&range, sheet_name, header_row, skip_after_header)?;
        info!(
            "Loaded {} rows, {} columns from sheet '{}'",
            table.row_count(),
            table.columns().len(),
            sheet_name
        );
        Ok(table)
    }
}

/// Build a table from a worksheet range
///
/// Row indices are relative to the range start. Columns with an empty
/// header are ignored and trailing rows with no value at all are dropped.
pub fn table_from_range(
    range: &Range<Data>,
    sheet_name: &str,
    header_row: usize,
    skip_after_header: usize,
) -> Result<MeasurementTable, WorkbookError> {
    let (height, width) = range.get_size();
    if header_row >= height {
        return Err(WorkbookError::MissingHeader {
            sheet: sheet_name.to_string(),
            row: header_row,
        });
    }

    let headers: Vec<(usize, String)> = (0..width)
        .filter_map(|col| {
            header_text(range.get((header_row, col)))
                .map(|name| (col, name))
        })
        .collect();
    if headers.is_empty() {
        return Err(WorkbookError::MissingHeader {
            sheet: sheet_name.to_string(),
            row: header_row,
        });
    }

    let first_data_row = header_row + 1 + skip_after_header;
    let last_data_row = (first_data_row..height)
        .rev()
        .find(|&row| {
            headers
                .iter()
                .any(|(col, _)| !is_blank(range.get((row, *col))))
        })
        .map(|row| row + 1)
        .unwrap_or(first_data_row);

    let columns = headers
        .into_iter()
        .map(|(col, name)| {
            let cells: Vec<Option<&Data>> = (first_data_row..last_data_row)
                .map(|row| range.get((row, col)))
                .collect();
            let data = infer_column(&cells);
            debug!("Column '{}' read as {}", name, data.kind());
            Column::new(name, data)
        })
        .collect();

    Ok(MeasurementTable::new(columns)?)
}

fn header_text(cell: Option<&Data>) -> Option<String> {
    let text = match cell? {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format!("{f}"),
        Data::Empty => return None,
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn is_blank(cell: Option<&Data>) -> bool {
    match cell {
        None | Some(Data::Empty) => true,
        Some(Data::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

/// Pick the column kind from its cells
///
/// Any date cell makes a date column, as does text that is entirely ISO
/// dates. Cells that are all numbers, numeric text or blank make a
/// measurement column; anything else is text.
fn infer_column(cells: &[Option<&Data>]) -> ColumnData {
    let has_date_cell = cells
        .iter()
        .any(|c| matches!(c, Some(Data::DateTime(_)) | Some(Data::DateTimeIso(_))));
    if has_date_cell {
        if let Some(dates) = parse_dates(cells) {
            return ColumnData::Dates(dates);
        }
    }

    if let Some(measurements) = cells
        .iter()
        .map(|c| measurement_cell(*c))
        .collect::<Option<Vec<_>>>()
    {
        return ColumnData::Measurements(measurements);
    }

    if let Some(dates) = parse_dates(cells) {
        return ColumnData::Dates(dates);
    }

    ColumnData::Text(cells.iter().map(|c| text_cell(*c)).collect())
}

fn parse_dates(cells: &[Option<&Data>]) -> Option<Vec<Option<NaiveDate>>> {
    cells.iter().map(|c| date_cell(*c)).collect()
}

fn measurement_cell(cell: Option<&Data>) -> Option<Cell> {
    match cell {
        None | Some(Data::Empty) => Some(Cell::Unknown),
        Some(Data::Float(f)) => Some(Cell::from_raw(*f)),
        Some(Data::Int(i)) => Some(Cell::from_raw(*i as f64)),
        Some(Data::String(s)) => Cell::parse(s),
        Some(Data::Error(_)) => Some(Cell::Unknown),
        _ => None,
    }
}

/// `Some(None)` for blank cells, `None` when the cell is not a date
fn date_cell(cell: Option<&Data>) -> Option<Option<NaiveDate>> {
    match cell {
        None | Some(Data::Empty) => Some(None),
        Some(Data::DateTime(dt)) => Some(dt.as_datetime().map(|d| d.date())),
        Some(Data::DateTimeIso(s)) | Some(Data::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Some(None);
            }
            let date_part = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
            NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                .ok()
                .map(Some)
        }
        Some(Data::Float(f)) => Some(excel_serial_to_date(*f)),
        Some(Data::Int(i)) => Some(excel_serial_to_date(*i as f64)),
        _ => None,
    }
}

fn text_cell(cell: Option<&Data>) -> Option<String> {
    match cell? {
        Data::Empty => None,
        Data::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        // Integral numbers in text columns are identifiers (site IDs, codes)
        Data::Float(f) if f.fract() == 0.0 => Some(format!("{f:.0}")),
        other => Some(other.to_string()),
    }
}
