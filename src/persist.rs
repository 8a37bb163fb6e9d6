use chrono::NaiveDate;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::split::AnalyteSeries;
use crate::table::{Cell, Column, ColumnData, MeasurementTable, TableError, SAMPLING_DATE};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Header of the date column in per-analyte PMF input files
pub const SERIES_DATE_HEADER: &str = "Date";

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid date '{value}' in column {column}")]
    InvalidDate { column: String, value: String },

    #[error("Malformed table: {0}")]
    Table(#[from] TableError),
}

/// Destination for finished per-analyte series
pub trait AnalyteSink {
    fn write(&self, name: &str, series: &AnalyteSeries) -> Result<(), PersistError>;
}

/// Writes each series to `<dir>/<name>.csv`
#[derive(Debug, Clone)]
pub struct CsvDirectorySink {
    dir: PathBuf,
}

impl CsvDirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.csv"))
    }
}

impl AnalyteSink for CsvDirectorySink {
    fn write(&self, name: &str, series: &AnalyteSeries) -> Result<(), PersistError> {
        let path = self.path_for(name);
        write_atomically(&path, |out| {
            let mut writer = csv::Writer::from_writer(out);
            writer.write_record([
                SERIES_DATE_HEADER.to_string(),
                series.code.clone(),
                series.mdl_column_name(),
            ])?;
            for row in &series.rows {
                writer.write_record([
                    format_date(row.date),
                    row.value.to_string(),
                    row.mdl.to_string(),
                ])?;
            }
            writer.flush()?;
            Ok(())
        })?;
        debug!("Wrote {} rows to {}", series.rows.len(), path.display());
        Ok(())
    }
}

/// Write a whole table as CSV; invalid cells become `-999`, unknown cells empty
pub fn write_table_csv(table: &MeasurementTable, path: &Path) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_atomically(path, |out| {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(table.column_names())?;
        for row in 0..table.row_count() {
            writer.write_record(table.columns().iter().map(|c| field(&c.data, row)))?;
        }
        writer.flush()?;
        Ok(())
    })?;
    debug!(
        "Wrote table with {} rows, {} columns to {}",
        table.row_count(),
        table.columns().len(),
        path.display()
    );
    Ok(())
}

/// Read a table written by [`write_table_csv`]
///
/// `sampling_date` is parsed as dates. Columns whose every non-empty field
/// is numeric become measurements, everything else text.
pub fn read_table_csv(path: &Path) -> Result<MeasurementTable, PersistError> {
    let mut reader = csv::ReaderBuilder::new().flexible(false).from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        for (column, field) in raw.iter_mut().zip(record.iter()) {
            column.push(field.to_string());
        }
    }

    let columns = headers
        .into_iter()
        .zip(raw)
        .map(|(name, fields)| {
            let data = if name == SAMPLING_DATE {
                ColumnData::Dates(parse_dates(&name, &fields)?)
            } else {
                infer_column(&fields)
            };
            Ok(Column::new(name, data))
        })
        .collect::<Result<Vec<_>, PersistError>>()?;

    Ok(MeasurementTable::new(columns)?)
}

fn infer_column(fields: &[String]) -> ColumnData {
    let cells: Option<Vec<Cell>> = fields.iter().map(|f| Cell::parse(f)).collect();
    match cells {
        Some(cells) => ColumnData::Measurements(cells),
        None => ColumnData::Text(
            fields
                .iter()
                .map(|f| (!f.trim().is_empty()).then(|| f.clone()))
                .collect(),
        ),
    }
}

fn parse_dates(column: &str, fields: &[String]) -> Result<Vec<Option<NaiveDate>>, PersistError> {
    fields
        .iter()
        .map(|f| {
            let trimmed = f.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            // Accept a trailing time part, e.g. "2023-01-03 00:00:00"
            let date_part = trimmed.split([' ', 'T']).next().unwrap_or(trimmed);
            NaiveDate::parse_from_str(date_part, DATE_FORMAT)
                .map(Some)
                .map_err(|_| PersistError::InvalidDate {
                    column: column.to_string(),
                    value: f.clone(),
                })
        })
        .collect()
}

fn field(data: &ColumnData, row: usize) -> String {
    match data {
        ColumnData::Measurements(cells) => cells[row].to_string(),
        ColumnData::Text(values) => values[row].clone().unwrap_or_default(),
        ColumnData::Dates(dates) => format_date(dates[row]),
    }
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Write through a temp file in the target directory, then rename into place
///
/// The destination only appears once `fill` has succeeded.
fn write_atomically(
    path: &Path,
    fill: impl FnOnce(&mut fs::File) -> Result<(), PersistError>,
) -> Result<(), PersistError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
    fill(temp_file.as_file_mut())?;
    temp_file.as_file_mut().flush()?;
    temp_file.persist(path).map_err(|e| PersistError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::SeriesRow;
    use crate::table::SAMPLING_TYPE;

    #[test]
    fn test_infer_column_kinds() {
        let numeric = infer_column(&["1.5".to_string(), String::new(), "-999".to_string()]);
        assert_eq!(
            numeric,
            ColumnData::Measurements(vec![Cell::Detected(1.5), Cell::Unknown, Cell::Invalid])
        );

        let text = infer_column(&["R".to_string(), String::new()]);
        assert_eq!(text, ColumnData::Text(vec![Some("R".to_string()), None]));
    }

    #[test]
    fn test_table_written_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("clean.csv");
        let table = MeasurementTable::new(vec![
            Column::dates(
                SAMPLING_DATE,
                vec![NaiveDate::from_ymd_opt(2023, 1, 3), None],
            ),
            Column::text(SAMPLING_TYPE, vec![Some("R"), Some("FB")]),
            Column::measurements("Na", vec![Cell::Detected(250.0), Cell::Invalid]),
            Column::measurements("Na-MDL", vec![Cell::Unknown, Cell::Detected(0.125)]),
        ])
        .unwrap();

        write_table_csv(&table, &path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("sampling_date,sampling_type,Na,Na-MDL\n"));
        assert!(contents.contains("2023-01-03,R,250,\n"));
        assert!(contents.contains(",FB,-999,0.125\n"));

        assert_eq!(read_table_csv(&path).unwrap(), table);
    }

    #[test]
    fn test_invalid_sampling_date_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "sampling_date,Na\nnot-a-date,1\n").unwrap();
        assert!(matches!(
            read_table_csv(&path),
            Err(PersistError::InvalidDate { .. })
        ));
    }

    #[test]
    fn test_sink_writes_pmf_layout() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvDirectorySink::new(dir.path().join("pmf")).unwrap();
        let series = AnalyteSeries {
            code: "Na".to_string(),
            rows: vec![
                SeriesRow {
                    date: NaiveDate::from_ymd_opt(2023, 1, 3),
                    value: Cell::Detected(12.5),
                    mdl: Cell::Invalid,
                },
                SeriesRow {
                    date: NaiveDate::from_ymd_opt(2023, 1, 6),
                    value: Cell::Unknown,
                    mdl: Cell::Detected(0.2),
                },
            ],
        };

        sink.write("nt_Na", &series).unwrap();
        let contents = fs::read_to_string(sink.path_for("nt_Na")).unwrap();
        assert_eq!(
            contents,
            "Date,Na,Na-MDL\n2023-01-03,12.5,-999\n2023-01-06,,0.2\n"
        );
    }
}
