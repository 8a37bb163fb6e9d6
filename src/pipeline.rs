use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, instrument};

use crate::clean::{
    convert_micrograms_to_nanograms, drop_flag_columns, fill_missing_mdl,
    normalize_analyte_names, rename_metadata_columns, ImputationOptions, ImputationReport,
    MetadataMapping,
};
use crate::config::{Config, ConfigError, SheetKey};
use crate::importers::downloader::{DataUrlManifest, DownloadError};
use crate::importers::workbook::{
    WorkbookError, WorkbookLoader, INTEGRATED_HEADER_ROW, STATIONS_SHEET,
};
use crate::persist::{write_table_csv, CsvDirectorySink, PersistError};
use crate::split::{export_per_analyte, ExportError, ExportReport, TableSource};
use crate::table::{AnalyteSchema, MeasurementTable, SchemaError};
use crate::utils::file_name_from_url;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Workbook error: {0}")]
    Workbook(#[from] WorkbookError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Persist error: {0}")]
    Persist(#[from] PersistError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("No stations entry in {}", .0.display())]
    NoStationEntry(PathBuf),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub mapping: MetadataMapping,
    pub imputation: ImputationOptions,
    /// Header row of the loaded sheet
    pub header_row: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mapping: MetadataMapping::default(),
            imputation: ImputationOptions::default(),
            header_row: INTEGRATED_HEADER_ROW,
        }
    }
}

/// Table after every cleaning stage, with the schema it was validated against
#[derive(Debug, Clone)]
pub struct CleanedTable {
    pub table: MeasurementTable,
    pub schema: AnalyteSchema,
    pub imputation: ImputationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetReport {
    pub year: i32,
    pub site_id: u32,
    pub sheet: String,
    pub rows: usize,
    pub processed_path: PathBuf,
    pub output_dir: PathBuf,
    pub imputation: ImputationReport,
    pub export: ExportReport,
}

/// Run the cleaning stages on a freshly loaded sheet
///
/// Order: drop flag columns, canonical metadata names, analyte short codes,
/// µg/m³ to ng/m³, MDL imputation.
#[instrument(skip_all, fields(rows = table.row_count(), columns = table.columns().len()))]
pub fn clean_table(
    table: MeasurementTable,
    options: &PipelineOptions,
) -> Result<CleanedTable, SchemaError> {
    let table = drop_flag_columns(table);
    let table = rename_metadata_columns(table, &options.mapping);
    let table = normalize_analyte_names(table);

    let schema = AnalyteSchema::from_table(&table)?;
    info!(
        "Schema: {} analytes, {} with value and MDL",
        schema.analytes().len(),
        schema.complete_analytes().count()
    );

    let table = convert_micrograms_to_nanograms(table, &schema)?;
    let (table, imputation) = fill_missing_mdl(table, &schema, &options.imputation)?;

    Ok(CleanedTable {
        table,
        schema,
        imputation,
    })
}

/// Load one sheet of a site's integrated workbook, clean it and save the
/// wide table to the processed directory
#[instrument(skip(config, options))]
pub fn clean_sheet(
    config: &Config,
    year: i32,
    site_id: u32,
    key: SheetKey,
    options: &PipelineOptions,
) -> Result<(CleanedTable, PathBuf), PipelineError> {
    let sheet_name = config.catalog.sheet_name(year, key)?;

    let loader = WorkbookLoader::new(config.integrated_workbook_path(year, site_id));
    let table = loader.load_sheet(sheet_name, options.header_row)?;

    let cleaned = clean_table(table, options)?;

    let processed_path = config.processed_table_path(year, site_id, key);
    write_table_csv(&cleaned.table, &processed_path)?;
    info!("Saved cleaned table to {}", processed_path.display());

    Ok((cleaned, processed_path))
}

/// Export per-analyte PMF inputs of one site and sheet
///
/// Reads the table saved by [`clean_sheet`] unless `table` is given.
#[instrument(skip(config, table))]
pub fn export_sheet(
    config: &Config,
    year: i32,
    site_id: u32,
    key: SheetKey,
    table: Option<MeasurementTable>,
) -> Result<ExportReport, PipelineError> {
    let source = match table {
        Some(table) => TableSource::Loaded(table),
        None => TableSource::Csv(config.processed_table_path(year, site_id, key)),
    };
    let sink = CsvDirectorySink::new(config.pmf_output_dir(year, site_id))?;
    Ok(export_per_analyte(source, &sink, &format!("{}_", key.as_str()))?)
}

/// Clean, persist and export one sheet
pub fn prepare_sheet(
    config: &Config,
    year: i32,
    site_id: u32,
    key: SheetKey,
    options: &PipelineOptions,
) -> Result<SheetReport, PipelineError> {
    let (cleaned, processed_path) = clean_sheet(config, year, site_id, key, options)?;
    let rows = cleaned.table.row_count();
    let export = export_sheet(config, year, site_id, key, Some(cleaned.table))?;

    Ok(SheetReport {
        year,
        site_id,
        sheet: key.as_str().to_string(),
        rows,
        processed_path,
        output_dir: config.pmf_output_dir(year, site_id),
        imputation: cleaned.imputation,
        export,
    })
}

/// Load the NAPS stations table from the metadata directory
///
/// The workbook name comes from the manifest's stations link, so the file
/// must already have been fetched with `download --target meta`.
#[instrument(skip(config))]
pub fn load_station_data(config: &Config) -> Result<MeasurementTable, PipelineError> {
    let manifest = DataUrlManifest::from_path(&config.data_urls_file)?;
    let entry = manifest
        .station()
        .ok_or_else(|| PipelineError::NoStationEntry(config.data_urls_file.clone()))?;
    let file_name = file_name_from_url(&entry.url)
        .ok_or_else(|| DownloadError::InvalidUrl(entry.url.clone()))?;

    let path = config.raw_meta_dir.join(file_name);
    let table = WorkbookLoader::new(&path).load_stations(STATIONS_SHEET)?;
    info!("Loaded {} stations from {}", table.row_count(), path.display());

    Ok(table)
}
