// Tests for WorkbookLoader and the full sheet pipeline
// Uses tests/fixtures/S100119_PM25_2023_EN.xlsx (near-total metals sheet with a NAPS-style preamble)
// and tests/fixtures/StationsNAPS2023.xlsx (bilingual stations header)

use chrono::NaiveDate;
use naps_pmf_prep::config::{Config, SheetCatalog, SheetKey};
use naps_pmf_prep::importers::workbook::{WorkbookError, WorkbookLoader, INTEGRATED_HEADER_ROW};
use naps_pmf_prep::pipeline::{
    export_sheet, load_station_data, prepare_sheet, PipelineError, PipelineOptions,
};
use naps_pmf_prep::table::{Cell, ColumnData};
use std::path::{Path, PathBuf};

const FIXTURE: &str = "tests/fixtures/S100119_PM25_2023_EN.xlsx";
const STATIONS_FIXTURE: &str = "tests/fixtures/StationsNAPS2023.xlsx";
const NEAR_TOTAL: &str = "Metals_ICPMS (Near-Total)";

#[test]
fn test_workbook_not_found() {
    let loader = WorkbookLoader::new("/nonexistent/path/to/file.xlsx");
    let result = loader.load_sheet(NEAR_TOTAL, INTEGRATED_HEADER_ROW);

    match result.unwrap_err() {
        WorkbookError::Open(msg) => assert!(!msg.is_empty()),
        other => panic!("Expected Open error, got {other:?}"),
    }
}

#[test]
fn test_sheet_not_found() {
    let loader = WorkbookLoader::new(FIXTURE);
    let result = loader.load_sheet("NONEXISTENT_SHEET", INTEGRATED_HEADER_ROW);

    match result.unwrap_err() {
        WorkbookError::SheetNotFound(sheet) => assert_eq!(sheet, "NONEXISTENT_SHEET"),
        other => panic!("Expected SheetNotFound error, got {other:?}"),
    }
}

#[test]
fn test_load_sheet_below_preamble() {
    let loader = WorkbookLoader::new(FIXTURE);
    let table = loader.load_sheet(NEAR_TOTAL, INTEGRATED_HEADER_ROW).unwrap();

    assert_eq!(table.row_count(), 4);
    assert_eq!(
        table.column_names().collect::<Vec<_>>(),
        vec![
            "NAPS Site ID",
            "Sampling Date",
            "Sampling Type",
            "Lead (Pb)",
            "Pb-MDL",
            "Pb-VFlag",
            "Zinc (Zn)",
            "Zn-MDL",
            "Zn-VFlag",
        ]
    );

    assert_eq!(
        table.column("Sampling Date").unwrap().data,
        ColumnData::Dates(
            [3, 6, 9, 12]
                .iter()
                .map(|d| NaiveDate::from_ymd_opt(2023, 1, *d))
                .collect()
        )
    );
    assert_eq!(
        table.column("Lead (Pb)").unwrap().data,
        ColumnData::Measurements(vec![
            Cell::Detected(0.002),
            Cell::Invalid,
            Cell::Detected(0.001),
            Cell::Unknown,
        ])
    );
    assert_eq!(
        table.column("Zn-MDL").unwrap().data,
        ColumnData::Measurements(vec![Cell::Unknown; 4])
    );
}

fn install_fixture(root: &Path) -> Config {
    let config = Config {
        raw_data_dir: root.join("raw"),
        raw_meta_dir: root.join("meta"),
        raw_integrated_data_dir: root.join("raw/integrated"),
        processed_data_dir: root.join("processed"),
        pmf_input_data_dir: root.join("pmf"),
        data_urls_file: root.join("data_urls.csv"),
        download_concurrency: 1,
        download_timeout_secs: 5,
        catalog: SheetCatalog::default(),
    };
    let target = config.integrated_workbook_path(2023, 100119);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::copy(FIXTURE, &target).unwrap();
    config
}

#[test]
fn test_prepare_sheet_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = install_fixture(dir.path());

    let report =
        prepare_sheet(&config, 2023, 100119, SheetKey::Nt, &PipelineOptions::default()).unwrap();

    assert_eq!(report.rows, 4);
    assert_eq!(report.processed_path, dir.path().join("processed/2023_S100119_nt.csv"));
    assert_eq!(report.export.exported, vec!["Pb".to_string(), "Zn".to_string()]);

    let processed = std::fs::read_to_string(&report.processed_path).unwrap();
    assert!(processed.starts_with("site_id,sampling_date,sampling_type,Pb,Pb-MDL,Zn,Zn-MDL\n"));
    assert!(!processed.contains("VFlag"));
    // numeric site_id is scaled along with the analytes
    assert!(processed.contains("\n100119000,2023-01-03,"));

    let pmf_dir: PathBuf = dir.path().join("pmf/2023_S100119");
    let lead = std::fs::read_to_string(pmf_dir.join("nt_Pb.csv")).unwrap();
    assert_eq!(
        lead,
        "Date,Pb,Pb-MDL\n2023-01-03,2,0.5\n2023-01-06,-999,-999\n2023-01-12,,0.5\n"
    );

    let zinc = std::fs::read_to_string(pmf_dir.join("nt_Zn.csv")).unwrap();
    assert_eq!(
        zinc,
        "Date,Zn,Zn-MDL\n2023-01-03,500,62.5\n2023-01-06,250,62.5\n2023-01-12,,62.5\n"
    );
}

#[test]
fn test_export_sheet_reads_processed_table() {
    let dir = tempfile::tempdir().unwrap();
    let config = install_fixture(dir.path());

    prepare_sheet(&config, 2023, 100119, SheetKey::Nt, &PipelineOptions::default()).unwrap();
    let pmf_dir = config.pmf_output_dir(2023, 100119);
    std::fs::remove_dir_all(&pmf_dir).unwrap();

    let report = export_sheet(&config, 2023, 100119, SheetKey::Nt, None).unwrap();
    assert_eq!(report.exported_count(), 2);
    assert!(pmf_dir.join("nt_Pb.csv").exists());
    assert!(pmf_dir.join("nt_Zn.csv").exists());
}

fn write_manifest(config: &Config, rows: &str) {
    std::fs::write(
        &config.data_urls_file,
        format!("type,description,url,notes\n{rows}"),
    )
    .unwrap();
}

#[test]
fn test_load_station_data_from_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let config = install_fixture(dir.path());
    write_manifest(
        &config,
        "meta,Sampling schedule,https://data.example.ca/dl?path=%2Fdata%2FSchedule2023.csv,\n\
         meta,Stations list,https://data.example.ca/dl?path=%2Fdata%2FStationsNAPS2023.xlsx&lang=en,\n",
    );
    std::fs::create_dir_all(&config.raw_meta_dir).unwrap();
    std::fs::copy(
        STATIONS_FIXTURE,
        config.raw_meta_dir.join("StationsNAPS2023.xlsx"),
    )
    .unwrap();

    let stations = load_station_data(&config).unwrap();

    // French header row is skipped
    assert_eq!(stations.row_count(), 2);
    assert_eq!(
        stations.column_names().collect::<Vec<_>>(),
        vec!["NAPS_ID", "Station_Name", "City", "Province", "Latitude", "Longitude"]
    );
    assert_eq!(
        stations.column("NAPS_ID").unwrap().data,
        ColumnData::Measurements(vec![Cell::Detected(100119.0), Cell::Detected(60438.0)])
    );
    assert_eq!(
        stations.column("Station_Name").unwrap().data,
        ColumnData::Text(vec![
            Some("Burnaby South".to_string()),
            Some("Toronto West".to_string()),
        ])
    );
}

#[test]
fn test_load_station_data_without_station_entry() {
    let dir = tempfile::tempdir().unwrap();
    let config = install_fixture(dir.path());
    write_manifest(
        &config,
        "integrated,PM2.5,https://data.example.ca/S100119_PM25_2023_EN.zip,\n",
    );

    match load_station_data(&config).unwrap_err() {
        PipelineError::NoStationEntry(path) => assert_eq!(path, config.data_urls_file),
        other => panic!("Expected NoStationEntry error, got {other:?}"),
    }
}

#[test]
fn test_load_station_data_before_download() {
    let dir = tempfile::tempdir().unwrap();
    let config = install_fixture(dir.path());
    write_manifest(
        &config,
        "meta,Stations list,https://data.example.ca/dl?path=%2Fdata%2FStationsNAPS2023.xlsx,\n",
    );

    assert!(matches!(
        load_station_data(&config),
        Err(PipelineError::Workbook(WorkbookError::Open(_)))
    ));
}
