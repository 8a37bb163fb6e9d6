// ! Importers for NAPS open-data downloads and integrated PM2.5 workbooks

pub mod downloader;
pub mod workbook;

// Re-export commonly used items
pub use downloader::{DataUrlEntry, DataUrlManifest, DownloadError, DownloadSummary, NapsDownloader};
pub use workbook::{WorkbookError, WorkbookLoader, INTEGRATED_HEADER_ROW, STATIONS_SHEET};
