//! Shared helpers for the NAPS download and loading steps

use chrono::{Duration, NaiveDate};

/// Convert an Excel date serial number to a date
///
/// Excel counts days from 1899-12-30 (this absorbs Excel's 1900 leap-year bug).
///
/// ```
/// use naps_pmf_prep::utils::excel_serial_to_date;
/// use chrono::NaiveDate;
///
/// assert_eq!(excel_serial_to_date(44929.0), NaiveDate::from_ymd_opt(2023, 1, 3));
/// ```
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// File name to store a downloaded file under
///
/// Open-data portal links carry the file path URL-encoded in the query
/// string, so the last `%2F`-separated segment is preferred. Plain URLs fall
/// back to their last path segment.
///
/// ```
/// use naps_pmf_prep::utils::file_name_from_url;
///
/// assert_eq!(
///     file_name_from_url("https://data.example.ca/download?path=%2Fdata%2FS100119_PM25_2023_EN.zip"),
///     Some("S100119_PM25_2023_EN.zip".to_string())
/// );
/// assert_eq!(
///     file_name_from_url("https://example.org/files/Stations.xlsx"),
///     Some("Stations.xlsx".to_string())
/// );
/// ```
pub fn file_name_from_url(url: &str) -> Option<String> {
    let name = if url.contains("%2F") {
        let tail = url.rsplit("%2F").next()?;
        tail.split('&').next().unwrap_or(tail).trim().to_string()
    } else {
        let parsed = reqwest::Url::parse(url).ok()?;
        parsed
            .path_segments()?
            .filter(|segment| !segment.is_empty())
            .last()?
            .to_string()
    };
    (!name.is_empty()).then_some(name)
}
