use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Unknown sheet key '{0}' (expected nt, ws, ion, bbm or pm25)")]
    UnknownSheetKey(String),

    #[error("Sheet key '{key}' not available for {year}")]
    SheetUnavailable { year: i32, key: SheetKey },
}

/// Runtime configuration, built once and passed to the pipeline
#[derive(Debug, Clone)]
pub struct Config {
    pub raw_data_dir: PathBuf,
    pub raw_meta_dir: PathBuf,
    pub raw_integrated_data_dir: PathBuf,
    pub processed_data_dir: PathBuf,
    pub pmf_input_data_dir: PathBuf,
    pub data_urls_file: PathBuf,
    pub download_concurrency: usize,
    pub download_timeout_secs: u64,
    pub catalog: SheetCatalog,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            raw_data_dir: path_var("RAW_DATA_DIR", "data/raw"),
            raw_meta_dir: path_var("RAW_META_DIR", "data/meta"),
            raw_integrated_data_dir: path_var("RAW_INTEGRATED_DATA_DIR", "data/raw/integrated"),
            processed_data_dir: path_var("PROCESSED_DATA_DIR", "data/processed/integrated"),
            pmf_input_data_dir: path_var("PMF_INPUT_DATA_DIR", "data/processed/pmf"),
            data_urls_file: path_var("DATA_URLS_FILE", "data/config/data_urls.csv"),
            download_concurrency: parse_var("DOWNLOAD_CONCURRENCY", 4)?,
            download_timeout_secs: parse_var("DOWNLOAD_TIMEOUT_SECS", 30)?,
            catalog: SheetCatalog::default(),
        })
    }

    /// `<integrated>/<year>_IntegratedPM2.5-PM2.5Ponctuelles/S<site>_PM25_<year>_EN.xlsx`
    pub fn integrated_workbook_path(&self, year: i32, site_id: u32) -> PathBuf {
        self.raw_integrated_data_dir
            .join(format!("{year}_IntegratedPM2.5-PM2.5Ponctuelles"))
            .join(format!("S{site_id}_PM25_{year}_EN.xlsx"))
    }

    /// Cleaned wide table for one sheet
    pub fn processed_table_path(&self, year: i32, site_id: u32, key: SheetKey) -> PathBuf {
        self.processed_data_dir
            .join(format!("{year}_S{site_id}_{}.csv", key.as_str()))
    }

    /// Directory receiving the per-analyte PMF inputs of one site and year
    pub fn pmf_output_dir(&self, year: i32, site_id: u32) -> PathBuf {
        self.pmf_input_data_dir.join(format!("{year}_S{site_id}"))
    }
}

fn path_var(name: &str, default: &str) -> PathBuf {
    env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

/// Worksheet of a NAPS integrated PM2.5 workbook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SheetKey {
    /// Near-total metals
    Nt,
    /// Water-soluble metals
    Ws,
    Ion,
    /// Biomass burning markers
    Bbm,
    /// Gravimetric PM2.5 mass
    Pm25,
}

impl SheetKey {
    pub const ALL: [SheetKey; 5] = [
        SheetKey::Nt,
        SheetKey::Ws,
        SheetKey::Ion,
        SheetKey::Bbm,
        SheetKey::Pm25,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SheetKey::Nt => "nt",
            SheetKey::Ws => "ws",
            SheetKey::Ion => "ion",
            SheetKey::Bbm => "bbm",
            SheetKey::Pm25 => "pm25",
        }
    }

    /// Sheet title inside the workbook
    pub fn sheet_name(&self) -> &'static str {
        match self {
            SheetKey::Nt => "Metals_ICPMS (Near-Total)",
            SheetKey::Ws => "Metals_ICPMS (Water-Soluble)",
            SheetKey::Ion => "Ions-Spec_IC",
            SheetKey::Bbm => "Biomass Burning Markers_IC",
            SheetKey::Pm25 => "PM2.5",
        }
    }
}

impl fmt::Display for SheetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SheetKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SheetKey::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownSheetKey(s.to_string()))
    }
}

/// Which speciation sheets each year's workbook carries
///
/// The PM2.5 mass sheet is present every year and is not listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetCatalog {
    years: BTreeMap<i32, Vec<SheetKey>>,
}

impl SheetCatalog {
    pub fn new(years: impl IntoIterator<Item = (i32, Vec<SheetKey>)>) -> Self {
        Self {
            years: years.into_iter().collect(),
        }
    }

    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.years.keys().copied()
    }

    /// Speciation sheets for `year`; empty for years not in the catalog
    pub fn sheets_for_year(&self, year: i32) -> &[SheetKey] {
        self.years.get(&year).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sheet_name(&self, year: i32, key: SheetKey) -> Result<&'static str, ConfigError> {
        if key == SheetKey::Pm25 || self.sheets_for_year(year).contains(&key) {
            Ok(key.sheet_name())
        } else {
            Err(ConfigError::SheetUnavailable { year, key })
        }
    }
}

impl Default for SheetCatalog {
    fn default() -> Self {
        use SheetKey::{Bbm, Ion, Nt, Ws};
        Self::new([
            (2020, vec![Nt, Ws, Ion, Bbm]),
            (2021, vec![Nt]),
            (2022, vec![Nt]),
            (2023, vec![Nt, Ws, Ion, Bbm]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = SheetCatalog::default();
        assert_eq!(catalog.sheets_for_year(2021), &[SheetKey::Nt]);
        assert_eq!(catalog.sheets_for_year(2023).len(), 4);
        assert!(catalog.sheets_for_year(1999).is_empty());
        assert_eq!(catalog.years().collect::<Vec<_>>(), vec![2020, 2021, 2022, 2023]);
    }

    #[test]
    fn test_sheet_name_lookup() {
        let catalog = SheetCatalog::default();
        assert_eq!(
            catalog.sheet_name(2023, SheetKey::Ion).unwrap(),
            "Ions-Spec_IC"
        );
        assert_eq!(catalog.sheet_name(2021, SheetKey::Pm25).unwrap(), "PM2.5");
    }

    #[test]
    fn test_unavailable_sheet_fails_fast() {
        let catalog = SheetCatalog::default();
        match catalog.sheet_name(2021, SheetKey::Ws) {
            Err(ConfigError::SheetUnavailable { year, key }) => {
                assert_eq!(year, 2021);
                assert_eq!(key, SheetKey::Ws);
            }
            other => panic!("Expected SheetUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_sheet_key_parsing() {
        assert_eq!("nt".parse::<SheetKey>().unwrap(), SheetKey::Nt);
        assert_eq!("BBM".parse::<SheetKey>().unwrap(), SheetKey::Bbm);
        assert!(matches!(
            "xyz".parse::<SheetKey>(),
            Err(ConfigError::UnknownSheetKey(_))
        ));
    }

    #[test]
    fn test_workbook_path_layout() {
        let mut config = Config::from_env().unwrap();
        config.raw_integrated_data_dir = PathBuf::from("raw/integrated");
        assert_eq!(
            config.integrated_workbook_path(2023, 100119),
            PathBuf::from(
                "raw/integrated/2023_IntegratedPM2.5-PM2.5Ponctuelles/S100119_PM25_2023_EN.xlsx"
            )
        );
    }
}
