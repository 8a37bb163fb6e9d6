use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

use crate::table::{
    MeasurementTable, FLAG_SUFFIX, MDL_SUFFIX, SAMPLING_DATE, SAMPLING_TYPE, SITE_ID,
};

/// First parenthesized group of a header, e.g. `Na` in `Sodium (Na)`
static ANALYTE_CODE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\(([^)]+)\)").ok());

/// Source header → canonical metadata column name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataMapping {
    renames: HashMap<String, String>,
}

impl MetadataMapping {
    pub fn new<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            renames: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn canonical_name(&self, source: &str) -> Option<&str> {
        self.renames.get(source).map(String::as_str)
    }
}

/// Headers seen across NAPS integrated files; "Sampling Type" and
/// "Sample Type" come from different years and mean the same thing
impl Default for MetadataMapping {
    fn default() -> Self {
        Self::new([
            ("NAPS Site ID", SITE_ID),
            ("Sampling Date", SAMPLING_DATE),
            ("Sampling Type", SAMPLING_TYPE),
            ("Sample Type", SAMPLING_TYPE),
        ])
    }
}

/// Remove every `<code>-VFlag` column
pub fn drop_flag_columns(table: MeasurementTable) -> MeasurementTable {
    let before = table.columns().len();
    let table = table.retain_columns(|c| !c.name.ends_with(FLAG_SUFFIX));
    debug!("Dropped {} flag columns", before - table.columns().len());
    table
}

pub fn rename_metadata_columns(
    table: MeasurementTable,
    mapping: &MetadataMapping,
) -> MeasurementTable {
    table.rename_columns(|name| mapping.canonical_name(name).map(str::to_string))
}

/// Reduce `Label (CODE)` headers to `CODE`; `-MDL` headers are left alone
pub fn normalize_analyte_names(table: MeasurementTable) -> MeasurementTable {
    table.rename_columns(|name| {
        let code = analyte_code(name)?;
        debug!("Renaming column '{}' -> '{}'", name, code);
        Some(code)
    })
}

/// Short code for one header, or `None` when the header stays as is
pub fn analyte_code(header: &str) -> Option<String> {
    if header.ends_with(MDL_SUFFIX) {
        return None;
    }
    ANALYTE_CODE
        .as_ref()?
        .captures(header)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
}
