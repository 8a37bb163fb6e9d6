// Cleaning stages applied to a loaded speciation sheet, in pipeline order:
// column normalization, unit conversion, MDL imputation.

pub mod columns;
pub mod mdl;
pub mod units;

pub use columns::{
    drop_flag_columns, normalize_analyte_names, rename_metadata_columns, MetadataMapping,
};
pub use mdl::{
    fill_missing_mdl, ImputationOptions, ImputationReport, MdlRule, MdlSource, StdDevConvention,
};
pub use units::convert_micrograms_to_nanograms;
