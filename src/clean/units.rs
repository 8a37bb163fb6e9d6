use tracing::debug;

use crate::table::{AnalyteSchema, Cell, ColumnData, MeasurementTable, SchemaError};

pub const MICROGRAMS_TO_NANOGRAMS: f64 = 1000.0;

/// Rescale every numeric column from µg/m³ to ng/m³
///
/// Only `Detected` cells are multiplied; invalid and unknown cells pass
/// through. Every `Measurements` column is scaled, a numeric `site_id`
/// included. Applying this twice scales twice, so the pipeline calls it
/// exactly once.
pub fn convert_micrograms_to_nanograms(
    mut table: MeasurementTable,
    schema: &AnalyteSchema,
) -> Result<MeasurementTable, SchemaError> {
    schema.ensure_matches(&table)?;

    let mut converted = 0usize;
    for index in 0..table.columns().len() {
        if let ColumnData::Measurements(cells) = &mut table.column_at_mut(index).data {
            for cell in cells.iter_mut() {
                *cell = micrograms_to_nanograms(*cell);
            }
            converted += 1;
        }
    }

    debug!("Converted {} columns from ug/m3 to ng/m3", converted);
    Ok(table)
}

pub fn micrograms_to_nanograms(cell: Cell) -> Cell {
    cell.map_detected(|v| v * MICROGRAMS_TO_NANOGRAMS)
}
