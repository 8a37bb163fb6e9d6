use std::fmt;

/// Numeric literal NAPS files use for "not applicable / invalid"
pub const INVALID_SENTINEL: f64 = -999.0;

/// A single concentration or detection-limit cell
///
/// NAPS spreadsheets store two different kinds of "no measurement" in the
/// same float column: an empty cell (unknown) and the literal `-999`
/// (explicitly invalid). They are kept apart here so that arithmetic on
/// `Detected` values can never touch an invalid cell by accident.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Cell {
    /// Absent or NaN in the source
    #[default]
    Unknown,
    /// `-999` in the source
    Invalid,
    Detected(f64),
}

impl Cell {
    /// Classify a raw float read from a file
    pub fn from_raw(value: f64) -> Self {
        if value.is_nan() {
            Cell::Unknown
        } else if value == INVALID_SENTINEL {
            Cell::Invalid
        } else {
            Cell::Detected(value)
        }
    }

    /// Parse a text field; empty and `NaN`-like text is unknown
    pub fn parse(field: &str) -> Option<Self> {
        let trimmed = field.trim();
        if trimmed.is_empty()
            || trimmed.eq_ignore_ascii_case("nan")
            || trimmed.eq_ignore_ascii_case("n/a")
        {
            return Some(Cell::Unknown);
        }
        trimmed.parse::<f64>().ok().map(Cell::from_raw)
    }

    /// Back to the on-disk float representation (`-999` for invalid)
    pub fn to_raw(self) -> Option<f64> {
        match self {
            Cell::Unknown => None,
            Cell::Invalid => Some(INVALID_SENTINEL),
            Cell::Detected(v) => Some(v),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Cell::Unknown)
    }

    pub fn detected(&self) -> Option<f64> {
        match self {
            Cell::Detected(v) => Some(*v),
            _ => None,
        }
    }

    /// Apply `f` to a detected value; unknown and invalid pass through
    pub fn map_detected(self, f: impl FnOnce(f64) -> f64) -> Self {
        match self {
            Cell::Detected(v) => Cell::Detected(f(v)),
            other => other,
        }
    }
}

/// Renders the CSV field: empty for unknown, `-999` for invalid
impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Unknown => Ok(()),
            Cell::Invalid => write!(f, "{INVALID_SENTINEL}"),
            Cell::Detected(v) => write!(f, "{v}"),
        }
    }
}
