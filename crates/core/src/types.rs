//! Typed result cells and rows shared by the engine and its callers.

use serde::{Deserialize, Serialize};

use crate::error::{AttributionError, AttributionResult};

/// Sentinel carried by any marketing field that was absent in the source row.
pub const PROPERTY_VALUE_NONE: &str = "$none";
/// Display value used for identity cells of the all-zero placeholder row.
pub const NONE_DISPLAY: &str = "none";
/// Separator for composite attribution keys.
pub const KEY_DELIMITER: &str = ":-:";
pub const SECS_IN_A_DAY: i64 = 86_400;
/// Decimal places kept on every derived ratio.
pub const DEFAULT_PRECISION: i32 = 2;

/// True when the value carries information, i.e. is neither empty nor the
/// "none" sentinel.
pub fn is_non_empty_key(value: &str) -> bool {
    !value.is_empty() && value != PROPERTY_VALUE_NONE
}

/// Round to `precision` decimal places, mapping non-finite input to 0.
pub fn round_with_precision(value: f64, precision: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(precision);
    (value * factor).round() / factor
}

// ─── Cells ──────────────────────────────────────────────────────────────────

/// One typed column value. Timestamps are unix seconds and serialize as
/// plain integers, so they decode back as `Int`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Null,
    Int,
    Float,
    Str,
    Timestamp,
}

impl Cell {
    pub fn str(value: impl Into<String>) -> Self {
        Cell::Str(value.into())
    }

    pub fn kind(&self) -> CellKind {
        match self {
            Cell::Null => CellKind::Null,
            Cell::Int(_) => CellKind::Int,
            Cell::Float(_) => CellKind::Float,
            Cell::Str(_) => CellKind::Str,
            Cell::Timestamp(_) => CellKind::Timestamp,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) | Cell::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view used for sorting and float counters. Integers widen.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(v) => Some(*v),
            Cell::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Nullable string column: NULL becomes the "none" sentinel, an empty
    /// string stays empty.
    pub fn to_property(&self, column: usize) -> AttributionResult<String> {
        match self {
            Cell::Null => Ok(PROPERTY_VALUE_NONE.to_string()),
            Cell::Str(s) => Ok(s.clone()),
            other => Err(AttributionError::RowParse {
                column,
                reason: format!("expected string, found {:?}", other.kind()),
            }),
        }
    }

    /// Nullable timestamp column: NULL becomes 0. Integer-valued floats
    /// are accepted since JSON decoders cannot tell them apart.
    pub fn to_timestamp(&self, column: usize) -> AttributionResult<i64> {
        match self {
            Cell::Null => Ok(0),
            Cell::Int(v) | Cell::Timestamp(v) => Ok(*v),
            Cell::Float(v) if v.fract() == 0.0 && v.is_finite() => Ok(*v as i64),
            other => Err(AttributionError::RowParse {
                column,
                reason: format!("expected timestamp, found {:?}", other.kind()),
            }),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Str(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Str(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

pub type Row = Vec<Cell>;

// ─── Results ────────────────────────────────────────────────────────────────

/// Header array plus row matrix handed to the result sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_with_precision() {
        assert_eq!(round_with_precision(100.0 * 8.0 / 150.0, 2), 5.33);
        assert_eq!(round_with_precision(100.0 * 40.0 / 300.0, 2), 13.33);
        assert_eq!(round_with_precision(f64::NAN, 2), 0.0);
        assert_eq!(round_with_precision(f64::INFINITY, 2), 0.0);
    }

    #[test]
    fn test_null_property_maps_to_none_sentinel() {
        assert_eq!(Cell::Null.to_property(0).unwrap(), PROPERTY_VALUE_NONE);
        assert_eq!(Cell::str("").to_property(0).unwrap(), "");
        assert!(Cell::Int(3).to_property(2).is_err());
    }

    #[test]
    fn test_timestamp_cell_parsing() {
        assert_eq!(Cell::Null.to_timestamp(0).unwrap(), 0);
        assert_eq!(Cell::Int(1_700_000_000).to_timestamp(0).unwrap(), 1_700_000_000);
        assert_eq!(Cell::Float(42.0).to_timestamp(0).unwrap(), 42);
        assert!(Cell::Float(1.5).to_timestamp(0).is_err());
        assert!(Cell::str("yesterday").to_timestamp(0).is_err());
    }

    #[test]
    fn test_cells_deserialize_untagged() {
        let row: Row = serde_json::from_str(r#"["u1", null, 5, 2.5]"#).unwrap();
        assert_eq!(
            row,
            vec![Cell::str("u1"), Cell::Null, Cell::Int(5), Cell::Float(2.5)]
        );
    }

    #[test]
    fn test_is_non_empty_key() {
        assert!(is_non_empty_key("brand"));
        assert!(!is_non_empty_key(""));
        assert!(!is_non_empty_key(PROPERTY_VALUE_NONE));
    }
}
