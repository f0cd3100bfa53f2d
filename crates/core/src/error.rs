use thiserror::Error;

pub type AttributionResult<T> = Result<T, AttributionError>;

#[derive(Error, Debug)]
pub enum AttributionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid attribution query: {0}")]
    InvalidQuery(String),

    #[error("Row cursor error: {0}")]
    Cursor(String),

    #[error("Row parse error at column {column}: {reason}")]
    RowParse { column: usize, reason: String },

    #[error("Row merge error: {0}")]
    Merge(String),

    #[error("Unsupported query class: {0}")]
    Unsupported(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AttributionError {
    /// Row-level errors are recovered by skipping the row; everything else
    /// aborts the current run.
    pub fn is_row_level(&self) -> bool {
        matches!(self, Self::RowParse { .. } | Self::Merge(_))
    }
}
