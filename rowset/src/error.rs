use crate::row::RowId;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RowsetError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Dataset not found: {0}")]
    UnknownDataset(String),

    #[error("Column '{column}' is not defined on {dataset}")]
    UnknownColumn { dataset: String, column: String },

    #[error("Row {row} not found in {dataset}")]
    RowNotFound { dataset: String, row: RowId },

    /// Incorrect composition by the integrating code. Never caused by user input.
    #[error("Usage error: {0}")]
    Usage(String),

    /// A sum or average no longer fits the decimal range
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RowsetError>;
