use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown report format: {0}")]
    UnknownFormat(String),
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        ReportError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
