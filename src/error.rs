use thiserror::Error;

/// Errors produced by the escrow ledger and the dispute engine.
///
/// The first group are rejected business preconditions. They are expected,
/// recoverable, and each one is surfaced to callers as a distinct error so a
/// client can explain why an action failed.
#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("invoice {0} already has funds held in escrow")]
    AlreadyHeld(String),
    #[error("escrow entry {0} is no longer held")]
    NotHeld(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not eligible: {0}")]
    NotEligible(String),
    #[error("dispute window closed for escrow entry {0}")]
    WindowClosed(String),
    #[error("voter {voter} already voted on dispute {dispute}")]
    AlreadyVoted { dispute: String, voter: String },
    #[error("voting closed for dispute {0}")]
    VotingClosed(String),
    #[error("escrow entry {0} already has an active dispute")]
    AlreadyDisputed(String),
    #[error("voting on dispute {0} is still open")]
    VotingStillOpen(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("concurrent update to {0}, retry")]
    Conflict(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl EscrowError {
    /// Whether this error is a rejected business rule rather than a fault.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            Self::CsvError(_) | Self::IoError(_) | Self::ConfigError(_) | Self::InternalError(_)
        )
    }
}

impl From<serde_json::Error> for EscrowError {
    fn from(e: serde_json::Error) -> Self {
        Self::InternalError(Box::new(e))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for EscrowError {
    fn from(e: rocksdb::Error) -> Self {
        Self::InternalError(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, EscrowError>;
