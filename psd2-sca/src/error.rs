//! Error handling for the SCA engine

use psd2_spi::{AuthorisationKind, ConsentData, SpiError};
use thiserror::Error;

use crate::record::ScaStatus;
use crate::response::MessageErrorCode;
use crate::store::StoreError;

/// Error types for the SCA engine
#[derive(Error, Debug)]
pub enum Error {
    /// No authorisation with this id exists
    #[error("Authorisation not found: {0}")]
    AuthorisationNotFound(String),

    /// The authorisation already reached FINALISED, FAILED or EXEMPTED
    #[error("Authorisation {authorisation_id} is in terminal state {status}")]
    TerminalState {
        authorisation_id: String,
        status: ScaStatus,
    },

    /// The PSU update is malformed or incomplete for the current stage
    #[error("Invalid PSU update ({code}): {detail}")]
    Validation {
        code: MessageErrorCode,
        detail: String,
    },

    /// The PSU chose a method that was not offered
    #[error("SCA method {0} was not offered for this authorisation")]
    ScaMethodNotOffered(String),

    /// An out-of-band report does not fit the authorisation
    #[error("Invalid out-of-band report: {0}")]
    InvalidReport(String),

    /// No stage handler for a (kind, status) pair
    #[error("No stage registered for {kind} in status {status}")]
    UnsupportedStage {
        kind: AuthorisationKind,
        status: ScaStatus,
    },

    /// A stage produced a status the transition table does not allow
    #[error("Illegal transition for {kind}: {from} -> {to}")]
    IllegalTransition {
        kind: AuthorisationKind,
        from: ScaStatus,
        to: ScaStatus,
    },

    /// Another request is advancing the same authorisation
    #[error("Concurrent update of authorisation {0}")]
    Conflict(String),

    /// The bank integration failed technically.
    ///
    /// Inside the engine `consent_data` holds the blob the bank returned with
    /// the failure; the service stores it and hands the error on without it.
    #[error("Technical failure in bank integration: {error}")]
    Spi {
        error: SpiError,
        consent_data: Option<ConsentData>,
    },

    /// The record store failed
    #[error("Storage error: {0}")]
    Storage(StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the SCA engine
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification the API layer uses to pick a response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request was wrong; nothing changed
    Validation,
    /// The authorisation is finished; nothing changed
    Terminal,
    /// Unknown authorisation
    NotFound,
    /// Lost a race with another request; retry with a fresh call
    Conflict,
    /// Bank or storage failure; the record is at its last known good state
    Technical,
    /// Deployment misconfiguration
    Configuration,
}

impl Error {
    pub fn validation(code: MessageErrorCode, detail: impl Into<String>) -> Self {
        Error::Validation {
            code,
            detail: detail.into(),
        }
    }

    /// Technical SPI failure as seen by callers of the service.
    pub fn spi(error: SpiError) -> Self {
        Error::Spi {
            error,
            consent_data: None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Validation { .. } | Error::ScaMethodNotOffered(_) | Error::InvalidReport(_) => {
                ErrorClass::Validation
            }
            Error::TerminalState { .. } => ErrorClass::Terminal,
            Error::AuthorisationNotFound(_) => ErrorClass::NotFound,
            Error::Conflict(_) => ErrorClass::Conflict,
            Error::Spi { .. } | Error::Storage(_) | Error::Io(_) => ErrorClass::Technical,
            Error::UnsupportedStage { .. }
            | Error::IllegalTransition { .. }
            | Error::Configuration(_)
            | Error::Serialization(_) => ErrorClass::Configuration,
        }
    }

    pub fn is_technical(&self) -> bool {
        self.class() == ErrorClass::Technical
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Error::AuthorisationNotFound(id),
            StoreError::Conflict { id, .. } => Error::Conflict(id),
            other => Error::Storage(other),
        }
    }
}
