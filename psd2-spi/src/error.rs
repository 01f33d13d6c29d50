//! Failure signals returned by SPI implementations.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failed SPI call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpiResponseStatus {
    /// The bank integration does not implement this capability.
    NotSupported,
    /// The PSU could not be authenticated (bad credentials, wrong code).
    AuthenticationFailed,
    /// The bank refused the request for a business reason.
    LogicalFailure,
    /// The bank system failed unexpectedly (timeout, outage, bug).
    TechnicalFailure,
}

impl fmt::Display for SpiResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpiResponseStatus::NotSupported => write!(f, "NOT_SUPPORTED"),
            SpiResponseStatus::AuthenticationFailed => write!(f, "AUTHENTICATION_FAILED"),
            SpiResponseStatus::LogicalFailure => write!(f, "LOGICAL_FAILURE"),
            SpiResponseStatus::TechnicalFailure => write!(f, "TECHNICAL_FAILURE"),
        }
    }
}

/// A typed failure plus the messages the bank supplied with it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("SPI call failed with {status}{}", format_messages(.messages))]
pub struct SpiError {
    pub status: SpiResponseStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

fn format_messages(messages: &[String]) -> String {
    if messages.is_empty() {
        String::new()
    } else {
        format!(": {}", messages.join("; "))
    }
}

impl SpiError {
    pub fn new(status: SpiResponseStatus) -> Self {
        Self {
            status,
            messages: Vec::new(),
        }
    }

    /// Attach a bank-supplied message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn not_supported() -> Self {
        Self::new(SpiResponseStatus::NotSupported)
    }

    pub fn authentication_failed() -> Self {
        Self::new(SpiResponseStatus::AuthenticationFailed)
    }

    pub fn logical(message: impl Into<String>) -> Self {
        Self::new(SpiResponseStatus::LogicalFailure).with_message(message)
    }

    pub fn technical(message: impl Into<String>) -> Self {
        Self::new(SpiResponseStatus::TechnicalFailure).with_message(message)
    }

    /// Technical failures are not business outcomes and must not be
    /// recorded as a status transition.
    pub fn is_technical(&self) -> bool {
        self.status == SpiResponseStatus::TechnicalFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_messages() {
        let err = SpiError::logical("account blocked").with_message("call your branch");
        assert_eq!(
            err.to_string(),
            "SPI call failed with LOGICAL_FAILURE: account blocked; call your branch"
        );
        assert_eq!(
            SpiError::not_supported().to_string(),
            "SPI call failed with NOT_SUPPORTED"
        );
    }

    #[test]
    fn test_is_technical() {
        assert!(SpiError::technical("timeout").is_technical());
        assert!(!SpiError::authentication_failed().is_technical());
    }
}
