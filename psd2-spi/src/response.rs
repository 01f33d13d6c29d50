//! Response wrapper returned by every SPI call.

use crate::consent_data::ConsentData;
use crate::error::{SpiError, SpiResponseStatus};

/// Result of one SPI call.
///
/// Regardless of success or failure the response carries the consent data the
/// caller must persist before issuing the next call for the same
/// authorisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiResponse<T> {
    pub consent_data: ConsentData,
    pub outcome: Result<T, SpiError>,
}

impl<T> SpiResponse<T> {
    pub fn success(payload: T, consent_data: ConsentData) -> Self {
        Self {
            consent_data,
            outcome: Ok(payload),
        }
    }

    pub fn failure(error: SpiError, consent_data: ConsentData) -> Self {
        Self {
            consent_data,
            outcome: Err(error),
        }
    }

    /// The default answer of every unimplemented capability: the consent data
    /// is handed back untouched.
    pub fn not_supported(consent_data: ConsentData) -> Self {
        Self::failure(SpiError::new(SpiResponseStatus::NotSupported), consent_data)
    }

    pub fn has_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn payload(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&SpiError> {
        self.outcome.as_ref().err()
    }

    /// Split into the consent data to persist and the call outcome.
    pub fn into_parts(self) -> (ConsentData, Result<T, SpiError>) {
        (self.consent_data, self.outcome)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> SpiResponse<U> {
        SpiResponse {
            consent_data: self.consent_data,
            outcome: self.outcome.map(f),
        }
    }
}
