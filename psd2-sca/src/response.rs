//! What the engine tells the TPP after each step.

use chrono::{DateTime, Utc};
use psd2_spi::{
    AuthorisationKind, ChallengeData, ConsentStatus, ScaApproach, ScaMethod, SpiError,
    SpiResponseStatus, TransactionStatus,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::{AuthorisationRecord, ScaStatus};

// ---------------------------------------------------------------------------
// Message errors
// ---------------------------------------------------------------------------

/// Which API family produced a message error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceType {
    Ais,
    Pis,
}

impl From<AuthorisationKind> for ServiceType {
    fn from(kind: AuthorisationKind) -> Self {
        if kind.is_payment() {
            ServiceType::Pis
        } else {
            ServiceType::Ais
        }
    }
}

/// NextGenPSD2 message codes the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageErrorCode {
    FormatError,
    PsuCredentialsInvalid,
    ScaMethodUnknown,
    ScaInvalid,
    ServiceNotSupported,
    ServiceInvalid,
    StatusInvalid,
    ResourceUnknown,
    InternalServerError,
}

impl MessageErrorCode {
    /// HTTP status the API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            MessageErrorCode::PsuCredentialsInvalid => 401,
            MessageErrorCode::ServiceInvalid | MessageErrorCode::ServiceNotSupported => 405,
            MessageErrorCode::ResourceUnknown => 404,
            MessageErrorCode::StatusInvalid => 409,
            MessageErrorCode::InternalServerError => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for MessageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            MessageErrorCode::FormatError => "FORMAT_ERROR",
            MessageErrorCode::PsuCredentialsInvalid => "PSU_CREDENTIALS_INVALID",
            MessageErrorCode::ScaMethodUnknown => "SCA_METHOD_UNKNOWN",
            MessageErrorCode::ScaInvalid => "SCA_INVALID",
            MessageErrorCode::ServiceNotSupported => "SERVICE_NOT_SUPPORTED",
            MessageErrorCode::ServiceInvalid => "SERVICE_INVALID",
            MessageErrorCode::StatusInvalid => "STATUS_INVALID",
            MessageErrorCode::ResourceUnknown => "RESOURCE_UNKNOWN",
            MessageErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        };
        write!(f, "{}", code)
    }
}

/// Severity of a TPP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageCategory {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TppMessage {
    pub category: MessageCategory,
    pub code: MessageErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TppMessage {
    pub fn error(code: MessageErrorCode) -> Self {
        Self {
            category: MessageCategory::Error,
            code,
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Error part of a failed step. The step itself succeeded technically; the
/// record was saved in its FAILED status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageError {
    pub service: ServiceType,
    pub tpp_messages: Vec<TppMessage>,
}

impl MessageError {
    pub fn new(service: ServiceType, code: MessageErrorCode) -> Self {
        Self {
            service,
            tpp_messages: vec![TppMessage::error(code)],
        }
    }

    pub fn with_text(service: ServiceType, code: MessageErrorCode, text: impl Into<String>) -> Self {
        Self {
            service,
            tpp_messages: vec![TppMessage::error(code).with_text(text)],
        }
    }

    /// Translate an SPI failure, surfacing the bank's own messages.
    pub fn from_spi(service: ServiceType, err: &SpiError) -> Self {
        let code = code_for_spi_status(err.status);
        let tpp_messages = if err.messages.is_empty() {
            vec![TppMessage::error(code)]
        } else {
            err.messages
                .iter()
                .map(|text| TppMessage::error(code).with_text(text.clone()))
                .collect()
        };
        Self {
            service,
            tpp_messages,
        }
    }

    /// The first message's code, used as the headline of the error.
    pub fn code(&self) -> Option<MessageErrorCode> {
        self.tpp_messages.first().map(|m| m.code)
    }

    pub fn http_status(&self) -> u16 {
        self.code().map_or(400, |c| c.http_status())
    }
}

/// Message code reported for an SPI failure status.
pub fn code_for_spi_status(status: SpiResponseStatus) -> MessageErrorCode {
    match status {
        SpiResponseStatus::NotSupported => MessageErrorCode::ServiceNotSupported,
        SpiResponseStatus::AuthenticationFailed => MessageErrorCode::PsuCredentialsInvalid,
        SpiResponseStatus::LogicalFailure => MessageErrorCode::FormatError,
        SpiResponseStatus::TechnicalFailure => MessageErrorCode::InternalServerError,
    }
}

// ---------------------------------------------------------------------------
// Links and parent status
// ---------------------------------------------------------------------------

/// The next action the TPP should take. Rendering into hypermedia links is
/// left to the API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LinkHint {
    None,
    /// Send the PSU identification.
    UpdatePsuIdentification,
    /// Send the PSU identification together with the password.
    StartAuthorisationWithPsuAuthentication,
    /// Choose one of the offered methods.
    SelectAuthenticationMethod,
    /// Send the code the PSU received.
    AuthoriseTransaction,
    /// Send the PSU to the bank's page.
    ScaRedirect { url: String, expires_at: DateTime<Utc> },
    /// Start an OAuth authorisation at the bank.
    ScaOAuth { url: String, expires_at: DateTime<Utc> },
    /// Poll the SCA status until the bank reports a result.
    ScaStatus,
    /// Nothing left to do.
    Finalised,
}

/// Status change of the consent or payment an authorisation secures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "status", rename_all = "camelCase")]
pub enum ParentStatus {
    Consent(ConsentStatus),
    Payment(TransactionStatus),
}

// ---------------------------------------------------------------------------
// Authorisation response
// ---------------------------------------------------------------------------

/// Result of one engine step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorisationResponse {
    pub authorisation_id: String,
    pub parent_id: String,
    pub kind: AuthorisationKind,
    pub sca_status: ScaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sca_approach: Option<ScaApproach>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_sca_methods: Vec<ScaMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_sca_method: Option<ScaMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_data: Option<ChallengeData>,
    pub link: LinkHint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psu_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_status: Option<ParentStatus>,
}

impl AuthorisationResponse {
    /// Snapshot of `record` with no link, challenge or error yet.
    pub fn for_record(record: &AuthorisationRecord) -> Self {
        Self {
            authorisation_id: record.id.clone(),
            parent_id: record.parent_id.clone(),
            kind: record.kind,
            sca_status: record.status,
            sca_approach: record.sca_approach,
            available_sca_methods: record.available_sca_methods.clone(),
            chosen_sca_method: record.chosen_sca_method.clone(),
            challenge_data: None,
            link: LinkHint::None,
            psu_message: None,
            error: None,
            parent_status: None,
        }
    }

    pub fn with_link(mut self, link: LinkHint) -> Self {
        self.link = link;
        self
    }

    pub fn with_challenge(mut self, challenge: Option<ChallengeData>) -> Self {
        self.challenge_data = challenge;
        self
    }

    pub fn with_psu_message(mut self, message: Option<String>) -> Self {
        self.psu_message = message;
        self
    }

    pub fn with_error(mut self, error: MessageError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_parent_status(mut self, status: Option<ParentStatus>) -> Self {
        self.parent_status = status;
        self
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}
