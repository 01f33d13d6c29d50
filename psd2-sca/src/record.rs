//! Authorisation record and SCA status lifecycle
//!
//! One [`AuthorisationRecord`] exists per SCA flow. Its [`ScaStatus`] moves
//! only along the edges listed by [`ScaStatus::permitted_next`]; the engine
//! checks every status a stage produces against that table.
//!
//! # States
//!
//! ```text
//!   consent                                 payment initiation / cancellation
//!
//!   ┌──────────┐  PSU data only  ┌───────────────┐        ┌─────────┐
//!   │ Received │────────────────▶│ PsuIdentified │        │ Started │
//!   └────┬─────┘                 └───────┬───────┘        └────┬────┘
//!        │ password                      │ password            │ password
//!        └───────────────┬───────────────┘                     │
//!                        ▼                                     ▼
//!              ┌───────────────────┐   several methods  ┌──────────────────┐
//!              │  authorise PSU    │───────────────────▶│ PsuAuthenticated │
//!              │  list methods     │                    └────────┬─────────┘
//!              └─────────┬─────────┘                             │ method chosen
//!                        │ one method                            ▼
//!                        └────────────────────────────▶┌───────────────────┐
//!                                                      │ ScaMethodSelected │
//!                                                      └─────────┬─────────┘
//!                                                                │ code
//!                                         ┌──────────────────────┼──────────┐
//!                                         ▼                      ▼          ▼
//!                                   ┌───────────┐          ┌────────┐ ┌──────────┐
//!                                   │ Finalised │          │ Failed │ │ Exempted │
//!                                   └───────────┘          └────────┘ └──────────┘
//! ```
//!
//! Every non-terminal status may also fall to `Failed` when the bank rejects
//! a step, and the PSU-facing statuses may jump to `Finalised` or `Exempted`
//! when the bank waives SCA.

use chrono::{DateTime, Utc};
use psd2_spi::{
    AuthorisationKind, ConsentData, PsuData, ScaApproach, ScaMethod, SpiContext, SpiError,
    SpiResponse,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// SCA status
// ---------------------------------------------------------------------------

/// Status of an authorisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScaStatus {
    /// Consent authorisation created, nothing known about the PSU yet.
    Received,
    /// The PSU was identified but not authenticated.
    PsuIdentified,
    /// The PSU was authenticated and has to choose one of several methods.
    PsuAuthenticated,
    /// A method is selected and a code was sent to the PSU.
    ScaMethodSelected,
    /// Payment authorisation created.
    Started,
    /// SCA completed successfully. Terminal.
    Finalised,
    /// SCA failed. Terminal.
    Failed,
    /// The bank waived SCA. Terminal.
    Exempted,
}

impl ScaStatus {
    /// Returns true if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScaStatus::Finalised | ScaStatus::Failed | ScaStatus::Exempted
        )
    }

    /// The status a new authorisation of `kind` starts in.
    pub fn initial(kind: AuthorisationKind) -> Self {
        if kind.is_payment() {
            ScaStatus::Started
        } else {
            ScaStatus::Received
        }
    }

    /// Statuses reachable from `self` for an authorisation of `kind`.
    pub fn permitted_next(&self, kind: AuthorisationKind) -> &'static [ScaStatus] {
        use ScaStatus::*;

        match (kind, self) {
            (AuthorisationKind::Consent, Received) => &[
                PsuIdentified,
                PsuAuthenticated,
                ScaMethodSelected,
                Finalised,
                Failed,
                Exempted,
            ],
            (AuthorisationKind::Consent, PsuIdentified) => &[
                PsuAuthenticated,
                ScaMethodSelected,
                Finalised,
                Failed,
                Exempted,
            ],
            (k, Started) if k.is_payment() => &[
                PsuAuthenticated,
                ScaMethodSelected,
                Finalised,
                Failed,
                Exempted,
            ],
            (_, PsuAuthenticated) => &[ScaMethodSelected, Finalised, Failed],
            (_, ScaMethodSelected) => &[Finalised, Failed],
            _ => &[],
        }
    }

    /// Whether moving from `self` to `to` is allowed. Staying put is always
    /// allowed for non-terminal statuses (decoupled and redirect hand-offs
    /// keep the status).
    pub fn can_transition(&self, kind: AuthorisationKind, to: ScaStatus) -> bool {
        (*self == to && !self.is_terminal()) || self.permitted_next(kind).contains(&to)
    }
}

impl fmt::Display for ScaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaStatus::Received => write!(f, "received"),
            ScaStatus::PsuIdentified => write!(f, "psuIdentified"),
            ScaStatus::PsuAuthenticated => write!(f, "psuAuthenticated"),
            ScaStatus::ScaMethodSelected => write!(f, "scaMethodSelected"),
            ScaStatus::Started => write!(f, "started"),
            ScaStatus::Finalised => write!(f, "finalised"),
            ScaStatus::Failed => write!(f, "failed"),
            ScaStatus::Exempted => write!(f, "exempted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Record parts
// ---------------------------------------------------------------------------

/// Facts about an AIS consent that decide whether one factor is enough.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentScope {
    /// The consent covers all available accounts.
    pub all_available_accounts: bool,
    /// The consent requests a single access type (e.g. accounts only).
    pub one_access_type: bool,
}

impl ConsentScope {
    pub fn qualifies_for_one_factor(&self) -> bool {
        self.all_available_accounts && self.one_access_type
    }
}

/// The PSU has been sent out of the API channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Handoff {
    /// Redirect or OAuth link issued to the TPP.
    Redirect {
        url: String,
        expires_at: DateTime<Utc>,
        oauth: bool,
    },
    /// The bank notified the PSU out of band; the TPP polls the status.
    Decoupled {
        method_id: Option<String>,
        psu_message: Option<String>,
        started_at: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// Authorisation record
// ---------------------------------------------------------------------------

/// Persistent state of one SCA flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorisationRecord {
    pub id: String,
    pub parent_id: String,
    pub kind: AuthorisationKind,
    pub status: ScaStatus,
    #[serde(default)]
    pub psu_data: PsuData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_sca_method: Option<ScaMethod>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_sca_methods: Vec<ScaMethod>,
    #[serde(default)]
    pub consent_data: ConsentData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_scope: Option<ConsentScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sca_approach: Option<ScaApproach>,
    #[serde(default)]
    pub approach_forced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<Handoff>,
    /// Maintained by the store; bumped on every successful save.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_action_at: DateTime<Utc>,
}

impl AuthorisationRecord {
    /// Build a fresh record in the initial status for its kind.
    pub fn new(new: NewAuthorisation) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: new.parent_id,
            kind: new.kind,
            status: ScaStatus::initial(new.kind),
            psu_data: new.psu_data.unwrap_or_default(),
            chosen_sca_method: None,
            available_sca_methods: Vec::new(),
            consent_data: new.consent_data,
            consent_scope: new.consent_scope,
            sca_approach: new.sca_approach,
            approach_forced: false,
            handoff: None,
            version: 0,
            created_at: now,
            last_action_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Context handed to SPI calls made on behalf of this record.
    pub fn spi_context(&self) -> SpiContext {
        SpiContext {
            authorisation_id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            kind: self.kind,
            psu_data: self.psu_data.clone(),
            sca_approach: self.sca_approach,
        }
    }

    /// Move the consent data out for an SPI call.
    pub fn take_consent_data(&mut self) -> ConsentData {
        std::mem::take(&mut self.consent_data)
    }

    /// Store the consent data returned by an SPI call and classify the
    /// outcome.
    ///
    /// A technical failure aborts the stage with [`Error::Spi`] carrying the
    /// returned blob. The service stores that blob on the last saved record
    /// and drops the rest of this working copy, so no status change reaches
    /// the store. Every other failure is returned to the
    /// stage as a typed [`SpiError`].
    pub fn absorb<T>(&mut self, response: SpiResponse<T>) -> Result<std::result::Result<T, SpiError>> {
        let (consent_data, outcome) = response.into_parts();
        match outcome {
            Err(error) if error.is_technical() => Err(Error::Spi {
                error,
                consent_data: Some(consent_data),
            }),
            other => {
                self.consent_data = consent_data;
                Ok(other)
            }
        }
    }

    /// Whether `method_id` is one of the methods offered to the PSU.
    pub fn offered_method(&self, method_id: &str) -> Option<&ScaMethod> {
        self.available_sca_methods
            .iter()
            .find(|m| m.authentication_method_id == method_id)
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Parameters for creating an authorisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAuthorisation {
    pub parent_id: String,
    pub kind: AuthorisationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psu_data: Option<PsuData>,
    /// Consent data produced by the SPI when the parent was initiated.
    #[serde(default)]
    pub consent_data: ConsentData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_scope: Option<ConsentScope>,
    /// Approach explicitly requested by the TPP, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sca_approach: Option<ScaApproach>,
}

impl NewAuthorisation {
    pub fn new(parent_id: impl Into<String>, kind: AuthorisationKind) -> Self {
        Self {
            parent_id: parent_id.into(),
            kind,
            psu_data: None,
            consent_data: ConsentData::empty(),
            consent_scope: None,
            sca_approach: None,
        }
    }

    pub fn with_psu_data(mut self, psu_data: PsuData) -> Self {
        self.psu_data = Some(psu_data);
        self
    }

    pub fn with_consent_data(mut self, consent_data: ConsentData) -> Self {
        self.consent_data = consent_data;
        self
    }

    pub fn with_consent_scope(mut self, scope: ConsentScope) -> Self {
        self.consent_scope = Some(scope);
        self
    }

    pub fn with_approach(mut self, approach: ScaApproach) -> Self {
        self.sca_approach = Some(approach);
        self
    }
}

/// Data submitted by the PSU (through the TPP) for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsuUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psu_data: Option<PsuData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_method_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sca_authentication_data: Option<String>,
}

impl PsuUpdate {
    pub fn identification(psu_data: PsuData) -> Self {
        Self {
            psu_data: Some(psu_data),
            ..Default::default()
        }
    }

    pub fn credentials(psu_data: PsuData, password: impl Into<String>) -> Self {
        Self {
            psu_data: Some(psu_data),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            ..Default::default()
        }
    }

    pub fn select_method(method_id: impl Into<String>) -> Self {
        Self {
            authentication_method_id: Some(method_id.into()),
            ..Default::default()
        }
    }

    pub fn code(code: impl Into<String>) -> Self {
        Self {
            sca_authentication_data: Some(code.into()),
            ..Default::default()
        }
    }

    /// Non-blank password, if one was submitted.
    pub fn password_value(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// Non-empty PSU data, if any was submitted.
    pub fn psu_data_value(&self) -> Option<&PsuData> {
        self.psu_data.as_ref().filter(|p| !p.is_empty())
    }
}

/// Outcome reported by the bank after the PSU finished SCA outside the API
/// channel (redirect, OAuth or decoupled app approval).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankReport {
    pub status: ScaStatus,
    /// New consent data produced by the bank while the PSU was away.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_data: Option<ConsentData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_sca_method: Option<ScaMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_status: Option<psd2_spi::TransactionStatus>,
}

impl BankReport {
    pub fn new(status: ScaStatus) -> Self {
        Self {
            status,
            consent_data: None,
            chosen_sca_method: None,
            transaction_status: None,
        }
    }
}
