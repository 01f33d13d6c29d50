//! Domain types shared by the engine and bank integrations.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Authorisation kinds and approaches
// ---------------------------------------------------------------------------

/// What an authorisation secures. Selects the stage table the engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorisationKind {
    /// Account information consent (AIS).
    Consent,
    /// Payment initiation (PIS).
    PaymentInitiation,
    /// Cancellation of an initiated payment (PIS).
    PaymentCancellation,
}

impl AuthorisationKind {
    /// True for the two payment kinds.
    pub fn is_payment(&self) -> bool {
        matches!(
            self,
            AuthorisationKind::PaymentInitiation | AuthorisationKind::PaymentCancellation
        )
    }
}

impl fmt::Display for AuthorisationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorisationKind::Consent => write!(f, "consent"),
            AuthorisationKind::PaymentInitiation => write!(f, "payment_initiation"),
            AuthorisationKind::PaymentCancellation => write!(f, "payment_cancellation"),
        }
    }
}

/// The mechanism by which SCA is carried out relative to the API channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScaApproach {
    Embedded,
    Decoupled,
    Redirect,
    #[serde(rename = "OAUTH")]
    OAuth,
}

impl ScaApproach {
    /// Approaches where the PSU leaves the API channel and the bank reports
    /// the result out of band.
    pub fn is_redirect_like(&self) -> bool {
        matches!(self, ScaApproach::Redirect | ScaApproach::OAuth)
    }
}

impl fmt::Display for ScaApproach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaApproach::Embedded => write!(f, "EMBEDDED"),
            ScaApproach::Decoupled => write!(f, "DECOUPLED"),
            ScaApproach::Redirect => write!(f, "REDIRECT"),
            ScaApproach::OAuth => write!(f, "OAUTH"),
        }
    }
}

impl TryFrom<&str> for ScaApproach {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_uppercase().as_str() {
            "EMBEDDED" => Ok(ScaApproach::Embedded),
            "DECOUPLED" => Ok(ScaApproach::Decoupled),
            "REDIRECT" => Ok(ScaApproach::Redirect),
            "OAUTH" => Ok(ScaApproach::OAuth),
            _ => Err(format!("Invalid SCA approach: {}", value)),
        }
    }
}

// ---------------------------------------------------------------------------
// PSU data
// ---------------------------------------------------------------------------

/// Identification data of the PSU. Filled in progressively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsuData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psu_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psu_id_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psu_corporate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psu_corporate_id_type: Option<String>,
}

impl PsuData {
    pub fn new(psu_id: impl Into<String>) -> Self {
        Self {
            psu_id: Some(psu_id.into()),
            ..Default::default()
        }
    }

    /// True when no identifying field carries a non-blank value.
    pub fn is_empty(&self) -> bool {
        [
            &self.psu_id,
            &self.psu_id_type,
            &self.psu_corporate_id,
            &self.psu_corporate_id_type,
        ]
        .iter()
        .all(|field| field.as_deref().map_or(true, |v| v.trim().is_empty()))
    }

    /// Fill fields missing here from `other`. Fields already present win.
    pub fn fill_from(&mut self, other: &PsuData) {
        fn fill(target: &mut Option<String>, source: &Option<String>) {
            if target.is_none() {
                target.clone_from(source);
            }
        }
        fill(&mut self.psu_id, &other.psu_id);
        fill(&mut self.psu_id_type, &other.psu_id_type);
        fill(&mut self.psu_corporate_id, &other.psu_corporate_id);
        fill(&mut self.psu_corporate_id_type, &other.psu_corporate_id_type);
    }

    /// Two PSU data sets contradict when both name a PSU id and the ids differ.
    pub fn contradicts(&self, other: &PsuData) -> bool {
        match (&self.psu_id, &other.psu_id) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// SCA methods and challenges
// ---------------------------------------------------------------------------

/// An authentication method offered by the bank (SMS OTP, push TAN, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaMethod {
    pub authentication_method_id: String,
    pub authentication_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The method can only be used out of band (e.g. an app approval).
    #[serde(default)]
    pub decoupled: bool,
}

impl ScaMethod {
    pub fn new(id: impl Into<String>, authentication_type: impl Into<String>) -> Self {
        Self {
            authentication_method_id: id.into(),
            authentication_type: authentication_type.into(),
            name: None,
            decoupled: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark the method as usable only through the decoupled approach.
    pub fn decoupled_only(mut self) -> Self {
        self.decoupled = true;
        self
    }
}

/// Challenge the PSU needs to produce the authentication code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_information: Option<String>,
}

/// Code submitted by the PSU for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaConfirmation {
    pub authentication_method_id: Option<String>,
    pub sca_authentication_data: String,
}

// ---------------------------------------------------------------------------
// SPI payloads
// ---------------------------------------------------------------------------

/// Successful PSU credential check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsuAuthorisation {
    /// The bank waives SCA for this operation (e.g. low-value exemption).
    #[serde(default)]
    pub sca_exempted: bool,
}

/// Result of requesting an authorisation code for a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorisationCodeResult {
    pub sca_method: ScaMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_data: Option<ChallengeData>,
}

/// Acknowledgement that an out-of-band notification was sent to the PSU.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoupledStart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psu_message: Option<String>,
}

/// Outcome of an execution (payment or cancellation) or of a verified SCA.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_status: Option<TransactionStatus>,
}

impl ExecutionResult {
    pub fn with_status(status: TransactionStatus) -> Self {
        Self {
            transaction_status: Some(status),
        }
    }
}

/// ISO 20022 payment status codes used by NextGenPSD2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Rcvd,
    Pdng,
    Actc,
    Accp,
    Acwc,
    Acwp,
    Acsp,
    Acsc,
    Patc,
    Part,
    Rjct,
    Canc,
}

impl TransactionStatus {
    pub fn is_finalised(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Acsc | TransactionStatus::Rjct | TransactionStatus::Canc
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            TransactionStatus::Rcvd => "RCVD",
            TransactionStatus::Pdng => "PDNG",
            TransactionStatus::Actc => "ACTC",
            TransactionStatus::Accp => "ACCP",
            TransactionStatus::Acwc => "ACWC",
            TransactionStatus::Acwp => "ACWP",
            TransactionStatus::Acsp => "ACSP",
            TransactionStatus::Acsc => "ACSC",
            TransactionStatus::Patc => "PATC",
            TransactionStatus::Part => "PART",
            TransactionStatus::Rjct => "RJCT",
            TransactionStatus::Canc => "CANC",
        };
        write!(f, "{}", code)
    }
}

/// Lifecycle status of an account information consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsentStatus {
    Received,
    Rejected,
    Valid,
    RevokedByPsu,
    Expired,
    TerminatedByTpp,
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentStatus::Received => write!(f, "received"),
            ConsentStatus::Rejected => write!(f, "rejected"),
            ConsentStatus::Valid => write!(f, "valid"),
            ConsentStatus::RevokedByPsu => write!(f, "revokedByPsu"),
            ConsentStatus::Expired => write!(f, "expired"),
            ConsentStatus::TerminatedByTpp => write!(f, "terminatedByTpp"),
        }
    }
}

// ---------------------------------------------------------------------------
// Call context
// ---------------------------------------------------------------------------

/// Context handed to every SPI call: which authorisation, of what, for whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpiContext {
    pub authorisation_id: String,
    pub parent_id: String,
    pub kind: AuthorisationKind,
    pub psu_data: PsuData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sca_approach: Option<ScaApproach>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_psu_data_is_empty() {
        assert!(PsuData::default().is_empty());
        assert!(PsuData {
            psu_id: Some("  ".to_string()),
            ..Default::default()
        }
        .is_empty());
        assert!(!PsuData::new("PSU-1").is_empty());
    }

    #[test]
    fn test_psu_data_fill_and_contradiction() {
        let mut recorded = PsuData::new("PSU-1");
        let update = PsuData {
            psu_id: Some("PSU-1".to_string()),
            psu_corporate_id: Some("ACME".to_string()),
            ..Default::default()
        };
        assert!(!recorded.contradicts(&update));
        recorded.fill_from(&update);
        assert_eq!(recorded.psu_corporate_id.as_deref(), Some("ACME"));

        assert!(recorded.contradicts(&PsuData::new("PSU-2")));
        assert!(!recorded.contradicts(&PsuData::default()));
    }

    #[test]
    fn test_sca_approach_parsing() {
        assert_eq!(ScaApproach::try_from("redirect"), Ok(ScaApproach::Redirect));
        assert_eq!(ScaApproach::try_from("OAUTH"), Ok(ScaApproach::OAuth));
        assert!(ScaApproach::try_from("carrier-pigeon").is_err());
        assert_eq!(
            serde_json::to_string(&ScaApproach::OAuth).unwrap(),
            "\"OAUTH\""
        );
    }

    #[test]
    fn test_display_implementations() {
        assert_eq!(AuthorisationKind::PaymentCancellation.to_string(), "payment_cancellation");
        assert_eq!(TransactionStatus::Acsc.to_string(), "ACSC");
        assert_eq!(ConsentStatus::RevokedByPsu.to_string(), "revokedByPsu");
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Accp).unwrap(),
            "\"ACCP\""
        );
    }
}
