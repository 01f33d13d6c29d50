//! Deployment profile and service configuration.

use psd2_spi::{AuthorisationKind, ScaApproach};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::event::EventLoggerConfig;

/// Environment variable naming a JSON profile file.
pub const PROFILE_ENV_VAR: &str = "PSD2_ASPSP_PROFILE";

/// Longest accepted lifetime of a redirect link (one day).
pub const MAX_REDIRECT_URL_EXPIRATION_MS: u64 = 86_400_000;

/// Placeholder replaced by the authorisation id in redirect templates.
pub const REDIRECT_ID_PLACEHOLDER: &str = "{redirect-id}";

/// Placeholder replaced by the consent or payment id in redirect templates.
pub const PARENT_ID_PLACEHOLDER: &str = "{parent-id}";

/// What the bank's deployment supports. The engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AspspProfile {
    /// Supported approaches, most preferred first.
    pub sca_approaches: Vec<ScaApproach>,

    /// Whether the DECOUPLED approach may be used at all.
    pub decoupled_enabled: bool,

    /// Whether a consent for all available accounts with a single access
    /// type may be finalised after the password alone.
    pub one_factor_shortcut_permitted: bool,

    /// Whether PSU identification must be present when the authorisation is
    /// created.
    pub psu_in_initial_request_mandated: bool,

    /// Redirect link template for consent authorisations.
    pub ais_redirect_url: Option<String>,

    /// Redirect link template for payment initiation authorisations.
    pub pis_redirect_url: Option<String>,

    /// Redirect link template for payment cancellation authorisations.
    pub pis_cancellation_redirect_url: Option<String>,

    /// OAuth authorisation endpoint template.
    pub oauth_url: Option<String>,

    /// Lifetime of an issued redirect link.
    pub redirect_url_expiration_ms: u64,
}

impl Default for AspspProfile {
    fn default() -> Self {
        Self {
            sca_approaches: vec![ScaApproach::Redirect],
            decoupled_enabled: true,
            one_factor_shortcut_permitted: false,
            psu_in_initial_request_mandated: false,
            ais_redirect_url: Some(
                "https://bank.example/sca/ais/{redirect-id}?consent={parent-id}".to_string(),
            ),
            pis_redirect_url: Some(
                "https://bank.example/sca/pis/{redirect-id}?payment={parent-id}".to_string(),
            ),
            pis_cancellation_redirect_url: Some(
                "https://bank.example/sca/pis/cancellation/{redirect-id}?payment={parent-id}"
                    .to_string(),
            ),
            oauth_url: None,
            redirect_url_expiration_ms: 600_000,
        }
    }
}

impl AspspProfile {
    /// Parse a profile from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let profile: Self = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Load a profile from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Load the profile named by `PSD2_ASPSP_PROFILE`, or the default when
    /// the variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(PROFILE_ENV_VAR) {
            Ok(path) => Self::from_file(path),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Reject profiles the engine could not honour.
    pub fn validate(&self) -> Result<()> {
        if self.redirect_url_expiration_ms == 0 {
            return Err(Error::Configuration(
                "redirectUrlExpirationMs must be positive".to_string(),
            ));
        }
        if self.redirect_url_expiration_ms > MAX_REDIRECT_URL_EXPIRATION_MS {
            return Err(Error::Configuration(format!(
                "redirectUrlExpirationMs must not exceed {}",
                MAX_REDIRECT_URL_EXPIRATION_MS
            )));
        }
        if self.sca_approaches.contains(&ScaApproach::Redirect) {
            for kind in [
                AuthorisationKind::Consent,
                AuthorisationKind::PaymentInitiation,
                AuthorisationKind::PaymentCancellation,
            ] {
                if self.redirect_url_template(kind).is_none() {
                    return Err(Error::Configuration(format!(
                        "REDIRECT is supported but no redirect link template is set for {}",
                        kind
                    )));
                }
            }
        }
        if self.sca_approaches.contains(&ScaApproach::OAuth) && self.oauth_url.is_none() {
            return Err(Error::Configuration(
                "OAUTH is supported but no OAuth link template is set".to_string(),
            ));
        }
        Ok(())
    }

    /// Redirect template used for authorisations of `kind`.
    pub fn redirect_url_template(&self, kind: AuthorisationKind) -> Option<&str> {
        match kind {
            AuthorisationKind::Consent => self.ais_redirect_url.as_deref(),
            AuthorisationKind::PaymentInitiation => self.pis_redirect_url.as_deref(),
            AuthorisationKind::PaymentCancellation => {
                self.pis_cancellation_redirect_url.as_deref()
            }
        }
    }

    pub fn redirect_url_expiration(&self) -> Duration {
        Duration::from_millis(self.redirect_url_expiration_ms)
    }
}

/// Read access to the deployment capabilities.
pub trait CapabilityProvider: Send + Sync {
    fn profile(&self) -> &AspspProfile;
}

impl CapabilityProvider for AspspProfile {
    fn profile(&self) -> &AspspProfile {
        self
    }
}

/// What a request does when another request holds the same authorisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentionPolicy {
    /// Queue behind the running request.
    #[default]
    Wait,
    /// Fail immediately with a conflict.
    Reject,
}

/// Configuration for the authorisation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Behaviour under concurrent requests for one authorisation.
    pub contention: ContentionPolicy,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,

    /// Optional event logger configuration.
    /// If not provided, no event logging will be performed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_logger: Option<EventLoggerConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            contention: ContentionPolicy::Wait,
            event_channel_capacity: 100,
            event_logger: Some(EventLoggerConfig::default()),
        }
    }
}
