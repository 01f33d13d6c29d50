//! Hand-off of the PSU to the bank outside the API channel
//!
//! REDIRECT and OAUTH authorisations receive a link built from the profile
//! template for their kind. DECOUPLED authorisations ask the bank to notify
//! the PSU (push message, banking app) and tell the TPP to poll. In both
//! cases the record remembers the [`Handoff`] so later in-band requests get
//! the same answer without touching the bank again.

use chrono::{Duration, Utc};
use psd2_spi::{ScaApproach, ScaMethod};
use tracing::{debug, info};
use url::Url;

use crate::approach::ApproachResolver;
use crate::config::{AspspProfile, PARENT_ID_PLACEHOLDER, REDIRECT_ID_PLACEHOLDER};
use crate::error::{Error, Result};
use crate::event::EngineEvent;
use crate::record::{AuthorisationRecord, Handoff};
use crate::response::{LinkHint, MessageErrorCode};
use crate::stage::{StageContext, StageOutcome};

pub struct HandoffService;

impl HandoffService {
    /// Fill a link template for `record` and check the result is a URL.
    pub fn build_link(template: &str, record: &AuthorisationRecord) -> Result<Url> {
        let link = template
            .replace(REDIRECT_ID_PLACEHOLDER, &record.id)
            .replace(PARENT_ID_PLACEHOLDER, &record.parent_id);
        Url::parse(&link).map_err(|err| {
            Error::Configuration(format!("Invalid SCA link template {}: {}", template, err))
        })
    }

    /// Issue a redirect (or OAuth) link and record the hand-off.
    pub fn issue_redirect(
        profile: &AspspProfile,
        record: &mut AuthorisationRecord,
        approach: ScaApproach,
    ) -> Result<(LinkHint, EngineEvent)> {
        let oauth = approach == ScaApproach::OAuth;
        let template = if oauth {
            profile.oauth_url.as_deref()
        } else {
            profile.redirect_url_template(record.kind)
        }
        .ok_or_else(|| {
            Error::Configuration(format!(
                "No {} link template configured for {}",
                approach, record.kind
            ))
        })?;

        let url = Self::build_link(template, record)?;
        let expires_at = i64::try_from(profile.redirect_url_expiration_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "Redirect link lifetime of {} ms is out of range",
                    profile.redirect_url_expiration_ms
                ))
            })?;
        let handoff = Handoff::Redirect {
            url: url.to_string(),
            expires_at,
            oauth,
        };

        info!(
            "Issued {} link for authorisation {} (expires {})",
            approach, record.id, expires_at
        );
        let hint = Self::hint(&handoff);
        record.handoff = Some(handoff);

        Ok((
            hint,
            EngineEvent::HandoffIssued {
                authorisation_id: record.id.clone(),
                approach,
                expires_at: Some(expires_at),
            },
        ))
    }

    /// The link hint a recorded hand-off keeps answering with.
    pub fn hint(handoff: &Handoff) -> LinkHint {
        match handoff {
            Handoff::Redirect {
                url,
                expires_at,
                oauth: false,
            } => LinkHint::ScaRedirect {
                url: url.clone(),
                expires_at: *expires_at,
            },
            Handoff::Redirect {
                url,
                expires_at,
                oauth: true,
            } => LinkHint::ScaOAuth {
                url: url.clone(),
                expires_at: *expires_at,
            },
            Handoff::Decoupled { .. } => LinkHint::ScaStatus,
        }
    }

    /// Ask the bank to authenticate the PSU out of band.
    ///
    /// Switches the record to DECOUPLED when needed. The status stays where
    /// it is; the bank reports the result later.
    pub async fn start_decoupled(
        ctx: &StageContext,
        mut record: AuthorisationRecord,
        method: Option<ScaMethod>,
    ) -> Result<StageOutcome> {
        if !ctx.profile().decoupled_enabled {
            debug!(
                "Decoupled SCA requested for {} but disabled in the profile",
                record.id
            );
            return Ok(StageOutcome::fail_with(
                record,
                MessageErrorCode::ScaMethodUnknown,
                "Decoupled SCA is not available",
            ));
        }

        let previous = record.sca_approach;
        let forced = ApproachResolver::force_decoupled(&mut record)?;

        let method_id = method.as_ref().map(|m| m.authentication_method_id.clone());
        let spi_ctx = record.spi_context();
        let consent_data = record.take_consent_data();
        let response = ctx
            .spi
            .start_decoupled_authorisation(&spi_ctx, method_id.as_deref(), consent_data)
            .await;

        let mut outcome = match record.absorb(response)? {
            Ok(start) => {
                let handoff = Handoff::Decoupled {
                    method_id,
                    psu_message: start.psu_message.clone(),
                    started_at: Utc::now(),
                };
                record.chosen_sca_method = method;
                record.handoff = Some(handoff);
                info!("Started decoupled SCA for authorisation {}", record.id);

                let authorisation_id = record.id.clone();
                StageOutcome::proceed(record, LinkHint::ScaStatus)
                    .with_psu_message(start.psu_message)
                    .with_event(EngineEvent::HandoffIssued {
                        authorisation_id,
                        approach: ScaApproach::Decoupled,
                        expires_at: None,
                    })
            }
            Err(err) => StageOutcome::spi_failure(record, &err),
        };

        if forced {
            outcome.events.insert(
                0,
                EngineEvent::ApproachForced {
                    authorisation_id: outcome.record.id.clone(),
                    previous,
                },
            );
        }
        Ok(outcome)
    }
}
