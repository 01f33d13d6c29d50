//! PSU authentication: password check, method discovery, method routing.
//!
//! Serves consent authorisations in PSU_IDENTIFIED (and RECEIVED when the
//! password arrives together with the identification) and payment
//! authorisations in STARTED.

use async_trait::async_trait;
use psd2_spi::{AuthorisationKind, ConsentStatus, ScaApproach, ScaMethod};
use tracing::{debug, info};

use crate::approach::ApproachResolver;
use crate::error::{Error, Result};
use crate::handoff::HandoffService;
use crate::record::{AuthorisationRecord, PsuUpdate, ScaStatus};
use crate::response::{MessageErrorCode, ParentStatus};
use crate::stage::{Stage, StageContext, StageOutcome};

const MESSAGE_NO_PSU: &str = "Please provide the PSU identification data";
const MESSAGE_NO_PASSWORD: &str = "Please provide the PSU password";
const MESSAGE_NO_SCA_METHOD: &str = "No SCA method is available for the PSU";

pub struct AuthenticationStage;

#[async_trait]
impl Stage for AuthenticationStage {
    async fn apply(
        &self,
        ctx: &StageContext,
        record: AuthorisationRecord,
        update: &PsuUpdate,
    ) -> Result<StageOutcome> {
        authenticate(ctx, record, update).await
    }
}

/// Merge PSU data from `update` into the record.
pub(crate) fn merge_psu_data(record: &mut AuthorisationRecord, update: &PsuUpdate) -> Result<()> {
    if let Some(psu_data) = update.psu_data_value() {
        if record.psu_data.contradicts(psu_data) {
            return Err(Error::validation(
                MessageErrorCode::FormatError,
                "PSU-ID does not match the PSU of this authorisation",
            ));
        }
        record.psu_data.fill_from(psu_data);
    }
    Ok(())
}

pub(crate) async fn authenticate(
    ctx: &StageContext,
    mut record: AuthorisationRecord,
    update: &PsuUpdate,
) -> Result<StageOutcome> {
    let password = update
        .password_value()
        .ok_or_else(|| Error::validation(MessageErrorCode::FormatError, MESSAGE_NO_PASSWORD))?;
    merge_psu_data(&mut record, update)?;
    if record.psu_data.is_empty() {
        return Err(Error::validation(MessageErrorCode::FormatError, MESSAGE_NO_PSU));
    }

    let spi_ctx = record.spi_context();
    let consent_data = record.take_consent_data();
    let response = ctx
        .spi
        .authorise_psu(&spi_ctx, &record.psu_data, password, consent_data)
        .await;
    let authorisation = match record.absorb(response)? {
        Ok(authorisation) => authorisation,
        Err(err) => return Ok(StageOutcome::spi_failure(record, &err)),
    };

    if authorisation.sca_exempted {
        return exempt(ctx, record).await;
    }

    if one_factor_applies(ctx, &record) {
        info!(
            "Consent authorisation {} finalised with one factor",
            record.id
        );
        return Ok(StageOutcome::advance_to(record, ScaStatus::Finalised)
            .with_parent_status(ParentStatus::Consent(ConsentStatus::Valid)));
    }

    let spi_ctx = record.spi_context();
    let consent_data = record.take_consent_data();
    let response = ctx
        .spi
        .request_available_sca_methods(&spi_ctx, consent_data)
        .await;
    let mut methods = match record.absorb(response)? {
        Ok(methods) => methods,
        Err(err) => return Ok(StageOutcome::spi_failure(record, &err)),
    };
    debug!(
        "Bank offers {} SCA method(s) for authorisation {}",
        methods.len(),
        record.id
    );

    match methods.len() {
        0 => without_methods(ctx, record).await,
        1 => {
            let method = methods.remove(0);
            proceed_with_method(ctx, record, method).await
        }
        _ => {
            record.available_sca_methods = methods;
            Ok(StageOutcome::advance_to(record, ScaStatus::PsuAuthenticated))
        }
    }
}

fn one_factor_applies(ctx: &StageContext, record: &AuthorisationRecord) -> bool {
    record.kind == AuthorisationKind::Consent
        && ctx.profile().one_factor_shortcut_permitted
        && record
            .consent_scope
            .map_or(false, |scope| scope.qualifies_for_one_factor())
}

/// The bank waived SCA after the credential check.
async fn exempt(ctx: &StageContext, mut record: AuthorisationRecord) -> Result<StageOutcome> {
    if record.kind == AuthorisationKind::Consent {
        info!("Consent authorisation {} exempted from SCA", record.id);
        return Ok(StageOutcome::advance_to(record, ScaStatus::Exempted)
            .with_parent_status(ParentStatus::Consent(ConsentStatus::Valid)));
    }

    let spi_ctx = record.spi_context();
    let consent_data = record.take_consent_data();
    let response = ctx.spi.execute_without_sca(&spi_ctx, consent_data).await;
    match record.absorb(response)? {
        Ok(result) => {
            info!("Payment authorisation {} exempted from SCA", record.id);
            let mut outcome = StageOutcome::advance_to(record, ScaStatus::Exempted);
            if let Some(status) = result.transaction_status {
                outcome = outcome.with_parent_status(ParentStatus::Payment(status));
            }
            Ok(outcome)
        }
        Err(err) => Ok(StageOutcome::spi_failure(record, &err)),
    }
}

/// The bank offers no method: payments execute without SCA, consents fail.
async fn without_methods(
    ctx: &StageContext,
    mut record: AuthorisationRecord,
) -> Result<StageOutcome> {
    if record.kind == AuthorisationKind::Consent {
        return Ok(StageOutcome::fail_with(
            record,
            MessageErrorCode::ScaMethodUnknown,
            MESSAGE_NO_SCA_METHOD,
        )
        .with_parent_status(ParentStatus::Consent(ConsentStatus::Rejected)));
    }

    let spi_ctx = record.spi_context();
    let consent_data = record.take_consent_data();
    let response = ctx.spi.execute_without_sca(&spi_ctx, consent_data).await;
    match record.absorb(response)? {
        Ok(result) => {
            info!(
                "Payment authorisation {} executed without SCA",
                record.id
            );
            let mut outcome = StageOutcome::advance_to(record, ScaStatus::Finalised);
            if let Some(status) = result.transaction_status {
                outcome = outcome.with_parent_status(ParentStatus::Payment(status));
            }
            Ok(outcome)
        }
        Err(err) => Ok(StageOutcome::spi_failure(record, &err)),
    }
}

/// Continue with a single method: out of band when the method or the
/// approach requires it, otherwise by sending a code.
pub(crate) async fn proceed_with_method(
    ctx: &StageContext,
    mut record: AuthorisationRecord,
    method: ScaMethod,
) -> Result<StageOutcome> {
    let approach = ApproachResolver::resolve(ctx.profile(), &record);
    if method.decoupled || approach == ScaApproach::Decoupled {
        return HandoffService::start_decoupled(ctx, record, Some(method)).await;
    }

    let spi_ctx = record.spi_context();
    let consent_data = record.take_consent_data();
    let response = ctx
        .spi
        .request_authorisation_code(&spi_ctx, &method.authentication_method_id, consent_data)
        .await;
    match record.absorb(response)? {
        Ok(result) => {
            record.chosen_sca_method = Some(result.sca_method);
            Ok(StageOutcome::advance_to(record, ScaStatus::ScaMethodSelected)
                .with_challenge(result.challenge_data))
        }
        Err(err) => {
            record.chosen_sca_method = Some(method);
            Ok(StageOutcome::spi_failure(record, &err))
        }
    }
}
