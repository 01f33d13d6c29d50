//! SCA_METHOD_SELECTED: verify the code the PSU received.

use async_trait::async_trait;
use psd2_spi::{AuthorisationKind, ConsentStatus, ScaConfirmation};
use tracing::info;

use crate::error::{Error, Result};
use crate::record::{AuthorisationRecord, PsuUpdate, ScaStatus};
use crate::response::{MessageErrorCode, ParentStatus};
use crate::stage::{Stage, StageContext, StageOutcome};

pub struct TransactionAuthorisationStage;

#[async_trait]
impl Stage for TransactionAuthorisationStage {
    async fn apply(
        &self,
        ctx: &StageContext,
        mut record: AuthorisationRecord,
        update: &PsuUpdate,
    ) -> Result<StageOutcome> {
        let code = update
            .sca_authentication_data
            .as_deref()
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| {
                Error::validation(
                    MessageErrorCode::FormatError,
                    "Please provide the SCA authentication data",
                )
            })?;

        let confirmation = ScaConfirmation {
            authentication_method_id: record
                .chosen_sca_method
                .as_ref()
                .map(|m| m.authentication_method_id.clone()),
            sca_authentication_data: code.to_string(),
        };

        let spi_ctx = record.spi_context();
        let consent_data = record.take_consent_data();
        let response = ctx
            .spi
            .verify_sca_authorisation(&spi_ctx, &confirmation, consent_data)
            .await;
        let result = match record.absorb(response)? {
            Ok(result) => result,
            Err(err) => return Ok(StageOutcome::spi_failure(record, &err)),
        };

        info!("SCA completed for authorisation {}", record.id);
        let parent_status = match (record.kind, result.transaction_status) {
            (AuthorisationKind::Consent, _) => Some(ParentStatus::Consent(ConsentStatus::Valid)),
            (_, Some(status)) => Some(ParentStatus::Payment(status)),
            (_, None) => None,
        };
        let mut outcome = StageOutcome::advance_to(record, ScaStatus::Finalised);
        if let Some(status) = parent_status {
            outcome = outcome.with_parent_status(status);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AspspProfile;
    use crate::record::NewAuthorisation;
    use crate::response::LinkHint;
    use assert_matches::assert_matches;
    use psd2_spi::sandbox::{SandboxBank, SpiCall};
    use psd2_spi::{ScaApproach, ScaMethod, SpiError, TransactionStatus};
    use std::sync::Arc;

    fn setup(kind: AuthorisationKind) -> (Arc<SandboxBank>, StageContext, AuthorisationRecord) {
        let bank = Arc::new(SandboxBank::default());
        let ctx = StageContext::new(
            bank.clone(),
            Arc::new(AspspProfile {
                sca_approaches: vec![ScaApproach::Embedded],
                ..Default::default()
            }),
        );
        let mut record = AuthorisationRecord::new(NewAuthorisation::new("parent-1", kind));
        record.status = ScaStatus::ScaMethodSelected;
        record.chosen_sca_method = Some(ScaMethod::new("sms", "SMS_OTP"));
        (bank, ctx, record)
    }

    #[tokio::test]
    async fn test_correct_code_finalises_consent() {
        let (_, ctx, record) = setup(AuthorisationKind::Consent);
        let outcome = TransactionAuthorisationStage
            .apply(&ctx, record, &PsuUpdate::code("123456"))
            .await
            .unwrap();

        assert_eq!(outcome.record.status, ScaStatus::Finalised);
        assert_eq!(outcome.link, LinkHint::Finalised);
        assert_eq!(
            outcome.parent_status,
            Some(ParentStatus::Consent(ConsentStatus::Valid))
        );
    }

    #[tokio::test]
    async fn test_correct_code_reports_payment_status() {
        let (_, ctx, record) = setup(AuthorisationKind::PaymentCancellation);
        let outcome = TransactionAuthorisationStage
            .apply(&ctx, record, &PsuUpdate::code("123456"))
            .await
            .unwrap();
        assert_eq!(
            outcome.parent_status,
            Some(ParentStatus::Payment(TransactionStatus::Canc))
        );
    }

    #[tokio::test]
    async fn test_wrong_code_fails() {
        let (_, ctx, record) = setup(AuthorisationKind::PaymentInitiation);
        let outcome = TransactionAuthorisationStage
            .apply(&ctx, record, &PsuUpdate::code("000000"))
            .await
            .unwrap();

        assert_eq!(outcome.record.status, ScaStatus::Failed);
        assert_eq!(
            outcome.error.as_ref().and_then(|e| e.code()),
            Some(MessageErrorCode::PsuCredentialsInvalid)
        );
        assert!(outcome.parent_status.is_none());
    }

    #[tokio::test]
    async fn test_missing_code() {
        let (bank, ctx, record) = setup(AuthorisationKind::Consent);
        let result = TransactionAuthorisationStage
            .apply(&ctx, record, &PsuUpdate::code("   "))
            .await;
        assert_matches!(result, Err(Error::Validation { .. }));
        assert!(bank.calls().is_empty());
    }

    #[tokio::test]
    async fn test_not_supported_surfaces_as_failed() {
        let (bank, ctx, record) = setup(AuthorisationKind::Consent);
        bank.fail_on(SpiCall::VerifyScaAuthorisation, SpiError::not_supported());

        let outcome = TransactionAuthorisationStage
            .apply(&ctx, record, &PsuUpdate::code("123456"))
            .await
            .unwrap();
        assert_eq!(outcome.record.status, ScaStatus::Failed);
        assert_eq!(
            outcome.error.as_ref().map(|e| e.http_status()),
            Some(405)
        );
    }
}
