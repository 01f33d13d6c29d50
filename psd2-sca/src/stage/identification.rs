//! Consent authorisation in RECEIVED: identify the PSU, or authenticate
//! straight away when the password is already present.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::{AuthorisationRecord, PsuUpdate, ScaStatus};
use crate::response::MessageErrorCode;
use crate::stage::authentication::{authenticate, merge_psu_data};
use crate::stage::{Stage, StageContext, StageOutcome};

pub struct IdentificationStage;

#[async_trait]
impl Stage for IdentificationStage {
    async fn apply(
        &self,
        ctx: &StageContext,
        mut record: AuthorisationRecord,
        update: &PsuUpdate,
    ) -> Result<StageOutcome> {
        if update.password_value().is_some() {
            return authenticate(ctx, record, update).await;
        }

        merge_psu_data(&mut record, update)?;
        if record.psu_data.is_empty() {
            return Err(Error::validation(
                MessageErrorCode::FormatError,
                "Please provide the PSU identification data",
            ));
        }

        debug!("PSU identified for consent authorisation {}", record.id);
        Ok(StageOutcome::advance_to(record, ScaStatus::PsuIdentified))
    }
}
