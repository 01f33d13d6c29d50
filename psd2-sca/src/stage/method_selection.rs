//! PSU_AUTHENTICATED: the PSU picks one of the offered methods.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::record::{AuthorisationRecord, PsuUpdate};
use crate::response::MessageErrorCode;
use crate::stage::authentication::proceed_with_method;
use crate::stage::{Stage, StageContext, StageOutcome};

pub struct MethodSelectionStage;

#[async_trait]
impl Stage for MethodSelectionStage {
    async fn apply(
        &self,
        ctx: &StageContext,
        mut record: AuthorisationRecord,
        update: &PsuUpdate,
    ) -> Result<StageOutcome> {
        let method_id = update
            .authentication_method_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                Error::validation(
                    MessageErrorCode::FormatError,
                    "Please provide the authentication method id",
                )
            })?;

        let method = record
            .offered_method(method_id)
            .cloned()
            .ok_or_else(|| Error::ScaMethodNotOffered(method_id.to_string()))?;

        record.available_sca_methods.clear();
        record.chosen_sca_method = Some(method.clone());
        proceed_with_method(ctx, record, method).await
    }
}
