//! SCA authorisation stage engine
//!
//! A [`Stage`] handles one `(kind, status)` pair: it receives the working
//! copy of the record plus the PSU's update, drives zero or more sequential
//! SPI calls, and returns a [`StageOutcome`] describing the new record and
//! what to tell the TPP. The [`StageEngine`] looks stages up in a
//! [`StageRegistry`], runs the hand-off guard first, and checks every status
//! a stage produces against [`ScaStatus::permitted_next`].
//!
//! # Failures
//!
//! - A validation problem is an `Err` and the working copy is dropped.
//! - A bank refusal (wrong credentials, unsupported capability, logical
//!   failure) is a normal outcome: the record moves to FAILED and is saved
//!   together with the consent data the bank returned.
//! - A technical failure is an `Err` carrying the consent data the bank
//!   returned. The service stores that blob and nothing else from the
//!   working copy.

mod authentication;
mod identification;
mod method_selection;
mod transaction_authorisation;

pub use authentication::AuthenticationStage;
pub use identification::IdentificationStage;
pub use method_selection::MethodSelectionStage;
pub use transaction_authorisation::TransactionAuthorisationStage;

use async_trait::async_trait;
use chrono::Utc;
use psd2_spi::{AuthorisationKind, AuthorisationSpi, ChallengeData, ScaApproach, SpiError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::approach::ApproachResolver;
use crate::config::{AspspProfile, CapabilityProvider};
use crate::error::{Error, Result};
use crate::event::EngineEvent;
use crate::handoff::HandoffService;
use crate::record::{AuthorisationRecord, Handoff, PsuUpdate, ScaStatus};
use crate::response::{
    AuthorisationResponse, LinkHint, MessageError, MessageErrorCode, ParentStatus, ServiceType,
};

// ---------------------------------------------------------------------------
// Stage context and outcome
// ---------------------------------------------------------------------------

/// Collaborators every stage may use.
#[derive(Clone)]
pub struct StageContext {
    pub spi: Arc<dyn AuthorisationSpi>,
    pub capabilities: Arc<dyn CapabilityProvider>,
}

impl StageContext {
    pub fn new(spi: Arc<dyn AuthorisationSpi>, capabilities: Arc<dyn CapabilityProvider>) -> Self {
        Self { spi, capabilities }
    }

    pub fn profile(&self) -> &AspspProfile {
        self.capabilities.profile()
    }
}

/// Result of one stage.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// The record to persist.
    pub record: AuthorisationRecord,
    pub link: LinkHint,
    pub challenge_data: Option<ChallengeData>,
    pub psu_message: Option<String>,
    pub error: Option<MessageError>,
    /// Status the consent or payment moves to as a consequence.
    pub parent_status: Option<ParentStatus>,
    /// Events besides the status change, which the service derives itself.
    pub events: Vec<EngineEvent>,
}

impl StageOutcome {
    pub fn proceed(record: AuthorisationRecord, link: LinkHint) -> Self {
        Self {
            record,
            link,
            challenge_data: None,
            psu_message: None,
            error: None,
            parent_status: None,
            events: Vec::new(),
        }
    }

    /// Move the record to `status` and point the TPP at the natural next
    /// step for it.
    pub fn advance_to(mut record: AuthorisationRecord, status: ScaStatus) -> Self {
        record.status = status;
        let link = match status {
            ScaStatus::PsuIdentified => LinkHint::StartAuthorisationWithPsuAuthentication,
            ScaStatus::PsuAuthenticated => LinkHint::SelectAuthenticationMethod,
            ScaStatus::ScaMethodSelected => LinkHint::AuthoriseTransaction,
            ScaStatus::Finalised | ScaStatus::Exempted => LinkHint::Finalised,
            _ => LinkHint::None,
        };
        Self::proceed(record, link)
    }

    /// Move the record to FAILED with the given error.
    pub fn fail(mut record: AuthorisationRecord, error: MessageError) -> Self {
        record.status = ScaStatus::Failed;
        record.available_sca_methods.clear();
        let mut outcome = Self::proceed(record, LinkHint::None);
        outcome.error = Some(error);
        outcome
    }

    pub fn fail_with(
        record: AuthorisationRecord,
        code: MessageErrorCode,
        text: impl Into<String>,
    ) -> Self {
        let service = ServiceType::from(record.kind);
        Self::fail(record, MessageError::with_text(service, code, text))
    }

    /// Move the record to FAILED because the bank refused a call.
    pub fn spi_failure(record: AuthorisationRecord, err: &SpiError) -> Self {
        warn!(
            "SPI refused step for authorisation {} in status {}: {}",
            record.id, record.status, err
        );
        let service = ServiceType::from(record.kind);
        Self::fail(record, MessageError::from_spi(service, err))
    }

    pub fn with_challenge(mut self, challenge: Option<ChallengeData>) -> Self {
        self.challenge_data = challenge;
        self
    }

    pub fn with_psu_message(mut self, message: Option<String>) -> Self {
        self.psu_message = message;
        self
    }

    pub fn with_parent_status(mut self, status: ParentStatus) -> Self {
        self.parent_status = Some(status);
        self
    }

    pub fn with_event(mut self, event: EngineEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Response for the TPP, built from the record as it was stored.
    pub fn response_for(&self, stored: &AuthorisationRecord) -> AuthorisationResponse {
        let mut response = AuthorisationResponse::for_record(stored)
            .with_link(self.link.clone())
            .with_challenge(self.challenge_data.clone())
            .with_psu_message(self.psu_message.clone())
            .with_parent_status(self.parent_status);
        response.error = self.error.clone();
        response
    }
}

// ---------------------------------------------------------------------------
// Stage trait and registry
// ---------------------------------------------------------------------------

/// Handler for one `(kind, status)` pair.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn apply(
        &self,
        ctx: &StageContext,
        record: AuthorisationRecord,
        update: &PsuUpdate,
    ) -> Result<StageOutcome>;
}

/// Stage handlers keyed by authorisation kind and current status.
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<(AuthorisationKind, ScaStatus), Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers for every non-terminal status of every kind.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        let authentication: Arc<dyn Stage> = Arc::new(AuthenticationStage);
        let selection: Arc<dyn Stage> = Arc::new(MethodSelectionStage);
        let authorisation: Arc<dyn Stage> = Arc::new(TransactionAuthorisationStage);

        registry.register(
            AuthorisationKind::Consent,
            ScaStatus::Received,
            Arc::new(IdentificationStage),
        );
        registry.register(
            AuthorisationKind::Consent,
            ScaStatus::PsuIdentified,
            authentication.clone(),
        );
        for kind in [
            AuthorisationKind::PaymentInitiation,
            AuthorisationKind::PaymentCancellation,
        ] {
            registry.register(kind, ScaStatus::Started, authentication.clone());
        }
        for kind in [
            AuthorisationKind::Consent,
            AuthorisationKind::PaymentInitiation,
            AuthorisationKind::PaymentCancellation,
        ] {
            registry.register(kind, ScaStatus::PsuAuthenticated, selection.clone());
            registry.register(kind, ScaStatus::ScaMethodSelected, authorisation.clone());
        }
        registry
    }

    /// Register (or replace) the handler for a pair.
    pub fn register(&mut self, kind: AuthorisationKind, status: ScaStatus, stage: Arc<dyn Stage>) {
        self.stages.insert((kind, status), stage);
    }

    pub fn get(&self, kind: AuthorisationKind, status: ScaStatus) -> Option<Arc<dyn Stage>> {
        self.stages.get(&(kind, status)).cloned()
    }

    pub fn contains(&self, kind: AuthorisationKind, status: ScaStatus) -> bool {
        self.stages.contains_key(&(kind, status))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs one step of an authorisation. Holds no per-authorisation state.
#[derive(Clone)]
pub struct StageEngine {
    ctx: StageContext,
    registry: StageRegistry,
}

impl StageEngine {
    pub fn new(ctx: StageContext, registry: StageRegistry) -> Self {
        Self { ctx, registry }
    }

    /// Engine with the standard stage table.
    pub fn standard(
        spi: Arc<dyn AuthorisationSpi>,
        capabilities: Arc<dyn CapabilityProvider>,
    ) -> Self {
        Self::new(StageContext::new(spi, capabilities), StageRegistry::standard())
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Apply `update` to `record`.
    ///
    /// Terminal records are refused. Records already handed off to the bank
    /// get their hand-off hint again, or a fresh link once the old one has
    /// expired. REDIRECT and OAUTH records still in their initial status get
    /// a link issued. Everything else goes to the stage for `(kind, status)`.
    pub async fn advance(
        &self,
        mut record: AuthorisationRecord,
        update: &PsuUpdate,
    ) -> Result<StageOutcome> {
        if record.is_terminal() {
            return Err(Error::TerminalState {
                authorisation_id: record.id,
                status: record.status,
            });
        }

        let expired_link = match &record.handoff {
            Some(Handoff::Redirect {
                expires_at, oauth, ..
            }) if *expires_at <= Utc::now() => Some((*expires_at, *oauth)),
            _ => None,
        };
        if let Some((expired_at, oauth)) = expired_link {
            info!(
                "Link for authorisation {} expired at {}, issuing a new one",
                record.id, expired_at
            );
            let approach = if oauth {
                ScaApproach::OAuth
            } else {
                ScaApproach::Redirect
            };
            let (hint, event) =
                HandoffService::issue_redirect(self.ctx.profile(), &mut record, approach)?;
            return Ok(StageOutcome::proceed(record, hint).with_event(event));
        }
        if let Some(handoff) = &record.handoff {
            debug!(
                "Authorisation {} is handed off, repeating the hint",
                record.id
            );
            let hint = HandoffService::hint(handoff);
            return Ok(StageOutcome::proceed(record, hint));
        }

        let approach = ApproachResolver::resolve(self.ctx.profile(), &record);
        record.sca_approach = Some(approach);
        if approach.is_redirect_like() && record.status == ScaStatus::initial(record.kind) {
            let (hint, event) =
                HandoffService::issue_redirect(self.ctx.profile(), &mut record, approach)?;
            return Ok(StageOutcome::proceed(record, hint).with_event(event));
        }

        let stage = self
            .registry
            .get(record.kind, record.status)
            .ok_or(Error::UnsupportedStage {
                kind: record.kind,
                status: record.status,
            })?;

        let kind = record.kind;
        let from = record.status;
        debug!(
            "Applying {} stage in status {} to authorisation {}",
            kind, from, record.id
        );
        let outcome = stage.apply(&self.ctx, record, update).await?;

        let to = outcome.record.status;
        if !from.can_transition(kind, to) {
            return Err(Error::IllegalTransition { kind, from, to });
        }
        Ok(outcome)
    }

    /// First hint for a freshly created record. REDIRECT and OAUTH records
    /// get their link right away.
    pub fn initial_hint(
        &self,
        record: &mut AuthorisationRecord,
    ) -> Result<(LinkHint, Option<EngineEvent>)> {
        let approach = ApproachResolver::resolve(self.ctx.profile(), record);
        record.sca_approach = Some(approach);
        if approach.is_redirect_like() {
            let (hint, event) =
                HandoffService::issue_redirect(self.ctx.profile(), record, approach)?;
            return Ok((hint, Some(event)));
        }

        let hint = if record.kind == AuthorisationKind::Consent && record.psu_data.is_empty() {
            LinkHint::UpdatePsuIdentification
        } else {
            LinkHint::StartAuthorisationWithPsuAuthentication
        };
        Ok((hint, None))
    }
}
