//! Authorisation service
//!
//! The entry point the API layer calls. For every request it:
//!
//! 1. takes the per-authorisation lock (or fails fast, see
//!    [`ContentionPolicy`]),
//! 2. loads the record,
//! 3. runs the [`StageEngine`],
//! 4. saves the outcome (optimistic version check),
//! 5. releases the lock, then notifies the [`ParentStatusSink`] and publishes
//!    events.
//!
//! Nothing is saved when the engine returns an error, except the consent
//! data the bank returned with a technical failure.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use psd2_spi::{AuthorisationKind, ConsentData, ConsentStatus};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::approach::ApproachResolver;
use crate::config::{ContentionPolicy, ServiceConfig};
use crate::error::{Error, Result};
use crate::event::{EngineEvent, EventBus, EventLogger};
use crate::record::{AuthorisationRecord, BankReport, NewAuthorisation, PsuUpdate, ScaStatus};
use crate::response::{AuthorisationResponse, LinkHint, MessageErrorCode, ParentStatus};
use crate::stage::{StageEngine, StageOutcome};
use crate::store::AuthorisationStore;

/// Receives status changes of the consent or payment an authorisation
/// secures.
#[async_trait]
pub trait ParentStatusSink: Send + Sync {
    async fn update_status(&self, parent_id: &str, kind: AuthorisationKind, status: ParentStatus);
}

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Holds the lock of one authorisation; drops the table entry once nobody
/// else holds or waits for it.
#[derive(Debug)]
struct AuthorisationLock<'a> {
    table: &'a LockTable,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AuthorisationLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        release(self.table, &self.id);
    }
}

fn release(table: &LockTable, id: &str) {
    table.remove_if(id, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// Runs SCA authorisations against a store.
pub struct AuthorisationService {
    config: ServiceConfig,
    engine: StageEngine,
    store: Arc<dyn AuthorisationStore>,
    event_bus: Arc<EventBus>,
    parent_status_sink: Option<Arc<dyn ParentStatusSink>>,
    locks: LockTable,
}

impl AuthorisationService {
    /// Create a service. Subscribes the event logger when one is configured.
    pub async fn new(
        config: ServiceConfig,
        engine: StageEngine,
        store: Arc<dyn AuthorisationStore>,
    ) -> Self {
        let event_bus = Arc::new(EventBus::with_capacity(config.event_channel_capacity));
        if let Some(logger_config) = &config.event_logger {
            let logger = EventLogger::new(logger_config.clone());
            event_bus.subscribe(Arc::new(logger)).await;
            debug!("Event logger subscribed to the SCA event bus");
        }

        Self {
            config,
            engine,
            store,
            event_bus,
            parent_status_sink: None,
            locks: DashMap::new(),
        }
    }

    pub fn with_parent_status_sink(mut self, sink: Arc<dyn ParentStatusSink>) -> Self {
        self.parent_status_sink = Some(sink);
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn engine(&self) -> &StageEngine {
        &self.engine
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Number of authorisations currently locked or waited on.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    async fn lock(&self, id: &str) -> Result<AuthorisationLock<'_>> {
        let mutex = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = match mutex.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) if self.config.contention == ContentionPolicy::Reject => {
                drop(mutex);
                release(&self.locks, id);
                warn!("Rejected concurrent request for authorisation {}", id);
                return Err(Error::Conflict(id.to_string()));
            }
            Err(_) => {
                debug!("Waiting for concurrent request on authorisation {}", id);
                mutex.lock_owned().await
            }
        };

        Ok(AuthorisationLock {
            table: &self.locks,
            id: id.to_string(),
            guard: Some(guard),
        })
    }

    /// Create an authorisation for a consent or payment.
    pub async fn create_authorisation(
        &self,
        new: NewAuthorisation,
    ) -> Result<AuthorisationResponse> {
        let profile = self.engine.context().profile();
        let psu_missing = new.psu_data.as_ref().map_or(true, |p| p.is_empty());
        if profile.psu_in_initial_request_mandated && psu_missing {
            return Err(Error::validation(
                MessageErrorCode::FormatError,
                "PSU identification is mandatory when starting the authorisation",
            ));
        }

        let requested = new.sca_approach;
        let mut record = AuthorisationRecord::new(new);
        record.sca_approach = Some(ApproachResolver::initial(record.kind, profile, requested));
        let (link, handoff_event) = self.engine.initial_hint(&mut record)?;

        let stored = self.store.insert(record).await?;
        info!(
            "Created {} authorisation {} for {} ({})",
            stored.kind,
            stored.id,
            stored.parent_id,
            stored
                .sca_approach
                .map_or_else(|| "no approach".to_string(), |a| a.to_string())
        );

        let mut events = vec![EngineEvent::AuthorisationCreated {
            authorisation_id: stored.id.clone(),
            parent_id: stored.parent_id.clone(),
            kind: stored.kind,
            status: stored.status,
        }];
        events.extend(handoff_event);
        self.event_bus.publish_all(events).await;

        Ok(AuthorisationResponse::for_record(&stored).with_link(link))
    }

    /// Apply a PSU update to an authorisation.
    pub async fn advance(
        &self,
        authorisation_id: &str,
        update: PsuUpdate,
    ) -> Result<AuthorisationResponse> {
        let lock = self.lock(authorisation_id).await?;

        let record = self.store.load(authorisation_id).await?;
        let from = record.status;
        let outcome = match self.engine.advance(record.clone(), &update).await {
            Ok(outcome) => outcome,
            Err(Error::Spi {
                error,
                consent_data: Some(consent_data),
            }) => {
                self.keep_consent_data(record, consent_data).await?;
                return Err(Error::spi(error));
            }
            Err(err) => return Err(err),
        };

        let committed = self.commit(from, outcome).await?;
        drop(lock);
        Ok(self.publish(committed).await)
    }

    /// Store the blob the bank returned with a technical failure on the last
    /// saved record. Status and every other field stay as they were.
    async fn keep_consent_data(
        &self,
        mut record: AuthorisationRecord,
        consent_data: ConsentData,
    ) -> Result<()> {
        if record.consent_data == consent_data {
            return Ok(());
        }
        warn!(
            "Technical SPI failure for authorisation {}, keeping the returned consent data",
            record.id
        );
        record.consent_data = consent_data;
        record.last_action_at = Utc::now();
        self.store.save(record).await?;
        Ok(())
    }

    /// Current SCA status of an authorisation.
    pub async fn sca_status(&self, authorisation_id: &str) -> Result<ScaStatus> {
        Ok(self.store.load(authorisation_id).await?.status)
    }

    /// Full stored record of an authorisation.
    pub async fn authorisation(&self, authorisation_id: &str) -> Result<AuthorisationRecord> {
        Ok(self.store.load(authorisation_id).await?)
    }

    /// Apply the result the bank reports after the PSU completed (or
    /// abandoned) SCA outside the API channel.
    ///
    /// A SCA_METHOD_SELECTED report ends the hand-off: the TPP sends the
    /// code through [`advance`](Self::advance) like an embedded flow.
    pub async fn complete_out_of_band(
        &self,
        authorisation_id: &str,
        report: BankReport,
    ) -> Result<AuthorisationResponse> {
        let lock = self.lock(authorisation_id).await?;

        let mut record = self.store.load(authorisation_id).await?;
        if record.is_terminal() {
            return Err(Error::TerminalState {
                authorisation_id: record.id,
                status: record.status,
            });
        }
        if record.handoff.is_none() {
            return Err(Error::InvalidReport(format!(
                "authorisation {} was not handed off to the bank",
                record.id
            )));
        }
        if !matches!(
            report.status,
            ScaStatus::ScaMethodSelected | ScaStatus::Finalised | ScaStatus::Failed
        ) {
            return Err(Error::InvalidReport(format!(
                "status {} cannot be reported by the bank",
                report.status
            )));
        }
        let from = record.status;
        if !from.can_transition(record.kind, report.status) {
            return Err(Error::InvalidReport(format!(
                "authorisation {} cannot move from {} to {}",
                record.id, from, report.status
            )));
        }

        if let Some(consent_data) = report.consent_data {
            record.consent_data = consent_data;
        }
        if let Some(method) = report.chosen_sca_method {
            record.chosen_sca_method = Some(method);
        }
        record.available_sca_methods.clear();

        let parent_status = match (record.kind, report.status, report.transaction_status) {
            (AuthorisationKind::Consent, ScaStatus::Finalised, _) => {
                Some(ParentStatus::Consent(ConsentStatus::Valid))
            }
            (AuthorisationKind::Consent, ScaStatus::Failed, _) => {
                Some(ParentStatus::Consent(ConsentStatus::Rejected))
            }
            (_, _, Some(status)) => Some(ParentStatus::Payment(status)),
            _ => None,
        };
        // A method selected at the bank hands the record back to the API
        // channel for the code.
        let link = match report.status {
            ScaStatus::Finalised => LinkHint::Finalised,
            ScaStatus::Failed => LinkHint::None,
            _ => {
                record.handoff = None;
                LinkHint::AuthoriseTransaction
            }
        };

        info!(
            "Bank reported {} for authorisation {}",
            report.status, record.id
        );
        record.status = report.status;
        let mut outcome = StageOutcome::proceed(record, link);
        if let Some(status) = parent_status {
            outcome = outcome.with_parent_status(status);
        }
        let committed = self.commit(from, outcome).await?;
        drop(lock);
        Ok(self.publish(committed).await)
    }

    /// Save a stage outcome and collect what happened.
    async fn commit(&self, from: ScaStatus, outcome: StageOutcome) -> Result<Committed> {
        let mut record = outcome.record.clone();
        record.last_action_at = Utc::now();
        let stored = self.store.save(record).await?;
        let response = outcome.response_for(&stored);

        let mut events = outcome.events;
        if stored.status != from {
            info!(
                "Authorisation {} moved from {} to {}",
                stored.id, from, stored.status
            );
            events.push(EngineEvent::StatusChanged {
                authorisation_id: stored.id.clone(),
                kind: stored.kind,
                from,
                to: stored.status,
            });
        }
        if let Some(status) = outcome.parent_status {
            events.push(EngineEvent::ParentStatusChanged {
                authorisation_id: stored.id.clone(),
                parent_id: stored.parent_id.clone(),
                status,
            });
        }

        Ok(Committed {
            parent: outcome
                .parent_status
                .map(|status| (stored.parent_id.clone(), stored.kind, status)),
            response,
            events,
        })
    }

    /// Notify the parent status sink and event subscribers. Runs after the
    /// authorisation lock is released.
    async fn publish(&self, committed: Committed) -> AuthorisationResponse {
        if let (Some(sink), Some((parent_id, kind, status))) =
            (&self.parent_status_sink, committed.parent)
        {
            sink.update_status(&parent_id, kind, status).await;
        }
        self.event_bus.publish_all(committed.events).await;
        committed.response
    }
}

/// A saved step, waiting to be published.
struct Committed {
    response: AuthorisationResponse,
    events: Vec<EngineEvent>,
    parent: Option<(String, AuthorisationKind, ParentStatus)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AspspProfile;
    use crate::store::InMemoryAuthorisationStore;
    use assert_matches::assert_matches;
    use psd2_spi::sandbox::SandboxBank;
    use psd2_spi::{PsuData, ScaApproach};

    async fn service(profile: AspspProfile, config: ServiceConfig) -> AuthorisationService {
        let engine = StageEngine::standard(Arc::new(SandboxBank::default()), Arc::new(profile));
        AuthorisationService::new(config, engine, Arc::new(InMemoryAuthorisationStore::new()))
            .await
    }

    fn embedded() -> AspspProfile {
        AspspProfile {
            sca_approaches: vec![ScaApproach::Embedded],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_consent_asks_for_identification() {
        let service = service(embedded(), ServiceConfig::default()).await;
        let response = service
            .create_authorisation(NewAuthorisation::new("consent-1", AuthorisationKind::Consent))
            .await
            .unwrap();

        assert_eq!(response.sca_status, ScaStatus::Received);
        assert_eq!(response.sca_approach, Some(ScaApproach::Embedded));
        assert_eq!(response.link, LinkHint::UpdatePsuIdentification);
        assert_eq!(
            service.sca_status(&response.authorisation_id).await.unwrap(),
            ScaStatus::Received
        );
    }

    #[tokio::test]
    async fn test_mandated_psu_is_enforced() {
        let profile = AspspProfile {
            psu_in_initial_request_mandated: true,
            ..embedded()
        };
        let service = service(profile, ServiceConfig::default()).await;

        let result = service
            .create_authorisation(NewAuthorisation::new(
                "payment-1",
                AuthorisationKind::PaymentInitiation,
            ))
            .await;
        assert_matches!(result, Err(Error::Validation { .. }));

        let response = service
            .create_authorisation(
                NewAuthorisation::new("payment-1", AuthorisationKind::PaymentInitiation)
                    .with_psu_data(PsuData::new("PSU-Sandbox")),
            )
            .await
            .unwrap();
        assert_eq!(response.sca_status, ScaStatus::Started);
    }

    #[tokio::test]
    async fn test_unknown_authorisation() {
        let service = service(embedded(), ServiceConfig::default()).await;
        assert_matches!(
            service.advance("missing", PsuUpdate::password("12345")).await,
            Err(Error::AuthorisationNotFound(_))
        );
        assert_eq!(service.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_reject_policy_fails_fast() {
        let config = ServiceConfig {
            contention: ContentionPolicy::Reject,
            ..Default::default()
        };
        let service = service(embedded(), config).await;

        let held = service.lock("auth-1").await.unwrap();
        assert_matches!(service.lock("auth-1").await, Err(Error::Conflict(_)));
        assert_eq!(service.active_locks(), 1);

        drop(held);
        assert_eq!(service.active_locks(), 0);
        assert!(service.lock("auth-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_out_of_band_requires_handoff() {
        let service = service(embedded(), ServiceConfig::default()).await;
        let created = service
            .create_authorisation(NewAuthorisation::new(
                "payment-1",
                AuthorisationKind::PaymentInitiation,
            ))
            .await
            .unwrap();

        let result = service
            .complete_out_of_band(&created.authorisation_id, BankReport::new(ScaStatus::Finalised))
            .await;
        assert_matches!(result, Err(Error::InvalidReport(_)));
    }
}
