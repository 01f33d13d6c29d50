//! Concurrent requests against one authorisation.

mod common;

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::*;
use psd2_sca::{
    AuthorisationRecord, AuthorisationService, AuthorisationStore, ContentionPolicy, EngineEvent,
    Error, ErrorClass, EventSubscriber, InMemoryAuthorisationStore, NewAuthorisation, PsuUpdate,
    ScaStatus, ServiceConfig, StageEngine, StoreError,
};
use psd2_spi::sandbox::SandboxBank;
use psd2_spi::{
    AuthorisationCodeResult, AuthorisationKind, AuthorisationSpi, ConsentData, DecoupledStart,
    ExecutionResult, PsuAuthorisation, PsuData, ScaConfirmation, ScaMethod, SpiContext,
    SpiResponse,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Sandbox bank whose first credential check blocks until released.
struct GatedBank {
    inner: SandboxBank,
    gate_used: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedBank {
    fn new() -> Self {
        Self {
            inner: SandboxBank::default(),
            gate_used: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl AuthorisationSpi for GatedBank {
    async fn authorise_psu(
        &self,
        ctx: &SpiContext,
        psu_data: &PsuData,
        password: &str,
        consent_data: ConsentData,
    ) -> SpiResponse<PsuAuthorisation> {
        if !self.gate_used.swap(true, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner
            .authorise_psu(ctx, psu_data, password, consent_data)
            .await
    }

    async fn request_available_sca_methods(
        &self,
        ctx: &SpiContext,
        consent_data: ConsentData,
    ) -> SpiResponse<Vec<ScaMethod>> {
        self.inner.request_available_sca_methods(ctx, consent_data).await
    }

    async fn request_authorisation_code(
        &self,
        ctx: &SpiContext,
        authentication_method_id: &str,
        consent_data: ConsentData,
    ) -> SpiResponse<AuthorisationCodeResult> {
        self.inner
            .request_authorisation_code(ctx, authentication_method_id, consent_data)
            .await
    }

    async fn start_decoupled_authorisation(
        &self,
        ctx: &SpiContext,
        authentication_method_id: Option<&str>,
        consent_data: ConsentData,
    ) -> SpiResponse<DecoupledStart> {
        self.inner
            .start_decoupled_authorisation(ctx, authentication_method_id, consent_data)
            .await
    }

    async fn verify_sca_authorisation(
        &self,
        ctx: &SpiContext,
        confirmation: &ScaConfirmation,
        consent_data: ConsentData,
    ) -> SpiResponse<ExecutionResult> {
        self.inner
            .verify_sca_authorisation(ctx, confirmation, consent_data)
            .await
    }

    async fn execute_without_sca(
        &self,
        ctx: &SpiContext,
        consent_data: ConsentData,
    ) -> SpiResponse<ExecutionResult> {
        self.inner.execute_without_sca(ctx, consent_data).await
    }
}

async fn gated_service(contention: ContentionPolicy) -> (Arc<GatedBank>, Arc<AuthorisationService>) {
    let bank = Arc::new(GatedBank::new());
    let engine = StageEngine::standard(bank.clone(), Arc::new(embedded_profile()));
    let config = ServiceConfig {
        contention,
        event_logger: None,
        ..Default::default()
    };
    let service =
        AuthorisationService::new(config, engine, Arc::new(InMemoryAuthorisationStore::new()))
            .await;
    (bank, Arc::new(service))
}

async fn create_payment(service: &AuthorisationService) -> String {
    service
        .create_authorisation(NewAuthorisation::new(
            "payment-1",
            AuthorisationKind::PaymentInitiation,
        ))
        .await
        .unwrap()
        .authorisation_id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_requests_are_serialised() {
    let (bank, service) = gated_service(ContentionPolicy::Wait).await;
    let id = create_payment(&service).await;

    let first = tokio::spawn({
        let service = service.clone();
        let id = id.clone();
        async move {
            service
                .advance(&id, PsuUpdate::credentials(psu(), PASSWORD))
                .await
        }
    });
    bank.entered.notified().await;

    let second = tokio::spawn({
        let service = service.clone();
        let id = id.clone();
        async move {
            service
                .advance(&id, PsuUpdate::credentials(psu(), PASSWORD))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());
    assert_eq!(service.active_locks(), 1);

    bank.release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.sca_status, ScaStatus::ScaMethodSelected);

    // The waiter sees the status the first request left behind
    let second = second.await.unwrap();
    assert_matches!(second, Err(Error::Validation { .. }));

    let stored = service.authorisation(&id).await.unwrap();
    assert_eq!(stored.status, ScaStatus::ScaMethodSelected);
    assert_eq!(stored.version, 2);
    assert_eq!(service.active_locks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reject_policy_fails_fast() {
    let (bank, service) = gated_service(ContentionPolicy::Reject).await;
    let id = create_payment(&service).await;

    let first = tokio::spawn({
        let service = service.clone();
        let id = id.clone();
        async move {
            service
                .advance(&id, PsuUpdate::credentials(psu(), PASSWORD))
                .await
        }
    });
    bank.entered.notified().await;

    let err = service
        .advance(&id, PsuUpdate::code(TAN))
        .await
        .unwrap_err();
    assert_matches!(err, Error::Conflict(ref conflicting) if conflicting == &id);
    assert_eq!(err.class(), ErrorClass::Conflict);

    bank.release.notify_one();
    assert_eq!(
        first.await.unwrap().unwrap().sca_status,
        ScaStatus::ScaMethodSelected
    );
    assert_eq!(service.active_locks(), 0);
}

/// Subscriber that holds on to the first status change until released.
struct GatedSubscriber {
    gate_used: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl EventSubscriber for GatedSubscriber {
    async fn handle_event(&self, event: EngineEvent) {
        if matches!(event, EngineEvent::StatusChanged { .. })
            && !self.gate_used.swap(true, Ordering::SeqCst)
        {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_subscriber_does_not_hold_the_lock() {
    let engine = StageEngine::standard(
        Arc::new(SandboxBank::default()),
        Arc::new(embedded_profile()),
    );
    let config = ServiceConfig {
        contention: ContentionPolicy::Reject,
        event_logger: None,
        ..Default::default()
    };
    let service = Arc::new(
        AuthorisationService::new(config, engine, Arc::new(InMemoryAuthorisationStore::new()))
            .await,
    );
    let subscriber = Arc::new(GatedSubscriber {
        gate_used: AtomicBool::new(false),
        entered: Notify::new(),
        release: Notify::new(),
    });
    service.event_bus().subscribe(subscriber.clone()).await;
    let id = create_payment(&service).await;

    let first = tokio::spawn({
        let service = service.clone();
        let id = id.clone();
        async move {
            service
                .advance(&id, PsuUpdate::credentials(psu(), PASSWORD))
                .await
        }
    });
    subscriber.entered.notified().await;

    // The first request is still publishing but its step is saved
    assert_eq!(service.active_locks(), 0);
    let second = service.advance(&id, PsuUpdate::code(TAN)).await.unwrap();
    assert_eq!(second.sca_status, ScaStatus::Finalised);
    assert!(!first.is_finished());

    subscriber.release.notify_one();
    assert_eq!(
        first.await.unwrap().unwrap().sca_status,
        ScaStatus::ScaMethodSelected
    );
    assert_eq!(service.active_locks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_parallel_authorisations() {
    let h = Harness::embedded(Default::default()).await;
    let service = Arc::new(h.service);

    let mut handles = Vec::new();
    for n in 0..16 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let id = service
                .create_authorisation(NewAuthorisation::new(
                    format!("payment-{}", n),
                    AuthorisationKind::PaymentInitiation,
                ))
                .await?
                .authorisation_id;
            service
                .advance(&id, PsuUpdate::credentials(psu(), PASSWORD))
                .await?;
            service.advance(&id, PsuUpdate::code(TAN)).await
        }));
    }

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.sca_status, ScaStatus::Finalised);
    }
    assert_eq!(h.store.len(), 16);
    assert_eq!(service.active_locks(), 0);
}

/// Store where another writer always gets in between load and save.
struct RacingStore {
    inner: InMemoryAuthorisationStore,
}

#[async_trait]
impl AuthorisationStore for RacingStore {
    async fn insert(&self, record: AuthorisationRecord) -> Result<AuthorisationRecord, StoreError> {
        self.inner.insert(record).await
    }

    async fn load(&self, id: &str) -> Result<AuthorisationRecord, StoreError> {
        self.inner.load(id).await
    }

    async fn save(&self, record: AuthorisationRecord) -> Result<AuthorisationRecord, StoreError> {
        let other = self.inner.load(&record.id).await?;
        self.inner.save(other).await?;
        self.inner.save(record).await
    }
}

#[tokio::test]
async fn test_lost_update_is_a_conflict() {
    let bank = Arc::new(SandboxBank::default());
    let engine = StageEngine::standard(bank.clone(), Arc::new(embedded_profile()));
    let service = AuthorisationService::new(
        ServiceConfig::default(),
        engine,
        Arc::new(RacingStore {
            inner: InMemoryAuthorisationStore::new(),
        }),
    )
    .await;
    let id = create_payment(&service).await;

    let err = service
        .advance(&id, PsuUpdate::credentials(psu(), PASSWORD))
        .await
        .unwrap_err();
    assert_matches!(err, Error::Conflict(_));
    assert_eq!(service.sca_status(&id).await.unwrap(), ScaStatus::Started);
}

/// Store that is down for everything but inserts.
struct UnavailableStore {
    inner: InMemoryAuthorisationStore,
}

#[async_trait]
impl AuthorisationStore for UnavailableStore {
    async fn insert(&self, record: AuthorisationRecord) -> Result<AuthorisationRecord, StoreError> {
        self.inner.insert(record).await
    }

    async fn load(&self, _id: &str) -> Result<AuthorisationRecord, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn save(&self, _record: AuthorisationRecord) -> Result<AuthorisationRecord, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

#[tokio::test]
async fn test_store_outage_is_technical() {
    let bank = Arc::new(SandboxBank::default());
    let engine = StageEngine::standard(bank.clone(), Arc::new(embedded_profile()));
    let service = AuthorisationService::new(
        ServiceConfig::default(),
        engine,
        Arc::new(UnavailableStore {
            inner: InMemoryAuthorisationStore::new(),
        }),
    )
    .await;
    let id = create_payment(&service).await;

    let err = service
        .advance(&id, PsuUpdate::credentials(psu(), PASSWORD))
        .await
        .unwrap_err();
    assert_matches!(err, Error::Storage(StoreError::Unavailable(_)));
    assert!(err.is_technical());
    assert!(bank.calls().is_empty());
}
