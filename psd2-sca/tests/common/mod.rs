#![allow(dead_code)]

use async_trait::async_trait;
use psd2_sca::{
    AspspProfile, AuthorisationService, EngineEvent, EventSubscriber, InMemoryAuthorisationStore,
    ParentStatus, ParentStatusSink, ServiceConfig, StageEngine,
};
use psd2_spi::sandbox::{SandboxBank, SandboxConfig};
use psd2_spi::{AuthorisationKind, PsuData, ScaApproach};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const PSU_ID: &str = "PSU-Sandbox";
pub const PASSWORD: &str = "12345";
pub const TAN: &str = "123456";

pub fn psu() -> PsuData {
    PsuData::new(PSU_ID)
}

pub fn embedded_profile() -> AspspProfile {
    AspspProfile {
        sca_approaches: vec![ScaApproach::Embedded, ScaApproach::Decoupled],
        ..Default::default()
    }
}

/// Records every parent status update.
#[derive(Default)]
pub struct RecordingSink {
    pub updates: Mutex<Vec<(String, AuthorisationKind, ParentStatus)>>,
}

#[async_trait]
impl ParentStatusSink for RecordingSink {
    async fn update_status(&self, parent_id: &str, kind: AuthorisationKind, status: ParentStatus) {
        self.updates
            .lock()
            .await
            .push((parent_id.to_string(), kind, status));
    }
}

/// Records every engine event.
#[derive(Default)]
pub struct RecordingSubscriber {
    pub events: Mutex<Vec<EngineEvent>>,
}

#[async_trait]
impl EventSubscriber for RecordingSubscriber {
    async fn handle_event(&self, event: EngineEvent) {
        self.events.lock().await.push(event);
    }
}

pub struct Harness {
    pub bank: Arc<SandboxBank>,
    pub store: Arc<InMemoryAuthorisationStore>,
    pub sink: Arc<RecordingSink>,
    pub subscriber: Arc<RecordingSubscriber>,
    pub service: AuthorisationService,
}

impl Harness {
    pub async fn new(profile: AspspProfile, bank: SandboxConfig) -> Self {
        Self::with_config(profile, bank, ServiceConfig::default()).await
    }

    pub async fn embedded(bank: SandboxConfig) -> Self {
        Self::new(embedded_profile(), bank).await
    }

    pub async fn with_config(
        profile: AspspProfile,
        bank: SandboxConfig,
        config: ServiceConfig,
    ) -> Self {
        let bank = Arc::new(SandboxBank::new(bank));
        let store = Arc::new(InMemoryAuthorisationStore::new());
        let sink = Arc::new(RecordingSink::default());
        let subscriber = Arc::new(RecordingSubscriber::default());

        let engine = StageEngine::standard(bank.clone(), Arc::new(profile));
        let service = AuthorisationService::new(config, engine, store.clone())
            .await
            .with_parent_status_sink(sink.clone());
        service.event_bus().subscribe(subscriber.clone()).await;

        Self {
            bank,
            store,
            sink,
            subscriber,
            service,
        }
    }

    pub async fn parent_updates(&self) -> Vec<(String, AuthorisationKind, ParentStatus)> {
        self.sink.updates.lock().await.clone()
    }

    pub async fn events(&self) -> Vec<EngineEvent> {
        self.subscriber.events.lock().await.clone()
    }
}
