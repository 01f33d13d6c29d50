//! # PSD2 SCA Authorisation Engine
//!
//! This crate drives a PSU through Strong Customer Authentication for
//! NextGenPSD2 account information consents, payment initiations and payment
//! cancellations. It is agnostic to how a bank authenticates: every
//! bank-specific step goes through the [`psd2_spi::AuthorisationSpi`] trait.
//!
//! ## Architecture
//!
//! - **Record**: one [`AuthorisationRecord`] per SCA flow, with a status that
//!   only moves along the transition table in [`record`].
//! - **Approach Resolver**: picks EMBEDDED, DECOUPLED, REDIRECT or OAUTH from
//!   the deployment's [`AspspProfile`].
//! - **Stage Engine**: handlers keyed by `(kind, status)`, preceded by a
//!   hand-off guard for redirect and decoupled flows.
//! - **Store**: versioned repository of records.
//! - **Service**: per-authorisation locking, load, engine, save, events.
//! - **Event Bus**: broadcasts [`EngineEvent`]s to subscribers such as the
//!   [`event::EventLogger`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use psd2_sca::{
//!     AspspProfile, AuthorisationService, InMemoryAuthorisationStore, NewAuthorisation,
//!     PsuUpdate, ServiceConfig, StageEngine,
//! };
//! use psd2_spi::sandbox::SandboxBank;
//! use psd2_spi::{AuthorisationKind, PsuData};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let profile = AspspProfile::from_env()?;
//!     let engine = StageEngine::standard(Arc::new(SandboxBank::default()), Arc::new(profile));
//!     let service = AuthorisationService::new(
//!         ServiceConfig::default(),
//!         engine,
//!         Arc::new(InMemoryAuthorisationStore::new()),
//!     )
//!     .await;
//!
//!     let created = service
//!         .create_authorisation(NewAuthorisation::new(
//!             "payment-1",
//!             AuthorisationKind::PaymentInitiation,
//!         ))
//!         .await?;
//!
//!     let response = service
//!         .advance(
//!             &created.authorisation_id,
//!             PsuUpdate::credentials(PsuData::new("PSU-Sandbox"), "12345"),
//!         )
//!         .await?;
//!     println!("SCA status: {}", response.sca_status);
//!     Ok(())
//! }
//! ```

pub mod approach;
pub mod config;
pub mod error;
pub mod event;
pub mod handoff;
pub mod record;
pub mod response;
pub mod service;
pub mod stage;
pub mod store;

pub use approach::ApproachResolver;
pub use config::{AspspProfile, CapabilityProvider, ContentionPolicy, ServiceConfig};
pub use error::{Error, ErrorClass, Result};
pub use event::{EngineEvent, EventBus, EventSubscriber};
pub use handoff::HandoffService;
pub use record::{
    AuthorisationRecord, BankReport, ConsentScope, Handoff, NewAuthorisation, PsuUpdate,
    ScaStatus,
};
pub use response::{
    AuthorisationResponse, LinkHint, MessageError, MessageErrorCode, ParentStatus, ServiceType,
    TppMessage,
};
pub use service::{AuthorisationService, ParentStatusSink};
pub use stage::{Stage, StageContext, StageEngine, StageOutcome, StageRegistry};
pub use store::{AuthorisationStore, InMemoryAuthorisationStore, StoreError};
