//! Service Provider Interface (SPI) for the PSD2 SCA authorisation engine
//!
//! This crate defines the contract between the bank-agnostic SCA engine and a
//! bank integration ("ASPSP adapter"). It contains:
//!
//! - The opaque [`ConsentData`] carrier owned by the bank and threaded through
//!   every SPI call.
//! - The [`SpiResponse`] wrapper every call returns: an outcome plus the next
//!   version of the consent data.
//! - The [`AuthorisationSpi`] capability trait. Every capability defaults to
//!   [`SpiResponseStatus::NotSupported`] so an adapter only implements what the
//!   bank supports.
//! - Shared domain vocabulary ([`PsuData`], [`ScaMethod`], [`ChallengeData`],
//!   [`AuthorisationKind`], [`ScaApproach`], ...).
//! - A configurable in-memory [`sandbox::SandboxBank`] adapter.

pub mod consent_data;
pub mod error;
pub mod response;
pub mod sandbox;
pub mod spi;
pub mod types;

pub use consent_data::ConsentData;
pub use error::{SpiError, SpiResponseStatus};
pub use response::SpiResponse;
pub use spi::AuthorisationSpi;
pub use types::{
    AuthorisationCodeResult, AuthorisationKind, ChallengeData, ConsentStatus, DecoupledStart, ExecutionResult,
    PsuAuthorisation, PsuData, ScaApproach, ScaConfirmation, ScaMethod, SpiContext,
    TransactionStatus,
};
