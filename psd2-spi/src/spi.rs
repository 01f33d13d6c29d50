//! The capability trait a bank integration implements.

use async_trait::async_trait;

use crate::consent_data::ConsentData;
use crate::response::SpiResponse;
use crate::types::{
    AuthorisationCodeResult, DecoupledStart, ExecutionResult, PsuAuthorisation, PsuData,
    ScaConfirmation, ScaMethod, SpiContext,
};

/// Bank-specific authentication and execution capabilities.
///
/// Every method receives the current [`ConsentData`] by value and returns the
/// next version inside the [`SpiResponse`]. Calls for one authorisation are
/// strictly sequential: each expects the blob produced by the previous one.
///
/// Every capability defaults to `NOT_SUPPORTED`. The engine treats that as a
/// hard failure of the authorisation, never as a skipped step.
///
/// The kind of operation being authorised is available in
/// [`SpiContext::kind`]; an adapter serving several kinds dispatches on it.
#[async_trait]
pub trait AuthorisationSpi: Send + Sync {
    /// Verify the PSU's static credentials.
    ///
    /// Wrong credentials are reported as
    /// [`SpiResponseStatus::AuthenticationFailed`](crate::SpiResponseStatus::AuthenticationFailed).
    async fn authorise_psu(
        &self,
        _ctx: &SpiContext,
        _psu_data: &PsuData,
        _password: &str,
        consent_data: ConsentData,
    ) -> SpiResponse<PsuAuthorisation> {
        SpiResponse::not_supported(consent_data)
    }

    /// List the SCA methods available to the PSU, in the bank's order.
    async fn request_available_sca_methods(
        &self,
        _ctx: &SpiContext,
        consent_data: ConsentData,
    ) -> SpiResponse<Vec<ScaMethod>> {
        SpiResponse::not_supported(consent_data)
    }

    /// Send an authorisation code (TAN) through the given method.
    async fn request_authorisation_code(
        &self,
        _ctx: &SpiContext,
        _authentication_method_id: &str,
        consent_data: ConsentData,
    ) -> SpiResponse<AuthorisationCodeResult> {
        SpiResponse::not_supported(consent_data)
    }

    /// Notify the PSU out of band (e.g. push to a banking app).
    async fn start_decoupled_authorisation(
        &self,
        _ctx: &SpiContext,
        _authentication_method_id: Option<&str>,
        consent_data: ConsentData,
    ) -> SpiResponse<DecoupledStart> {
        SpiResponse::not_supported(consent_data)
    }

    /// Verify the code the PSU submitted.
    ///
    /// For payment kinds a bank executes (or cancels) the payment as part of
    /// a successful verification and reports the resulting transaction
    /// status.
    async fn verify_sca_authorisation(
        &self,
        _ctx: &SpiContext,
        _confirmation: &ScaConfirmation,
        consent_data: ConsentData,
    ) -> SpiResponse<ExecutionResult> {
        SpiResponse::not_supported(consent_data)
    }

    /// Execute the payment (or cancellation) without SCA, used when the bank
    /// offers no method or exempts the operation.
    async fn execute_without_sca(
        &self,
        _ctx: &SpiContext,
        consent_data: ConsentData,
    ) -> SpiResponse<ExecutionResult> {
        SpiResponse::not_supported(consent_data)
    }
}
