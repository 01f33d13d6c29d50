//! In-memory sandbox bank.
//!
//! `SandboxBank` implements every [`AuthorisationSpi`] capability against a
//! static configuration. It is meant for demos, local development and tests:
//!
//! - every response carries a fresh consent blob tagged
//!   `<authorisation id>#<sequence>`, with a sequence that only grows;
//! - a call presenting any blob other than the last one issued for that
//!   authorisation fails with a technical failure, which makes stale or
//!   merged consent data visible immediately;
//! - failures can be injected per capability and every call is logged.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::consent_data::ConsentData;
use crate::error::SpiError;
use crate::response::SpiResponse;
use crate::spi::AuthorisationSpi;
use crate::types::{
    AuthorisationCodeResult, AuthorisationKind, ChallengeData, DecoupledStart, ExecutionResult,
    PsuAuthorisation, PsuData, ScaConfirmation, ScaMethod, SpiContext, TransactionStatus,
};

/// The SPI capability a call went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpiCall {
    AuthorisePsu,
    RequestAvailableScaMethods,
    RequestAuthorisationCode,
    StartDecoupledAuthorisation,
    VerifyScaAuthorisation,
    ExecuteWithoutSca,
}

/// Static behaviour of a [`SandboxBank`].
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// PSU id to password.
    pub credentials: HashMap<String, String>,
    /// Methods offered to every PSU, in order.
    pub sca_methods: Vec<ScaMethod>,
    /// The only code `verify_sca_authorisation` accepts.
    pub tan: String,
    /// Whether a successful credential check exempts the operation from SCA.
    pub sca_exempted: bool,
    /// Message returned when a decoupled authorisation starts.
    pub decoupled_psu_message: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let mut credentials = HashMap::new();
        credentials.insert("PSU-Sandbox".to_string(), "12345".to_string());
        Self {
            credentials,
            sca_methods: vec![ScaMethod::new("sms", "SMS_OTP").with_name("SMS")],
            tan: "123456".to_string(),
            sca_exempted: false,
            decoupled_psu_message: "Please check your app to continue".to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn with_psu(mut self, psu_id: &str, password: &str) -> Self {
        self.credentials
            .insert(psu_id.to_string(), password.to_string());
        self
    }

    pub fn with_methods(mut self, methods: Vec<ScaMethod>) -> Self {
        self.sca_methods = methods;
        self
    }

    pub fn with_tan(mut self, tan: &str) -> Self {
        self.tan = tan.to_string();
        self
    }

    pub fn exempted(mut self) -> Self {
        self.sca_exempted = true;
        self
    }
}

/// A configurable in-memory bank integration.
#[derive(Debug, Default)]
pub struct SandboxBank {
    config: SandboxConfig,
    failures: Mutex<HashMap<SpiCall, SpiError>>,
    issued: Mutex<HashMap<String, ConsentData>>,
    calls: Mutex<Vec<(String, SpiCall)>>,
    sequence: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SandboxBank {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Make every subsequent call to `call` fail with `error`.
    pub fn fail_on(&self, call: SpiCall, error: SpiError) {
        lock(&self.failures).insert(call, error);
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Capabilities called so far, in order, across all authorisations.
    pub fn calls(&self) -> Vec<SpiCall> {
        lock(&self.calls).iter().map(|(_, call)| *call).collect()
    }

    /// Capabilities called so far for one authorisation.
    pub fn calls_for(&self, authorisation_id: &str) -> Vec<SpiCall> {
        lock(&self.calls)
            .iter()
            .filter(|(id, _)| id == authorisation_id)
            .map(|(_, call)| *call)
            .collect()
    }

    /// The last consent blob handed out for an authorisation.
    pub fn last_issued(&self, authorisation_id: &str) -> Option<ConsentData> {
        lock(&self.issued).get(authorisation_id).cloned()
    }

    /// Sequence number embedded in a blob issued by a sandbox bank.
    pub fn sequence_of(data: &ConsentData) -> Option<u64> {
        let text = std::str::from_utf8(data.as_bytes()).ok()?;
        let (_, sequence) = text.rsplit_once('#')?;
        sequence.parse().ok()
    }

    /// Validate the incoming blob, log the call and mint the next blob.
    ///
    /// Returns `Err` with the response to hand back when the incoming blob is
    /// stale or an injected failure applies.
    fn enter<T>(
        &self,
        ctx: &SpiContext,
        call: SpiCall,
        incoming: ConsentData,
    ) -> Result<ConsentData, SpiResponse<T>> {
        lock(&self.calls).push((ctx.authorisation_id.clone(), call));

        let mut issued = lock(&self.issued);
        if let Some(expected) = issued.get(&ctx.authorisation_id) {
            if *expected != incoming {
                debug!(
                    "Sandbox rejected stale consent data for authorisation {}",
                    ctx.authorisation_id
                );
                return Err(SpiResponse::failure(
                    SpiError::technical("stale consent data"),
                    incoming,
                ));
            }
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let next = ConsentData::new(format!("{}#{}", ctx.authorisation_id, sequence));
        issued.insert(ctx.authorisation_id.clone(), next.clone());
        drop(issued);

        if let Some(error) = lock(&self.failures).get(&call).cloned() {
            return Err(SpiResponse::failure(error, next));
        }
        Ok(next)
    }

    fn find_method(&self, id: &str) -> Option<&ScaMethod> {
        self.config
            .sca_methods
            .iter()
            .find(|m| m.authentication_method_id == id)
    }

    fn executed_status(kind: AuthorisationKind) -> Option<TransactionStatus> {
        match kind {
            AuthorisationKind::Consent => None,
            AuthorisationKind::PaymentInitiation => Some(TransactionStatus::Acsc),
            AuthorisationKind::PaymentCancellation => Some(TransactionStatus::Canc),
        }
    }
}

#[async_trait]
impl AuthorisationSpi for SandboxBank {
    async fn authorise_psu(
        &self,
        ctx: &SpiContext,
        psu_data: &PsuData,
        password: &str,
        consent_data: ConsentData,
    ) -> SpiResponse<PsuAuthorisation> {
        let next = match self.enter(ctx, SpiCall::AuthorisePsu, consent_data) {
            Ok(next) => next,
            Err(response) => return response,
        };

        let valid = psu_data
            .psu_id
            .as_ref()
            .and_then(|id| self.config.credentials.get(id))
            .map(|expected| expected == password)
            .unwrap_or(false);

        if valid {
            SpiResponse::success(
                PsuAuthorisation {
                    sca_exempted: self.config.sca_exempted,
                },
                next,
            )
        } else {
            SpiResponse::failure(
                SpiError::authentication_failed().with_message("PSU credentials invalid"),
                next,
            )
        }
    }

    async fn request_available_sca_methods(
        &self,
        ctx: &SpiContext,
        consent_data: ConsentData,
    ) -> SpiResponse<Vec<ScaMethod>> {
        match self.enter(ctx, SpiCall::RequestAvailableScaMethods, consent_data) {
            Ok(next) => SpiResponse::success(self.config.sca_methods.clone(), next),
            Err(response) => response,
        }
    }

    async fn request_authorisation_code(
        &self,
        ctx: &SpiContext,
        authentication_method_id: &str,
        consent_data: ConsentData,
    ) -> SpiResponse<AuthorisationCodeResult> {
        let next = match self.enter(ctx, SpiCall::RequestAuthorisationCode, consent_data) {
            Ok(next) => next,
            Err(response) => return response,
        };

        match self.find_method(authentication_method_id) {
            Some(method) => {
                let challenge = ChallengeData {
                    data: vec![format!(
                        "Enter the code sent via {}",
                        method.authentication_type
                    )],
                    otp_max_length: Some(self.config.tan.len() as u32),
                    otp_format: Some("integer".to_string()),
                    ..Default::default()
                };
                SpiResponse::success(
                    AuthorisationCodeResult {
                        sca_method: method.clone(),
                        challenge_data: Some(challenge),
                    },
                    next,
                )
            }
            None => SpiResponse::failure(SpiError::logical("Unknown SCA method"), next),
        }
    }

    async fn start_decoupled_authorisation(
        &self,
        ctx: &SpiContext,
        _authentication_method_id: Option<&str>,
        consent_data: ConsentData,
    ) -> SpiResponse<DecoupledStart> {
        match self.enter(ctx, SpiCall::StartDecoupledAuthorisation, consent_data) {
            Ok(next) => SpiResponse::success(
                DecoupledStart {
                    psu_message: Some(self.config.decoupled_psu_message.clone()),
                },
                next,
            ),
            Err(response) => response,
        }
    }

    async fn verify_sca_authorisation(
        &self,
        ctx: &SpiContext,
        confirmation: &ScaConfirmation,
        consent_data: ConsentData,
    ) -> SpiResponse<ExecutionResult> {
        let next = match self.enter(ctx, SpiCall::VerifyScaAuthorisation, consent_data) {
            Ok(next) => next,
            Err(response) => return response,
        };

        if confirmation.sca_authentication_data == self.config.tan {
            SpiResponse::success(
                ExecutionResult {
                    transaction_status: Self::executed_status(ctx.kind),
                },
                next,
            )
        } else {
            SpiResponse::failure(
                SpiError::authentication_failed().with_message("Authentication code invalid"),
                next,
            )
        }
    }

    async fn execute_without_sca(
        &self,
        ctx: &SpiContext,
        consent_data: ConsentData,
    ) -> SpiResponse<ExecutionResult> {
        let next = match self.enter(ctx, SpiCall::ExecuteWithoutSca, consent_data) {
            Ok(next) => next,
            Err(response) => return response,
        };

        match Self::executed_status(ctx.kind) {
            Some(status) => SpiResponse::success(ExecutionResult::with_status(status), next),
            None => SpiResponse::failure(SpiError::logical("Nothing to execute for a consent"), next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpiResponseStatus;
    use assert_matches::assert_matches;

    fn ctx(kind: AuthorisationKind) -> SpiContext {
        SpiContext {
            authorisation_id: "auth-1".to_string(),
            parent_id: "parent-1".to_string(),
            kind,
            psu_data: PsuData::new("PSU-Sandbox"),
            sca_approach: None,
        }
    }

    #[tokio::test]
    async fn test_blobs_are_tagged_and_chained() {
        let bank = SandboxBank::new(SandboxConfig::default());
        let ctx = ctx(AuthorisationKind::Consent);

        let first = bank
            .authorise_psu(&ctx, &ctx.psu_data, "12345", ConsentData::empty())
            .await;
        assert!(first.payload().is_some());
        assert_eq!(SandboxBank::sequence_of(&first.consent_data), Some(1));

        let second = bank
            .request_available_sca_methods(&ctx, first.consent_data.clone())
            .await;
        assert_eq!(second.payload().map(Vec::len), Some(1));
        assert_eq!(SandboxBank::sequence_of(&second.consent_data), Some(2));
        assert_eq!(bank.last_issued("auth-1"), Some(second.consent_data.clone()));

        // Replaying the first blob is refused
        let stale = bank
            .request_available_sca_methods(&ctx, first.consent_data)
            .await;
        assert_matches!(
            stale.error(),
            Some(SpiError { status: SpiResponseStatus::TechnicalFailure, .. })
        );
    }

    #[tokio::test]
    async fn test_wrong_password_is_authentication_failure() {
        let bank = SandboxBank::new(SandboxConfig::default());
        let ctx = ctx(AuthorisationKind::PaymentInitiation);
        let response = bank
            .authorise_psu(&ctx, &ctx.psu_data, "wrong", ConsentData::empty())
            .await;
        assert_eq!(
            response.error().map(|e| e.status),
            Some(SpiResponseStatus::AuthenticationFailed)
        );
        // Consent data still advances on failure
        assert_eq!(SandboxBank::sequence_of(&response.consent_data), Some(1));
    }

    #[tokio::test]
    async fn test_injected_failure_and_call_log() {
        let bank = SandboxBank::new(SandboxConfig::default());
        bank.fail_on(SpiCall::ExecuteWithoutSca, SpiError::logical("limit exceeded"));
        let ctx = ctx(AuthorisationKind::PaymentInitiation);

        let response = bank.execute_without_sca(&ctx, ConsentData::empty()).await;
        assert_eq!(
            response.error().map(|e| e.messages.clone()),
            Some(vec!["limit exceeded".to_string()])
        );
        assert_eq!(bank.calls(), vec![SpiCall::ExecuteWithoutSca]);
        assert_eq!(bank.calls_for("other"), Vec::<SpiCall>::new());

        bank.clear_failures();
        let response = bank.execute_without_sca(&ctx, response.consent_data).await;
        assert_eq!(
            response.payload().and_then(|r| r.transaction_status),
            Some(TransactionStatus::Acsc)
        );
    }

    #[tokio::test]
    async fn test_verify_code_per_kind() {
        let bank = SandboxBank::new(SandboxConfig::default().with_tan("999"));
        let ctx = ctx(AuthorisationKind::PaymentCancellation);
        let confirmation = ScaConfirmation {
            authentication_method_id: Some("sms".to_string()),
            sca_authentication_data: "999".to_string(),
        };
        let response = bank
            .verify_sca_authorisation(&ctx, &confirmation, ConsentData::empty())
            .await;
        assert_eq!(
            response.payload().and_then(|r| r.transaction_status),
            Some(TransactionStatus::Canc)
        );
    }
}
