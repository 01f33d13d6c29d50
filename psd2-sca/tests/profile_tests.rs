mod common;

use assert_matches::assert_matches;
use common::*;
use psd2_sca::config::PROFILE_ENV_VAR;
use psd2_sca::{AspspProfile, Error, LinkHint, NewAuthorisation, PsuUpdate, ScaStatus};
use psd2_spi::sandbox::SandboxConfig;
use psd2_spi::{AuthorisationKind, ScaApproach};
use std::io::Write;

const PROFILE_JSON: &str = r#"{
    "scaApproaches": ["EMBEDDED", "REDIRECT"],
    "decoupledEnabled": false,
    "oneFactorShortcutPermitted": true,
    "psuInInitialRequestMandated": true,
    "aisRedirectUrl": "https://psd2.bank.example/ais/{redirect-id}",
    "pisRedirectUrl": "https://psd2.bank.example/pis/{redirect-id}",
    "pisCancellationRedirectUrl": "https://psd2.bank.example/cancel/{redirect-id}",
    "redirectUrlExpirationMs": 300000
}"#;

#[test]
fn test_full_profile_document() {
    let profile = AspspProfile::from_json_str(PROFILE_JSON).unwrap();
    assert_eq!(
        profile.sca_approaches,
        vec![ScaApproach::Embedded, ScaApproach::Redirect]
    );
    assert!(!profile.decoupled_enabled);
    assert!(profile.one_factor_shortcut_permitted);
    assert!(profile.psu_in_initial_request_mandated);
    assert_eq!(profile.redirect_url_expiration().as_secs(), 300);
    assert_eq!(
        profile.redirect_url_template(AuthorisationKind::PaymentCancellation),
        Some("https://psd2.bank.example/cancel/{redirect-id}")
    );
}

#[test]
fn test_broken_profiles() {
    assert_matches!(
        AspspProfile::from_json_str("{ not json"),
        Err(Error::Serialization(_))
    );
    assert_matches!(
        AspspProfile::from_json_str(r#"{ "redirectUrlExpirationMs": 0 }"#),
        Err(Error::Configuration(_))
    );
    assert_matches!(
        AspspProfile::from_json_str(r#"{ "scaApproaches": ["REDIRECT"], "aisRedirectUrl": null }"#),
        Err(Error::Configuration(_))
    );
    assert_matches!(
        AspspProfile::from_json_str(r#"{ "redirectUrlExpirationMs": 9223372036854775807 }"#),
        Err(Error::Configuration(_))
    );
    assert_matches!(
        AspspProfile::from_file("/nonexistent/profile.json"),
        Err(Error::Io(_))
    );
}

#[test]
fn test_profile_from_environment() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(PROFILE_JSON.as_bytes()).unwrap();

    std::env::set_var(PROFILE_ENV_VAR, file.path());
    let loaded = AspspProfile::from_env();
    std::env::remove_var(PROFILE_ENV_VAR);

    assert_eq!(loaded.unwrap(), AspspProfile::from_json_str(PROFILE_JSON).unwrap());
    assert_eq!(AspspProfile::from_env().unwrap(), AspspProfile::default());
}

#[tokio::test]
async fn test_loaded_profile_drives_the_service() {
    let profile = AspspProfile::from_json_str(PROFILE_JSON).unwrap();
    let h = Harness::new(profile, SandboxConfig::default()).await;

    // PSU identification is mandatory at creation
    assert_matches!(
        h.service
            .create_authorisation(NewAuthorisation::new(
                "consent-1",
                AuthorisationKind::Consent
            ))
            .await,
        Err(Error::Validation { .. })
    );

    let created = h
        .service
        .create_authorisation(
            NewAuthorisation::new("consent-1", AuthorisationKind::Consent).with_psu_data(psu()),
        )
        .await
        .unwrap();
    assert_eq!(created.sca_approach, Some(ScaApproach::Embedded));
    assert_eq!(
        created.link,
        LinkHint::StartAuthorisationWithPsuAuthentication
    );

    let response = h
        .service
        .advance(&created.authorisation_id, PsuUpdate::password(PASSWORD))
        .await
        .unwrap();
    assert_eq!(response.sca_status, ScaStatus::ScaMethodSelected);
}
