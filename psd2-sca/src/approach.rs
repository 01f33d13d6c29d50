//! SCA approach resolution
//!
//! The approach of an authorisation is fixed when it is created. The only
//! later change is the switch to DECOUPLED when the bank turns out to offer a
//! single method that can only be used out of band.

use psd2_spi::{AuthorisationKind, ScaApproach};
use tracing::debug;

use crate::config::AspspProfile;
use crate::error::{Error, Result};
use crate::record::AuthorisationRecord;

/// Pure decision logic, no I/O.
pub struct ApproachResolver;

impl ApproachResolver {
    /// The approach the deployment uses when nothing else decides.
    ///
    /// The first supported approach wins; DECOUPLED falls back to EMBEDDED
    /// when decoupled is disabled, and an empty list means EMBEDDED.
    pub fn default_approach(profile: &AspspProfile) -> ScaApproach {
        match profile.sca_approaches.first() {
            Some(ScaApproach::Decoupled) if !profile.decoupled_enabled => ScaApproach::Embedded,
            Some(approach) => *approach,
            None => ScaApproach::Embedded,
        }
    }

    /// Whether the deployment can run `approach` at all.
    pub fn is_supported(profile: &AspspProfile, approach: ScaApproach) -> bool {
        match approach {
            ScaApproach::Decoupled => {
                profile.decoupled_enabled && profile.sca_approaches.contains(&approach)
            }
            ScaApproach::Embedded => {
                profile.sca_approaches.is_empty() || profile.sca_approaches.contains(&approach)
            }
            _ => profile.sca_approaches.contains(&approach),
        }
    }

    /// Approach for an authorisation at creation time: the TPP's preference
    /// when the deployment supports it, the default otherwise.
    pub fn initial(
        kind: AuthorisationKind,
        profile: &AspspProfile,
        requested: Option<ScaApproach>,
    ) -> ScaApproach {
        match requested {
            Some(approach) if Self::is_supported(profile, approach) => approach,
            Some(approach) => {
                let fallback = Self::default_approach(profile);
                debug!(
                    "Requested approach {} for {} is not supported, using {}",
                    approach, kind, fallback
                );
                fallback
            }
            None => Self::default_approach(profile),
        }
    }

    /// Approach in effect for `record`. A recorded approach always wins.
    pub fn resolve(profile: &AspspProfile, record: &AuthorisationRecord) -> ScaApproach {
        record
            .sca_approach
            .unwrap_or_else(|| Self::default_approach(profile))
    }

    /// Switch `record` to DECOUPLED for the rest of its life.
    ///
    /// Returns `Ok(true)` when the approach changed and `Ok(false)` when it
    /// already was DECOUPLED. Redirect and OAuth authorisations are never
    /// switched.
    pub fn force_decoupled(record: &mut AuthorisationRecord) -> Result<bool> {
        match record.sca_approach {
            Some(ScaApproach::Decoupled) => Ok(false),
            Some(approach) if approach.is_redirect_like() || record.approach_forced => {
                Err(Error::Configuration(format!(
                    "Authorisation {} cannot switch from {} to DECOUPLED",
                    record.id, approach
                )))
            }
            _ => {
                record.sca_approach = Some(ScaApproach::Decoupled);
                record.approach_forced = true;
                Ok(true)
            }
        }
    }
}
