//! Result of a successful token verification.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::error::{AuthError, AuthErrorKind};
use crate::types::{Issuer, ProviderName};

/// How a provider's claims map onto an authorization context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClaimsProfile {
    /// `role`, `cons`, `iid`, `drl`, `did` claims.
    #[default]
    Standard,
    /// Managed identity provider tokens carrying `realm_access.roles`.
    RealmRoles,
}

/// Verified token: subject, issuer, expiry and the full claim map.
///
/// `Debug` redacts the subject and claim values.
#[derive(Clone)]
pub struct VerifiedIdentity {
    subject: String,
    issuer: Issuer,
    expiry: Option<u64>,
    claims: Map<String, Value>,
    provider: ProviderName,
    profile: ClaimsProfile,
}

impl VerifiedIdentity {
    /// Build from a verified claim map.
    ///
    /// # Errors
    ///
    /// `ClaimInvalid` if `sub` or `iss` is not a string.
    pub fn from_claims(
        claims: Map<String, Value>,
        provider: ProviderName,
        profile: ClaimsProfile,
    ) -> Result<Self, AuthError> {
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::new(AuthErrorKind::ClaimInvalid, "sub claim missing"))?
            .to_string();
        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .map(Issuer::new)
            .ok_or_else(|| AuthError::new(AuthErrorKind::ClaimInvalid, "iss claim missing"))?;
        let expiry = claims.get("exp").and_then(Value::as_u64);

        Ok(Self {
            subject,
            issuer,
            expiry,
            claims,
            provider,
            profile,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &Issuer {
        &self.issuer
    }

    /// `exp` claim, if present.
    pub fn expiry(&self) -> Option<u64> {
        self.expiry
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Provider that accepted the token.
    pub fn provider(&self) -> &ProviderName {
        &self.provider
    }

    pub fn profile(&self) -> ClaimsProfile {
        self.profile
    }
}

impl fmt::Debug for VerifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedIdentity")
            .field("subject", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("expiry", &self.expiry)
            .field("claims", &format_args!("[{} claims]", self.claims.len()))
            .field("provider", &self.provider)
            .field("profile", &self.profile)
            .finish()
    }
}
