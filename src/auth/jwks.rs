//! JWKS (JSON Web Key Set) fetching and per-issuer verification.
//!
//! [`JwksFetcher`] downloads an issuer's key set; [`IssuerVerifier`] holds the
//! decoded keys together with the claim checks for that issuer (leeway,
//! expiry, exact issuer match, optional audience).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use reqwest::StatusCode;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::auth::error::{AuthError, AuthErrorKind};
use crate::auth::identity::{ClaimsProfile, VerifiedIdentity};
use crate::auth::token::check_token_size;
use crate::types::{Issuer, JwksUrl, ProviderName, RawToken};

/// Default clock-skew leeway applied to `exp` (seconds).
pub const DEFAULT_LEEWAY_SECONDS: u64 = 30;

/// Default timeout for a JWKS request (seconds).
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Claim checks applied by a verifier in addition to the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierOptions {
    /// Clock-skew tolerance for `exp`.
    pub leeway_seconds: u64,
    /// Expected `aud`. When `None`, `aud` is left to context construction.
    pub audience: Option<String>,
    /// Skip `exp` enforcement. Test deployments only.
    pub ignore_expiry: bool,
    /// Claims profile attached to identities this verifier produces.
    pub profile: ClaimsProfile,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            leeway_seconds: DEFAULT_LEEWAY_SECONDS,
            audience: None,
            ignore_expiry: false,
            profile: ClaimsProfile::Standard,
        }
    }
}

/// A decoded public key from a JWKS document.
#[derive(Clone)]
struct VerifierKey {
    kid: Option<String>,
    algorithm: Option<Algorithm>,
    decoding_key: DecodingKey,
}

/// Signature and claim checker for a single issuer.
///
/// Immutable once built; refreshing keys means building a new verifier.
pub struct IssuerVerifier {
    provider: ProviderName,
    issuer: Issuer,
    options: VerifierOptions,
    keys: Vec<VerifierKey>,
}

impl fmt::Debug for IssuerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerVerifier")
            .field("provider", &self.provider)
            .field("issuer", &self.issuer)
            .field("key_ids", &self.key_ids())
            .finish_non_exhaustive()
    }
}

impl IssuerVerifier {
    /// Build a verifier from the raw `keys` array of a JWKS document.
    ///
    /// Encryption keys and keys that cannot be decoded are skipped.
    ///
    /// # Errors
    ///
    /// `UpstreamJwksUnavailable` if no usable signing key remains.
    pub fn from_jwks(
        provider: ProviderName,
        issuer: Issuer,
        keys: &[Value],
        options: VerifierOptions,
    ) -> Result<Self, AuthError> {
        let mut decoded = Vec::with_capacity(keys.len());

        for raw in keys {
            if raw.get("use").and_then(Value::as_str) == Some("enc") {
                debug!(target: "auth.jwks", issuer = %issuer, "Skipping encryption key");
                continue;
            }

            let jwk: Jwk = match serde_json::from_value(raw.clone()) {
                Ok(jwk) => jwk,
                Err(e) => {
                    warn!(target: "auth.jwks", issuer = %issuer, error = %e, "Skipping unparseable JWK");
                    continue;
                }
            };

            let decoding_key = match DecodingKey::from_jwk(&jwk) {
                Ok(key) => key,
                Err(e) => {
                    warn!(target: "auth.jwks", issuer = %issuer, error = %e, "Skipping unsupported JWK");
                    continue;
                }
            };

            let algorithm = raw
                .get("alg")
                .and_then(Value::as_str)
                .and_then(|alg| Algorithm::from_str(alg).ok());

            decoded.push(VerifierKey {
                kid: jwk.common.key_id.clone(),
                algorithm,
                decoding_key,
            });
        }

        if decoded.is_empty() {
            return Err(AuthError::jwks_unavailable(format!(
                "no usable signing keys for issuer {}",
                issuer
            )));
        }

        debug!(
            target: "auth.jwks",
            issuer = %issuer,
            key_count = decoded.len(),
            "Built issuer verifier"
        );

        Ok(Self {
            provider,
            issuer,
            options,
            keys: decoded,
        })
    }

    pub fn issuer(&self) -> &Issuer {
        &self.issuer
    }

    pub fn provider(&self) -> &ProviderName {
        &self.provider
    }

    pub fn options(&self) -> &VerifierOptions {
        &self.options
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Key IDs in document order (keys without a `kid` are omitted).
    pub fn key_ids(&self) -> Vec<&str> {
        self.keys.iter().filter_map(|k| k.kid.as_deref()).collect()
    }

    /// Verify signature, `exp` and `iss`, returning the verified identity.
    ///
    /// With a `kid` in the header only the matching key is tried; without one
    /// every key whose algorithm fits the header is tried in order.
    ///
    /// # Errors
    ///
    /// `TokenExpired` for an expired token with a valid signature,
    /// `MalformedToken` for undecodable tokens, `SignatureInvalid` otherwise.
    pub fn verify(&self, token: &RawToken) -> Result<VerifiedIdentity, AuthError> {
        check_token_size(token)?;

        let header = decode_header(token.as_str())
            .map_err(|e| AuthError::malformed(format!("invalid JWT header: {}", e)))?;

        let candidates: Vec<&VerifierKey> = self
            .keys
            .iter()
            .filter(|key| match (&header.kid, &key.kid) {
                (Some(wanted), Some(kid)) => wanted == kid,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .filter(|key| key.algorithm.is_none_or(|alg| alg == header.alg))
            .collect();

        if candidates.is_empty() {
            return Err(AuthError::new(
                AuthErrorKind::SignatureInvalid,
                format!(
                    "no key of issuer {} matches kid {:?} / alg {:?}",
                    self.issuer, header.kid, header.alg
                ),
            ));
        }

        let validation = self.validation(header.alg);
        let mut last_error = None;

        for key in candidates {
            match decode::<Map<String, Value>>(token.as_str(), &key.decoding_key, &validation) {
                Ok(data) => {
                    return VerifiedIdentity::from_claims(
                        data.claims,
                        self.provider.clone(),
                        self.options.profile,
                    );
                }
                Err(e) => {
                    let err = classify_jwt_error(&e);
                    if err.kind() != AuthErrorKind::SignatureInvalid {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AuthError::new(AuthErrorKind::SignatureInvalid, "signature did not verify")
        }))
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.options.leeway_seconds;
        validation.validate_exp = !self.options.ignore_expiry;
        validation.set_issuer(&[self.issuer.as_str()]);
        // `exp` is checked when present but not required.
        validation.set_required_spec_claims(&["iss"]);
        match &self.options.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

/// Map a `jsonwebtoken` error to an [`AuthError`] kind.
pub fn classify_jwt_error(err: &jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;

    let kind = match err.kind() {
        ErrorKind::ExpiredSignature => AuthErrorKind::TokenExpired,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthErrorKind::MalformedToken,
        _ => AuthErrorKind::SignatureInvalid,
    };
    AuthError::new(kind, err.to_string())
}

/// HTTP client for JWKS documents.
#[derive(Clone)]
pub struct JwksFetcher {
    client: reqwest::Client,
}

impl JwksFetcher {
    /// Create a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(target: "auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });
        Self { client }
    }

    /// GET the JWKS document and return its `keys` array.
    ///
    /// # Errors
    ///
    /// `UpstreamJwksUnavailable` on transport errors, any status other than
    /// 200, a non-JSON body, or a body without a `keys` array.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &JwksUrl) -> Result<Vec<Value>, AuthError> {
        debug!(target: "auth.jwks", url = %url, "Fetching JWKS");

        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            warn!(target: "auth.jwks", url = %url, error = %e, "Failed to fetch JWKS");
            AuthError::jwks_unavailable(format!("request to {} failed: {}", url, e))
        })?;

        if response.status() != StatusCode::OK {
            warn!(target: "auth.jwks", url = %url, status = %response.status(), "JWKS endpoint returned error");
            return Err(AuthError::jwks_unavailable(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            warn!(target: "auth.jwks", url = %url, error = %e, "Failed to parse JWKS response");
            AuthError::jwks_unavailable(format!("invalid JWKS body from {}: {}", url, e))
        })?;

        match body.get("keys") {
            Some(Value::Array(keys)) => Ok(keys.clone()),
            _ => {
                warn!(target: "auth.jwks", url = %url, "JWKS response has no keys array");
                Err(AuthError::jwks_unavailable(format!(
                    "JWKS body from {} has no keys array",
                    url
                )))
            }
        }
    }

    /// Fetch and build a verifier in one step.
    pub async fn fetch_verifier(
        &self,
        provider: ProviderName,
        issuer: Issuer,
        url: &JwksUrl,
        options: VerifierOptions,
    ) -> Result<IssuerVerifier, AuthError> {
        let keys = self.fetch(url).await?;
        IssuerVerifier::from_jwks(provider, issuer, &keys, options)
    }
}

impl Default for JwksFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS))
    }
}
