//! The `Authenticator` seam and the ordered provider chain.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::auth::error::AuthError;
use crate::auth::identity::VerifiedIdentity;
use crate::auth::token::check_token_structure;
use crate::types::{ProviderName, RawToken};

/// Something that can verify a bearer token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Provider name used in logs.
    fn name(&self) -> &ProviderName;

    /// Verify `token` and return the identity it carries.
    async fn authenticate(&self, token: &RawToken) -> Result<VerifiedIdentity, AuthError>;
}

/// Tries authenticators in order until one accepts the token.
///
/// Any failure moves on to the next provider, except an expired token: once
/// a provider with the right key reports expiry, no further provider is
/// asked and the chain fails with `TokenExpired`. Exhausting the chain yields
/// a generic `Unauthorized` that does not say which provider came closest.
///
/// A token that is not a compact JWS fails with `MalformedToken` before any
/// provider is asked.
pub struct ChainedAuthenticator {
    name: ProviderName,
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl ChainedAuthenticator {
    pub fn new(authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        Self {
            name: ProviderName::new("chain"),
            authenticators,
        }
    }

    pub fn len(&self) -> usize {
        self.authenticators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderName> {
        self.authenticators.iter().map(|a| a.name())
    }
}

#[async_trait]
impl Authenticator for ChainedAuthenticator {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    #[instrument(skip_all)]
    async fn authenticate(&self, token: &RawToken) -> Result<VerifiedIdentity, AuthError> {
        if let Err(err) = check_token_structure(token) {
            debug!(target: "auth.chain", detail = %err.detail(), "Token is not a JWT");
            return Err(err);
        }

        let mut last_failure: Option<AuthError> = None;

        for authenticator in &self.authenticators {
            if let Some(failure) = &last_failure
                && failure.is_expired()
            {
                break;
            }

            debug!(target: "auth.chain", provider = %authenticator.name(), "Trying provider");
            match authenticator.authenticate(token).await {
                Ok(identity) => {
                    debug!(target: "auth.chain", provider = %authenticator.name(), "Provider accepted token");
                    return Ok(identity);
                }
                Err(err) => {
                    warn!(
                        target: "auth.chain",
                        provider = %authenticator.name(),
                        kind = %err.kind(),
                        detail = %err.detail(),
                        "Authentication failed at provider"
                    );
                    last_failure = Some(err);
                }
            }
        }

        match last_failure {
            Some(failure) if failure.is_expired() => Err(AuthError::expired(failure.detail())),
            _ => {
                debug!(target: "auth.chain", "Authentication failed at all providers");
                Err(AuthError::unauthorized("no provider accepted the token"))
            }
        }
    }
}
