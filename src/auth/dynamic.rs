//! Authenticator for tenants whose issuer is only known from the token.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::auth::chain::Authenticator;
use crate::auth::error::AuthError;
use crate::auth::identity::VerifiedIdentity;
use crate::auth::key_cache::KeyProviderCache;
use crate::auth::token::read_unverified_issuer;
use crate::types::{ProviderName, RawToken};

/// Reads `iss` from the unverified payload, resolves that issuer's verifier
/// through the shared cache and verifies the token with it.
///
/// Every failure surfaces as a generic `Unauthorized`; the cause is only
/// logged.
pub struct DynamicIssuerAuthenticator {
    name: ProviderName,
    cache: Arc<KeyProviderCache>,
}

impl DynamicIssuerAuthenticator {
    pub fn new(cache: Arc<KeyProviderCache>) -> Self {
        Self {
            name: ProviderName::new("dynamic"),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<KeyProviderCache> {
        &self.cache
    }

    async fn verify(&self, token: &RawToken) -> Result<VerifiedIdentity, AuthError> {
        let issuer = read_unverified_issuer(token)?;
        let verifier = self.cache.resolve(&issuer).await?;
        verifier.verify(token)
    }
}

#[async_trait]
impl Authenticator for DynamicIssuerAuthenticator {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    #[instrument(skip_all)]
    async fn authenticate(&self, token: &RawToken) -> Result<VerifiedIdentity, AuthError> {
        match self.verify(token).await {
            Ok(identity) => {
                debug!(target: "auth.dynamic", issuer = %identity.issuer(), "Token verified");
                Ok(identity)
            }
            Err(e) => {
                warn!(
                    target: "auth.dynamic",
                    kind = %e.kind(),
                    detail = %e.detail(),
                    "Dynamic issuer authentication failed"
                );
                Err(AuthError::unauthorized("token rejected"))
            }
        }
    }
}
