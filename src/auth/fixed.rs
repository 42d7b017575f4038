//! Authenticator bound to one configured issuer and JWKS URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::chain::Authenticator;
use crate::auth::error::{AuthError, AuthErrorKind};
use crate::auth::identity::VerifiedIdentity;
use crate::auth::jwks::{IssuerVerifier, JwksFetcher, VerifierOptions};
use crate::types::{Issuer, JwksUrl, ProviderName, RawToken};

/// Readiness snapshot for health reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub name: ProviderName,
    pub issuer: Issuer,
    pub ready: bool,
    pub key_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Verifies tokens from a single, statically configured issuer.
///
/// Keys are loaded by [`refresh`](Self::refresh). Until the first refresh
/// succeeds the authenticator is not ready and rejects every token with
/// `ProviderUnavailable`. A failed refresh after a successful one keeps the
/// previous verifier in place.
pub struct FixedIssuerAuthenticator {
    name: ProviderName,
    issuer: Issuer,
    jwks_url: JwksUrl,
    options: VerifierOptions,
    fetcher: JwksFetcher,
    verifier: RwLock<Option<Arc<IssuerVerifier>>>,
    last_error: RwLock<Option<AuthError>>,
}

impl FixedIssuerAuthenticator {
    /// Create an authenticator without loading keys.
    pub fn new(
        name: ProviderName,
        jwks_url: JwksUrl,
        expected_issuer: Issuer,
        options: VerifierOptions,
        fetcher: JwksFetcher,
    ) -> Self {
        Self {
            name,
            issuer: expected_issuer,
            jwks_url,
            options,
            fetcher,
            verifier: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Create an authenticator and perform the initial key load.
    ///
    /// A failed load is logged and recorded; the authenticator is returned
    /// either way and reports itself as not ready.
    pub async fn connect(
        name: ProviderName,
        jwks_url: JwksUrl,
        expected_issuer: Issuer,
        options: VerifierOptions,
        fetcher: JwksFetcher,
    ) -> Self {
        let authenticator = Self::new(name, jwks_url, expected_issuer, options, fetcher);
        if let Err(e) = authenticator.refresh().await {
            error!(
                target: "auth.fixed",
                provider = %authenticator.name,
                jwks_url = %authenticator.jwks_url,
                error = %e,
                "Failed to initialize provider, continuing without it"
            );
        }
        authenticator
    }

    /// Fetch the JWKS and swap in a new verifier. Returns the key count.
    #[instrument(skip_all, fields(provider = %self.name))]
    pub async fn refresh(&self) -> Result<usize, AuthError> {
        let result = self
            .fetcher
            .fetch_verifier(
                self.name.clone(),
                self.issuer.clone(),
                &self.jwks_url,
                self.options.clone(),
            )
            .await;

        match result {
            Ok(verifier) => {
                let key_count = verifier.key_count();
                *self.verifier.write().await = Some(Arc::new(verifier));
                *self.last_error.write().await = None;
                info!(
                    target: "auth.fixed",
                    provider = %self.name,
                    issuer = %self.issuer,
                    key_count,
                    "Provider keys loaded"
                );
                Ok(key_count)
            }
            Err(e) => {
                warn!(target: "auth.fixed", provider = %self.name, error = %e, "Provider key refresh failed");
                *self.last_error.write().await = Some(e.clone());
                Err(e)
            }
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.verifier.read().await.is_some()
    }

    /// Error from the most recent failed refresh, cleared on success.
    pub async fn last_error(&self) -> Option<AuthError> {
        self.last_error.read().await.clone()
    }

    pub fn issuer(&self) -> &Issuer {
        &self.issuer
    }

    pub fn jwks_url(&self) -> &JwksUrl {
        &self.jwks_url
    }

    pub async fn status(&self) -> ProviderStatus {
        let key_count = self
            .verifier
            .read()
            .await
            .as_ref()
            .map_or(0, |v| v.key_count());
        ProviderStatus {
            name: self.name.clone(),
            issuer: self.issuer.clone(),
            ready: key_count > 0,
            key_count,
            last_error: self.last_error().await.map(|e| e.to_string()),
        }
    }

    /// Refresh keys every `interval` until the handle is aborted.
    pub fn spawn_refresh_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let authenticator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately; keys were loaded by connect.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let _ = authenticator.refresh().await;
            }
        })
    }
}

#[async_trait]
impl Authenticator for FixedIssuerAuthenticator {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    async fn authenticate(&self, token: &RawToken) -> Result<VerifiedIdentity, AuthError> {
        let verifier = self.verifier.read().await.clone();
        let Some(verifier) = verifier else {
            debug!(target: "auth.fixed", provider = %self.name, "Provider not ready");
            return Err(AuthError::new(
                AuthErrorKind::ProviderUnavailable,
                format!("provider {} has no keys loaded", self.name),
            ));
        };

        verifier.verify(token)
    }
}
