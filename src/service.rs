//! Wires configured authenticators together for a running server.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::auth::{
    Authenticator, ChainedAuthenticator, DynamicIssuerAuthenticator, FixedIssuerAuthenticator,
    KeyProviderCache, ProviderStatus,
};
use crate::config::{AuthMode, AuthSettings};
use crate::types::{Issuer, JwksUrl, ProviderName};

/// Outcome of refreshing one fixed provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub name: ProviderName,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The configured authenticator plus handles for health and refresh.
pub struct AuthService {
    mode: AuthMode,
    authenticator: Arc<dyn Authenticator>,
    fixed: Vec<Arc<FixedIssuerAuthenticator>>,
    cache: Option<Arc<KeyProviderCache>>,
}

impl AuthService {
    /// Build from settings. In chained mode every fixed provider performs its
    /// initial key load; providers that fail stay registered but not ready.
    pub async fn from_settings(settings: &AuthSettings) -> Self {
        let fetcher = settings.fetcher();

        match settings.mode {
            AuthMode::Chained => {
                let mut fixed = Vec::with_capacity(settings.fixed_issuers.len());
                for cfg in &settings.fixed_issuers {
                    let authenticator = FixedIssuerAuthenticator::connect(
                        ProviderName::new(cfg.name.as_str()),
                        JwksUrl::new(cfg.jwks_url.as_str()),
                        Issuer::new(cfg.issuer.as_str()),
                        settings.verifier_options(cfg.audience.clone(), cfg.claims),
                        fetcher.clone(),
                    )
                    .await;
                    fixed.push(Arc::new(authenticator));
                }

                let chain = ChainedAuthenticator::new(
                    fixed
                        .iter()
                        .map(|a| a.clone() as Arc<dyn Authenticator>)
                        .collect(),
                );
                info!(
                    target: "auth.service",
                    providers = chain.len(),
                    "Chained authentication configured"
                );

                Self {
                    mode: AuthMode::Chained,
                    authenticator: Arc::new(chain),
                    fixed,
                    cache: None,
                }
            }
            AuthMode::Dynamic => {
                let directory = settings.issuer_directory();
                info!(
                    target: "auth.service",
                    static_issuers = directory.len(),
                    discovery = settings.jwks_discovery_template.is_some(),
                    discovery_hosts = settings.jwks_discovery_allowed_hosts.len(),
                    "Dynamic issuer authentication configured"
                );
                let cache = Arc::new(KeyProviderCache::new(Arc::new(directory), fetcher));
                Self {
                    mode: AuthMode::Dynamic,
                    authenticator: Arc::new(DynamicIssuerAuthenticator::new(cache.clone())),
                    fixed: Vec::new(),
                    cache: Some(cache),
                }
            }
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.authenticator.clone()
    }

    pub fn cache(&self) -> Option<&Arc<KeyProviderCache>> {
        self.cache.as_ref()
    }

    pub async fn provider_statuses(&self) -> Vec<ProviderStatus> {
        let mut statuses = Vec::with_capacity(self.fixed.len());
        for provider in &self.fixed {
            statuses.push(provider.status().await);
        }
        statuses
    }

    /// True when at least one fixed provider has keys, or in dynamic mode.
    pub async fn is_ready(&self) -> bool {
        if self.mode == AuthMode::Dynamic {
            return true;
        }
        for provider in &self.fixed {
            if provider.is_ready().await {
                return true;
            }
        }
        false
    }

    /// Reload keys for every fixed provider and drop all cached dynamic
    /// verifiers.
    pub async fn refresh_all(&self) -> Vec<RefreshOutcome> {
        let mut outcomes = Vec::with_capacity(self.fixed.len());
        for provider in &self.fixed {
            let outcome = match provider.refresh().await {
                Ok(key_count) => RefreshOutcome {
                    name: provider.name().clone(),
                    ok: true,
                    key_count: Some(key_count),
                    error: None,
                },
                Err(e) => RefreshOutcome {
                    name: provider.name().clone(),
                    ok: false,
                    key_count: None,
                    error: Some(e.to_string()),
                },
            };
            outcomes.push(outcome);
        }

        if let Some(cache) = &self.cache {
            for issuer in cache.cached_issuers() {
                cache.invalidate(&issuer);
            }
        }

        outcomes
    }

    /// Start periodic refresh for every fixed provider when configured.
    pub fn spawn_refresh_tasks(&self, settings: &AuthSettings) -> Vec<JoinHandle<()>> {
        let Some(interval) = settings.refresh_interval() else {
            return Vec::new();
        };
        info!(
            target: "auth.service",
            interval_seconds = interval.as_secs(),
            "Starting periodic key refresh"
        );
        self.fixed
            .iter()
            .map(|provider| provider.spawn_refresh_task(interval))
            .collect()
    }
}
