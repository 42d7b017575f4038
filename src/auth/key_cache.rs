//! Process-wide issuer → verifier cache with single-flight population.
//!
//! The first request for an unseen issuer starts one JWKS fetch and stores
//! the in-flight future; concurrent requests for the same issuer await that
//! same future. Successful verifiers stay cached for the life of the
//! process. Failures are evicted so the next request retries.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, info, instrument, warn};
use url::{Host, Url};

use crate::auth::error::{AuthError, AuthErrorKind};
use crate::auth::jwks::{IssuerVerifier, JwksFetcher, VerifierOptions};
use crate::types::{Issuer, JwksUrl, ProviderName};

/// Placeholder replaced by the issuer in a discovery template.
pub const ISSUER_PLACEHOLDER: &str = "{issuer}";

/// Where to fetch an issuer's keys and how to verify its tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerSource {
    pub provider: ProviderName,
    pub jwks_url: JwksUrl,
    pub options: VerifierOptions,
}

/// Deployment-specific policy mapping an issuer to its JWKS location.
pub trait JwksLocator: Send + Sync {
    /// `None` means the issuer is not accepted.
    fn locate(&self, issuer: &Issuer) -> Option<IssuerSource>;
}

/// Which hosts discovery may fetch keys from.
///
/// The issuer and the derived JWKS URL must both pass. An empty allowlist
/// accepts nothing. Entries match exactly, or as a subdomain suffix when
/// written `*.example.com` or `.example.com`. Unless insecure mode is on,
/// only `https` is allowed and loopback, private, link-local and other
/// internal addresses are refused even when listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryPolicy {
    allowed_hosts: Vec<String>,
    allow_insecure: bool,
}

impl DiscoveryPolicy {
    pub fn new<I, S>(allowed_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.into().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            allow_insecure: false,
        }
    }

    /// Permit plain `http` and internal addresses. Local testing only.
    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    pub fn is_insecure(&self) -> bool {
        self.allow_insecure
    }

    /// Check one URL, returning the reason it is refused.
    pub fn check(&self, url: &Url) -> Result<(), String> {
        match url.scheme() {
            "https" => {}
            "http" if self.allow_insecure => {}
            other => return Err(format!("scheme `{}` is not allowed", other)),
        }

        if !url.username().is_empty() || url.password().is_some() {
            return Err("URL carries credentials".to_string());
        }

        let host = match url.host() {
            Some(host) => host,
            None => return Err("URL has no host".to_string()),
        };

        if !self.allow_insecure {
            let internal = match &host {
                Host::Domain(domain) => {
                    let domain = domain.to_ascii_lowercase();
                    domain == "localhost" || domain.ends_with(".localhost")
                }
                Host::Ipv4(ip) => is_internal_v4(ip),
                Host::Ipv6(ip) => is_internal_v6(ip),
            };
            if internal {
                return Err(format!("host {} is an internal address", host));
            }
        }

        let name = host.to_string().to_ascii_lowercase();
        if self.allowed_hosts.iter().any(|pattern| host_matches(pattern, &name)) {
            Ok(())
        } else {
            Err(format!("host {} is not in the discovery allowlist", name))
        }
    }
}

fn host_matches(pattern: &str, host: &str) -> bool {
    let suffix = if pattern.starts_with("*.") {
        Some(&pattern[1..])
    } else if pattern.starts_with('.') {
        Some(pattern)
    } else {
        None
    };

    match suffix {
        Some(suffix) => host.len() > suffix.len() && host.ends_with(suffix),
        None => pattern == host,
    }
}

fn is_internal_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || a == 0
        // 100.64.0.0/10, carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_internal_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// Static issuer table with an optional discovery convention for tenants.
#[derive(Debug, Clone, Default)]
pub struct IssuerDirectory {
    issuers: HashMap<Issuer, IssuerSource>,
    discovery: Option<Discovery>,
}

#[derive(Debug, Clone)]
struct Discovery {
    template: String,
    policy: DiscoveryPolicy,
    options: VerifierOptions,
}

impl IssuerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an issuer with a fixed JWKS URL.
    pub fn with_issuer(mut self, issuer: Issuer, jwks_url: JwksUrl, options: VerifierOptions) -> Self {
        let source = IssuerSource {
            provider: ProviderName::new(issuer.as_str()),
            jwks_url,
            options,
        };
        self.issuers.insert(issuer, source);
        self
    }

    /// Accept issuers that `policy` allows, fetching keys from `template`
    /// with `{issuer}` replaced by the issuer URL (trailing `/` removed).
    pub fn with_discovery(
        mut self,
        template: impl Into<String>,
        policy: DiscoveryPolicy,
        options: VerifierOptions,
    ) -> Self {
        self.discovery = Some(Discovery {
            template: template.into(),
            policy,
            options,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.issuers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty() && self.discovery.is_none()
    }

    fn discover(&self, issuer: &Issuer) -> Option<IssuerSource> {
        let discovery = self.discovery.as_ref()?;

        let Ok(parsed) = Url::parse(issuer.as_str()) else {
            debug!(target: "auth.key_cache", issuer = %issuer, "Issuer is not a URL");
            return None;
        };
        if let Err(reason) = discovery.policy.check(&parsed) {
            warn!(target: "auth.key_cache", issuer = %issuer, reason = %reason, "Issuer refused for discovery");
            return None;
        }

        let url = discovery
            .template
            .replace(ISSUER_PLACEHOLDER, issuer.as_str().trim_end_matches('/'));
        let jwks_url = Url::parse(&url).ok()?;
        if let Err(reason) = discovery.policy.check(&jwks_url) {
            warn!(target: "auth.key_cache", issuer = %issuer, url = %url, reason = %reason, "JWKS URL refused for discovery");
            return None;
        }

        Some(IssuerSource {
            provider: ProviderName::new(issuer.as_str()),
            jwks_url: JwksUrl::new(url),
            options: discovery.options.clone(),
        })
    }
}

impl JwksLocator for IssuerDirectory {
    fn locate(&self, issuer: &Issuer) -> Option<IssuerSource> {
        self.issuers
            .get(issuer)
            .cloned()
            .or_else(|| self.discover(issuer))
    }
}

type VerifierResult = Result<Arc<IssuerVerifier>, AuthError>;
type SharedVerifier = Shared<BoxFuture<'static, VerifierResult>>;

struct Slot {
    generation: u64,
    verifier: SharedVerifier,
}

/// Shared cache of per-issuer verifiers.
pub struct KeyProviderCache {
    slots: DashMap<Issuer, Slot>,
    locator: Arc<dyn JwksLocator>,
    fetcher: JwksFetcher,
    next_generation: AtomicU64,
    fetches: Arc<AtomicU64>,
}

impl KeyProviderCache {
    pub fn new(locator: Arc<dyn JwksLocator>, fetcher: JwksFetcher) -> Self {
        Self {
            slots: DashMap::new(),
            locator,
            fetcher,
            next_generation: AtomicU64::new(0),
            fetches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Return the verifier for `issuer`, fetching its JWKS on first use.
    ///
    /// # Errors
    ///
    /// `IssuerUnresolvable` when the locator rejects the issuer (no fetch is
    /// made), `UpstreamJwksUnavailable` when the fetch or key decoding fails.
    #[instrument(skip_all, fields(issuer = %issuer))]
    pub async fn resolve(&self, issuer: &Issuer) -> VerifierResult {
        let (generation, verifier) = match self.slots.entry(issuer.clone()) {
            Entry::Occupied(slot) => {
                debug!(target: "auth.key_cache", issuer = %issuer, "Verifier cache hit");
                (slot.get().generation, slot.get().verifier.clone())
            }
            Entry::Vacant(vacant) => {
                let Some(source) = self.locator.locate(issuer) else {
                    warn!(target: "auth.key_cache", issuer = %issuer, "No JWKS location for issuer");
                    return Err(AuthError::new(
                        AuthErrorKind::IssuerUnresolvable,
                        format!("issuer {} is not accepted", issuer),
                    ));
                };

                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let verifier = load(
                    self.fetcher.clone(),
                    issuer.clone(),
                    source,
                    self.fetches.clone(),
                )
                .boxed()
                .shared();

                vacant.insert(Slot {
                    generation,
                    verifier: verifier.clone(),
                });
                (generation, verifier)
            }
        };

        let result = verifier.await;

        if result.is_err() {
            // Only evict the slot this call observed; a newer attempt may
            // already have replaced it.
            self.slots
                .remove_if(issuer, |_, slot| slot.generation == generation);
        }

        result
    }

    /// Drop the cached verifier for `issuer`. Returns whether one existed.
    pub fn invalidate(&self, issuer: &Issuer) -> bool {
        let removed = self.slots.remove(issuer).is_some();
        if removed {
            info!(target: "auth.key_cache", issuer = %issuer, "Invalidated cached verifier");
        }
        removed
    }

    /// Issuers with a successfully built verifier.
    pub fn cached_issuers(&self) -> Vec<Issuer> {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value().verifier.peek(), Some(Ok(_))))
            .map(|slot| slot.key().clone())
            .collect()
    }

    /// Number of slots, including in-flight fetches.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total JWKS fetches started by this cache.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

async fn load(
    fetcher: JwksFetcher,
    issuer: Issuer,
    source: IssuerSource,
    fetches: Arc<AtomicU64>,
) -> VerifierResult {
    fetches.fetch_add(1, Ordering::Relaxed);
    info!(
        target: "auth.key_cache",
        issuer = %issuer,
        url = %source.jwks_url,
        "Resolving verifier for unseen issuer"
    );

    let verifier = fetcher
        .fetch_verifier(source.provider, issuer.clone(), &source.jwks_url, source.options)
        .await
        .inspect_err(|e| {
            warn!(target: "auth.key_cache", issuer = %issuer, error = %e, "Verifier resolution failed");
        })?;

    info!(
        target: "auth.key_cache",
        issuer = %issuer,
        key_count = verifier.key_count(),
        "Cached verifier for issuer"
    );
    Ok(Arc::new(verifier))
}
