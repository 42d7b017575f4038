use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, env, fs, path::Path, path::PathBuf, time::Duration};
use tracing::warn;
use url::Url;

use crate::auth::jwks::{DEFAULT_HTTP_TIMEOUT_SECONDS, DEFAULT_LEEWAY_SECONDS};
use crate::auth::key_cache::ISSUER_PLACEHOLDER;
use crate::auth::{ClaimsProfile, DiscoveryPolicy, IssuerDirectory, JwksFetcher, VerifierOptions};
use crate::types::{Issuer, JwksUrl};

/// Which authentication strategy the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Chained,
    Dynamic,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedIssuerConfig {
    pub name: String,
    pub issuer: String,
    pub jwks_url: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub claims: ClaimsProfile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicIssuerConfig {
    pub jwks_url: String,
    #[serde(default)]
    pub audience: Option<String>,
}

/// Contents of `auth.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    #[serde(default)]
    pub mode: AuthMode,
    #[serde(default = "default_leeway_seconds")]
    pub leeway_seconds: u64,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    /// Periodic key refresh for fixed issuers. Off when absent.
    #[serde(default)]
    pub refresh_interval_seconds: Option<u64>,
    #[serde(default)]
    pub ignore_expiry: bool,
    #[serde(default)]
    pub fixed_issuers: Vec<FixedIssuerConfig>,
    #[serde(default)]
    pub dynamic_issuers: BTreeMap<String, DynamicIssuerConfig>,
    #[serde(default)]
    pub jwks_discovery_template: Option<String>,
    /// Hosts discovery may contact; `*.example.com` matches subdomains.
    #[serde(default)]
    pub jwks_discovery_allowed_hosts: Vec<String>,
    /// Allow plain http and internal addresses for discovery. Local testing only.
    #[serde(default)]
    pub jwks_discovery_allow_insecure: bool,
}

fn default_leeway_seconds() -> u64 {
    DEFAULT_LEEWAY_SECONDS
}

fn default_http_timeout_seconds() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECONDS
}

impl AuthSettings {
    /// Parse, expand `${VAR}` references, and validate.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let settings: AuthSettings = serde_json::from_str(raw)?;
        let settings = settings.expand(&|name: &str| env::var(name).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::from_json_str(&raw)
    }

    /// Load from `AUTH_CONFIG`, the XDG config dir, or `./auth.json`.
    pub fn load_default() -> anyhow::Result<Self> {
        let path = resolve_auth_json_path()?;
        Self::load(&path)
    }

    fn expand(mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        for fixed in &mut self.fixed_issuers {
            fixed.issuer = expand_env_vars(&fixed.issuer, lookup);
            fixed.jwks_url = expand_env_vars(&fixed.jwks_url, lookup);
            if let Some(aud) = fixed.audience.as_mut() {
                *aud = expand_env_vars(aud, lookup);
            }
        }

        self.dynamic_issuers = self
            .dynamic_issuers
            .into_iter()
            .map(|(issuer, mut cfg)| {
                cfg.jwks_url = expand_env_vars(&cfg.jwks_url, lookup);
                if let Some(aud) = cfg.audience.as_mut() {
                    *aud = expand_env_vars(aud, lookup);
                }
                (expand_env_vars(&issuer, lookup), cfg)
            })
            .collect();

        if let Some(template) = self.jwks_discovery_template.as_mut() {
            *template = expand_env_vars(template, lookup);
        }
        for host in &mut self.jwks_discovery_allowed_hosts {
            *host = expand_env_vars(host, lookup);
        }

        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for fixed in &self.fixed_issuers {
            if fixed.name.trim().is_empty() {
                return Err(anyhow::anyhow!("Fixed issuer `{}` has an empty name", fixed.issuer));
            }
            if fixed.issuer.trim().is_empty() {
                return Err(anyhow::anyhow!("Fixed issuer `{}` has an empty issuer", fixed.name));
            }
            Url::parse(&fixed.jwks_url).map_err(|e| {
                anyhow::anyhow!("Fixed issuer `{}` has invalid jwksUrl: {}", fixed.name, e)
            })?;
        }

        for (issuer, cfg) in &self.dynamic_issuers {
            Url::parse(&cfg.jwks_url).map_err(|e| {
                anyhow::anyhow!("Dynamic issuer `{}` has invalid jwksUrl: {}", issuer, e)
            })?;
        }

        if let Some(template) = &self.jwks_discovery_template {
            if !template.contains(ISSUER_PLACEHOLDER) {
                return Err(anyhow::anyhow!(
                    "jwksDiscoveryTemplate must contain `{}`",
                    ISSUER_PLACEHOLDER
                ));
            }
            let sample = template.replace(ISSUER_PLACEHOLDER, "https://issuer.example.com");
            Url::parse(&sample)
                .map_err(|e| anyhow::anyhow!("jwksDiscoveryTemplate is not a URL: {}", e))?;
            if self.jwks_discovery_allowed_hosts.iter().all(|h| h.trim().is_empty()) {
                return Err(anyhow::anyhow!(
                    "jwksDiscoveryTemplate requires a non-empty `jwksDiscoveryAllowedHosts`"
                ));
            }
        }

        if self.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("httpTimeoutSeconds must be greater than 0"));
        }
        if self.refresh_interval_seconds == Some(0) {
            return Err(anyhow::anyhow!("refreshIntervalSeconds must be greater than 0"));
        }

        match self.mode {
            AuthMode::Chained if self.fixed_issuers.is_empty() => Err(anyhow::anyhow!(
                "Chained mode requires at least one entry in `fixedIssuers`"
            )),
            AuthMode::Dynamic
                if self.dynamic_issuers.is_empty() && self.jwks_discovery_template.is_none() =>
            {
                Err(anyhow::anyhow!(
                    "Dynamic mode requires `dynamicIssuers` or `jwksDiscoveryTemplate`"
                ))
            }
            _ => Ok(()),
        }
    }

    pub fn verifier_options(&self, audience: Option<String>, profile: ClaimsProfile) -> VerifierOptions {
        if self.ignore_expiry {
            warn!(target: "auth.config", "Token expiry checks are DISABLED (ignoreExpiry); never use this in production");
        }
        VerifierOptions {
            leeway_seconds: self.leeway_seconds,
            audience,
            ignore_expiry: self.ignore_expiry,
            profile,
        }
    }

    pub fn fetcher(&self) -> JwksFetcher {
        JwksFetcher::new(Duration::from_secs(self.http_timeout_seconds))
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_seconds.map(Duration::from_secs)
    }

    pub fn discovery_policy(&self) -> DiscoveryPolicy {
        if self.jwks_discovery_allow_insecure {
            warn!(target: "auth.config", "JWKS discovery allows http and internal addresses (jwksDiscoveryAllowInsecure)");
        }
        DiscoveryPolicy::new(self.jwks_discovery_allowed_hosts.iter().map(String::as_str))
            .allow_insecure(self.jwks_discovery_allow_insecure)
    }

    /// Issuer table and discovery convention for dynamic mode.
    pub fn issuer_directory(&self) -> IssuerDirectory {
        let mut directory = IssuerDirectory::new();
        for (issuer, cfg) in &self.dynamic_issuers {
            directory = directory.with_issuer(
                Issuer::new(issuer.as_str()),
                JwksUrl::new(cfg.jwks_url.as_str()),
                self.verifier_options(cfg.audience.clone(), ClaimsProfile::Standard),
            );
        }
        if let Some(template) = &self.jwks_discovery_template {
            directory = directory.with_discovery(
                template.as_str(),
                self.discovery_policy(),
                self.verifier_options(None, ClaimsProfile::Standard),
            );
        }
        directory
    }
}

pub fn resolve_auth_json_path() -> anyhow::Result<PathBuf> {
    if let Ok(p) = env::var("AUTH_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg)
            .join("resource-server-auth")
            .join("auth.json");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = PathBuf::from("auth.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "Could not find auth.json (set AUTH_CONFIG or create ./auth.json)"
    ))
}

fn expand_env_vars(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Some(val) = lookup(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}
