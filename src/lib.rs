// Core modules
pub mod auth;
pub mod config;
pub mod types;

// Server wiring
pub mod api;
pub mod service;

// Re-export key types and functions
pub use auth::{
    AuthError, AuthErrorKind, Authenticator, AuthorizationContext, ChainedAuthenticator,
    DynamicIssuerAuthenticator, FixedIssuerAuthenticator, KeyProviderCache, Role,
    VerifiedIdentity,
};
pub use config::{AuthMode, AuthSettings};
pub use service::AuthService;
pub use types::{Issuer, JwksUrl, ProviderName, RawToken};

use anyhow::Result;
use std::sync::Arc;

/// Convenience function to build the configured authentication service.
///
/// Loads `auth.json` from the default locations and performs the initial key
/// load for every fixed provider.
pub async fn create_service() -> Result<Arc<AuthService>> {
    let settings = AuthSettings::load_default()?;
    let service = AuthService::from_settings(&settings).await;
    Ok(Arc::new(service))
}
