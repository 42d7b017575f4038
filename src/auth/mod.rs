//! Bearer-token authentication for a resource server that accepts tokens
//! from several issuers.
//!
//! Two strategies are available:
//!
//! - **Chained**: a fixed, ordered list of [`FixedIssuerAuthenticator`]s
//!   wrapped in a [`ChainedAuthenticator`]. The first provider that accepts
//!   the token wins; an expired token stops the chain.
//! - **Dynamic**: a [`DynamicIssuerAuthenticator`] reads `iss` from the
//!   unverified payload and verifies against that issuer's keys, fetched once
//!   through the shared [`KeyProviderCache`].
//!
//! Either way the result is a [`VerifiedIdentity`], which the
//! [`require_authorization`] middleware turns into an
//! [`AuthorizationContext`] for handlers.
//!
//! ## Usage
//!
//! ```ignore
//! let state = AuthState::new(authenticator);
//! let app = Router::new()
//!     .route("/whoami", get(|ctx: AuthorizationContext| async move { ctx.role().to_string() }))
//!     .layer(middleware::from_fn_with_state(state, require_authorization));
//! ```

mod chain;
mod context;
mod dynamic;
mod error;
mod fixed;
mod identity;
pub mod jwks;
pub mod key_cache;
mod middleware;
pub mod token;

#[cfg(test)]
pub(crate) mod test_support;

pub use chain::{Authenticator, ChainedAuthenticator};
pub use context::{AuthorizationContext, Role};
pub use dynamic::DynamicIssuerAuthenticator;
pub use error::{AuthError, AuthErrorKind, INVALID_TOKEN_CODE};
pub use fixed::{FixedIssuerAuthenticator, ProviderStatus};
pub use identity::{ClaimsProfile, VerifiedIdentity};
pub use jwks::{IssuerVerifier, JwksFetcher, VerifierOptions};
pub use key_cache::{DiscoveryPolicy, IssuerDirectory, IssuerSource, JwksLocator, KeyProviderCache};
pub use middleware::{AuthState, require_authorization};
pub use token::{check_token_structure, extract_bearer, read_unverified_issuer};
