//! Error types for token authentication and context construction.
//!
//! Every failure carries an [`AuthErrorKind`] discriminant. Chain and
//! short-circuit decisions branch on the kind; the free-text detail is only
//! ever written to logs.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Response `code` shared by every authentication failure.
pub const INVALID_TOKEN_CODE: &str = "Invalid Token";

/// Classification of an authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    /// No bearer token in the request.
    MissingToken,
    /// The token could not be split or decoded.
    MalformedToken,
    /// The issuer is absent or no JWKS location is known for it.
    IssuerUnresolvable,
    /// Signature, issuer or algorithm did not verify against this provider.
    SignatureInvalid,
    /// The provider has no usable verifier yet.
    ProviderUnavailable,
    /// The token's `exp` is in the past.
    TokenExpired,
    /// A resource-server token whose `aud` differs from its `iid` audience.
    AudienceMismatch,
    /// The `role` claim is missing or not a known role.
    RoleInvalid,
    /// A delegate token without valid `drl`/`did` claims.
    DelegationIncomplete,
    /// Any other required claim is missing or has the wrong shape.
    ClaimInvalid,
    /// The issuer's JWKS document could not be fetched or parsed.
    UpstreamJwksUnavailable,
    /// Generic rejection (chain exhausted, dynamic issuer failure).
    Unauthorized,
}

impl AuthErrorKind {
    /// HTTP status reported to the client.
    pub fn status(self) -> StatusCode {
        match self {
            Self::MalformedToken
            | Self::RoleInvalid
            | Self::DelegationIncomplete
            | Self::ClaimInvalid => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Client-facing description.
    ///
    /// Provider-level failures collapse into "Unauthorized" so responses never
    /// reveal which issuer or key was tried.
    pub fn description(self) -> &'static str {
        match self {
            Self::MissingToken => "Missing bearer token",
            Self::MalformedToken => "Malformed token",
            Self::TokenExpired => "Token Expired",
            Self::AudienceMismatch => "Invalid Audience Value",
            Self::RoleInvalid => "Invalid role",
            Self::DelegationIncomplete => "Incomplete delegation claims",
            Self::ClaimInvalid => "Invalid claim",
            Self::IssuerUnresolvable
            | Self::SignatureInvalid
            | Self::ProviderUnavailable
            | Self::UpstreamJwksUnavailable
            | Self::Unauthorized => "Unauthorized",
        }
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Authentication failure: a kind plus a detail for operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError {
    kind: AuthErrorKind,
    detail: String,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn missing_token() -> Self {
        Self::new(AuthErrorKind::MissingToken, "no bearer token in Authorization header")
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::MalformedToken, detail)
    }

    pub fn expired(detail: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::TokenExpired, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Unauthorized, detail)
    }

    pub fn jwks_unavailable(detail: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::UpstreamJwksUnavailable, detail)
    }

    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn is_expired(&self) -> bool {
        self.kind == AuthErrorKind::TokenExpired
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// JSON body sent to clients: `{code, description}`.
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "code": INVALID_TOKEN_CODE,
            "description": self.kind.description(),
        })
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}
