//! Axum middleware that authenticates requests and attaches the
//! [`AuthorizationContext`] to request extensions.
//!
//! Handlers take `AuthorizationContext` as an extractor and never look at
//! the token themselves.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, instrument, warn};

use crate::auth::chain::Authenticator;
use crate::auth::context::AuthorizationContext;
use crate::auth::error::AuthError;
use crate::auth::identity::VerifiedIdentity;
use crate::auth::token::{check_token_size, extract_bearer};

/// State for [`require_authorization`].
#[derive(Clone)]
pub struct AuthState {
    pub authenticator: Arc<dyn Authenticator>,
}

impl AuthState {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

/// Reject the request unless it carries a valid bearer token.
///
/// On success both the [`VerifiedIdentity`] and the [`AuthorizationContext`]
/// are inserted into the request extensions.
#[instrument(skip_all, name = "auth.middleware")]
pub async fn require_authorization(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_bearer(req.headers()).ok_or_else(|| {
        debug!(target: "auth.middleware", "Missing bearer token");
        AuthError::missing_token()
    })?;
    check_token_size(&token)?;

    let identity = state.authenticator.authenticate(&token).await?;
    let context = AuthorizationContext::from_identity(&identity).inspect_err(|e| {
        warn!(
            target: "auth.middleware",
            provider = %identity.provider(),
            kind = %e.kind(),
            "Verified token has unusable claims"
        );
    })?;

    debug!(
        target: "auth.middleware",
        provider = %identity.provider(),
        role = %context.role(),
        "Request authorized"
    );

    req.extensions_mut().insert(identity);
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

impl<S> FromRequestParts<S> for AuthorizationContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthorizationContext>()
            .cloned()
            .ok_or_else(AuthError::missing_token)
    }
}

impl<S> FromRequestParts<S> for VerifiedIdentity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<VerifiedIdentity>()
            .cloned()
            .ok_or_else(AuthError::missing_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::error::AuthErrorKind;
    use crate::auth::identity::ClaimsProfile;
    use crate::auth::test_support::SUBJECT;
    use crate::types::{ProviderName, RawToken};
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode, header::AUTHORIZATION};
    use axum::routing::get;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    /// Accepts "good" and "delegate-no-did", reports "old" as expired.
    struct StubAuthenticator {
        name: ProviderName,
    }

    #[async_trait]
    impl Authenticator for StubAuthenticator {
        fn name(&self) -> &ProviderName {
            &self.name
        }

        async fn authenticate(&self, token: &RawToken) -> Result<VerifiedIdentity, AuthError> {
            let role = match token.as_str() {
                "good" => "consumer",
                "delegate-no-did" => "delegate",
                "old" => return Err(AuthError::expired("exp in the past")),
                _ => return Err(AuthError::new(AuthErrorKind::SignatureInvalid, "bad signature")),
            };
            let claims = json!({
                "sub": SUBJECT,
                "iss": "https://idp.example.com",
                "role": role,
                "iid": "ri:3fa85f64-5717-4562-b3fc-2c963f66afa6",
            });
            VerifiedIdentity::from_claims(
                claims.as_object().cloned().unwrap_or_default(),
                self.name.clone(),
                ClaimsProfile::Standard,
            )
        }
    }

    async fn whoami(context: AuthorizationContext) -> String {
        format!("{}:{}", context.role(), context.user_id())
    }

    fn app() -> Router {
        let state = AuthState::new(Arc::new(StubAuthenticator {
            name: ProviderName::new("stub"),
        }));
        Router::new()
            .route("/whoami", get(whoami))
            .layer(axum::middleware::from_fn_with_state(state, require_authorization))
    }

    async fn call(authorization: Option<String>) -> (StatusCode, Vec<u8>) {
        let mut builder = HttpRequest::builder().uri("/whoami");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        let response = app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn json_body(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn test_authorized_request_reaches_handler() {
        let (status, body) = call(Some("Bearer good".into())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), format!("consumer:{}", SUBJECT));
    }

    #[tokio::test]
    async fn test_missing_header() {
        let (status, body) = call(None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let body = json_body(&body);
        assert_eq!(body["code"], "Invalid Token");
        assert_eq!(body["description"], "Missing bearer token");
    }

    #[tokio::test]
    async fn test_wrong_scheme_is_missing_token() {
        let (status, _) = call(Some("Basic dXNlcjpwYXNz".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (status, body) = call(Some("Bearer old".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(&body)["description"], "Token Expired");
    }

    #[tokio::test]
    async fn test_rejected_token_hides_detail() {
        let (status, body) = call(Some("Bearer forged".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let text = String::from_utf8(body).unwrap();
        assert!(!text.contains("bad signature"));
    }

    #[tokio::test]
    async fn test_oversized_token_is_bad_request() {
        let token = "a".repeat(crate::auth::token::MAX_TOKEN_BYTES + 1);
        let (status, body) = call(Some(format!("Bearer {}", token))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&body)["description"], "Malformed token");
    }

    #[tokio::test]
    async fn test_incomplete_delegation_is_bad_request() {
        let (status, body) = call(Some("Bearer delegate-no-did".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&body)["description"], "Incomplete delegation claims");
    }

    #[tokio::test]
    async fn test_extractor_without_middleware_rejects() {
        let app = Router::new().route("/whoami", get(whoami));
        let response = app
            .oneshot(HttpRequest::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
