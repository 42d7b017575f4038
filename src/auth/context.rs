//! Typed authorization context built from verified claims.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::auth::error::{AuthError, AuthErrorKind};
use crate::auth::identity::{ClaimsProfile, VerifiedIdentity};

const RESOURCE_PREFIX: &str = "ri:";
const RESOURCE_SERVER_PREFIX: &str = "rs:";

/// Role a token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Provider,
    Consumer,
    Admin,
    Delegate,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Provider => "provider",
            Role::Consumer => "consumer",
            Role::Admin => "admin",
            Role::Delegate => "delegate",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provider" => Ok(Role::Provider),
            "consumer" => Ok(Role::Consumer),
            "admin" => Ok(Role::Admin),
            "delegate" => Ok(Role::Delegate),
            other => Err(AuthError::new(
                AuthErrorKind::RoleInvalid,
                format!("unknown role {:?}", other),
            )),
        }
    }
}

/// Post-authentication identity handed to request handlers.
///
/// Immutable once built. Delegation fields are present exactly when the role
/// is `Delegate`, and a context is either scoped to one resource or is a
/// resource-server token, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationContext {
    user_id: Uuid,
    role: Role,
    constraints: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    delegator_role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delegator_user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_id: Option<Uuid>,
    is_resource_server_token: bool,
    expiry: u64,
}

impl AuthorizationContext {
    /// Build a context from a verified identity, following its claims profile.
    pub fn from_identity(identity: &VerifiedIdentity) -> Result<Self, AuthError> {
        let result = match identity.profile() {
            ClaimsProfile::Standard => Self::from_claims(identity.claims()),
            ClaimsProfile::RealmRoles => Self::from_realm_roles(identity.claims()),
        };
        if let Err(e) = &result {
            debug!(
                target: "auth.context",
                provider = %identity.provider(),
                kind = %e.kind(),
                detail = %e.detail(),
                "Rejected verified token claims"
            );
        }
        result
    }

    /// Build a context from `role`, `cons`, `iid`, `drl`, `did` claims.
    ///
    /// # Errors
    ///
    /// - `RoleInvalid` for a missing or unknown `role`
    /// - `ClaimInvalid` for a non-UUID `sub` or a missing or unrecognized `iid`
    /// - `DelegationIncomplete` for a delegate without valid `drl` and `did`
    /// - `AudienceMismatch` when a resource-server token's `aud` differs
    ///   from its `iid`
    pub fn from_claims(claims: &Map<String, Value>) -> Result<Self, AuthError> {
        let role: Role = claims
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::new(AuthErrorKind::RoleInvalid, "role claim missing"))?
            .parse()?;

        let user_id = parse_subject(claims)?;

        let constraints = claims
            .get("cons")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let (delegator_role, delegator_user_id) = if role == Role::Delegate {
            let delegator_role = claims
                .get("drl")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<Role>().ok())
                .ok_or_else(|| delegation_incomplete("drl claim missing or invalid"))?;
            let delegator_user_id = claims
                .get("did")
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| delegation_incomplete("did claim missing or not a UUID"))?;
            (Some(delegator_role), Some(delegator_user_id))
        } else {
            (None, None)
        };

        let iid = claims
            .get("iid")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::new(AuthErrorKind::ClaimInvalid, "iid claim missing"))?;

        let (resource_id, is_resource_server_token) =
            if let Some(id) = iid.strip_prefix(RESOURCE_PREFIX) {
                let id = Uuid::parse_str(id).map_err(|_| {
                    AuthError::new(AuthErrorKind::ClaimInvalid, "iid resource id is not a UUID")
                })?;
                (Some(id), false)
            } else if let Some(server) = iid.strip_prefix(RESOURCE_SERVER_PREFIX) {
                check_audience(claims, server)?;
                (None, true)
            } else {
                return Err(AuthError::new(
                    AuthErrorKind::ClaimInvalid,
                    format!("iid has unknown prefix: {:?}", iid),
                ));
            };

        Ok(Self {
            user_id,
            role,
            constraints,
            delegator_role,
            delegator_user_id,
            resource_id,
            is_resource_server_token,
            expiry: expiry(claims),
        })
    }

    /// Build a context from a managed identity provider token.
    ///
    /// `provider` when `realm_access.roles` contains "provider", otherwise
    /// `consumer`. Such tokens carry API access constraints and are never
    /// scoped to a resource.
    pub fn from_realm_roles(claims: &Map<String, Value>) -> Result<Self, AuthError> {
        let user_id = parse_subject(claims)?;

        let is_provider = claims
            .get("realm_access")
            .and_then(|r| r.get("roles"))
            .and_then(Value::as_array)
            .is_some_and(|roles| roles.iter().any(|r| r.as_str() == Some("provider")));

        Ok(Self {
            user_id,
            role: if is_provider { Role::Provider } else { Role::Consumer },
            constraints: json!({"access": ["api"]}),
            delegator_role: None,
            delegator_user_id: None,
            resource_id: None,
            is_resource_server_token: false,
            expiry: expiry(claims),
        })
    }

    /// Copy of this context scoped to `resource_id`.
    pub fn with_effective_resource_id(&self, resource_id: Uuid) -> Self {
        Self {
            resource_id: Some(resource_id),
            is_resource_server_token: false,
            ..self.clone()
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Opaque constraint document from `cons`.
    pub fn constraints(&self) -> &Value {
        &self.constraints
    }

    pub fn delegator_role(&self) -> Option<Role> {
        self.delegator_role
    }

    pub fn delegator_user_id(&self) -> Option<Uuid> {
        self.delegator_user_id
    }

    pub fn resource_id(&self) -> Option<Uuid> {
        self.resource_id
    }

    pub fn is_resource_server_token(&self) -> bool {
        self.is_resource_server_token
    }

    /// Expiry as seconds since the epoch; 0 when the token had no `exp`.
    pub fn expiry(&self) -> u64 {
        self.expiry
    }

    pub fn is_delegate(&self) -> bool {
        self.role == Role::Delegate
    }
}

fn parse_subject(claims: &Map<String, Value>) -> Result<Uuid, AuthError> {
    claims
        .get("sub")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| AuthError::new(AuthErrorKind::ClaimInvalid, "sub is not a UUID"))
}

fn delegation_incomplete(detail: &str) -> AuthError {
    AuthError::new(AuthErrorKind::DelegationIncomplete, detail)
}

fn check_audience(claims: &Map<String, Value>, server: &str) -> Result<(), AuthError> {
    let matches = match claims.get("aud") {
        Some(Value::String(aud)) => aud == server,
        Some(Value::Array(auds)) => auds.iter().any(|a| a.as_str() == Some(server)),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(AuthError::new(
            AuthErrorKind::AudienceMismatch,
            format!("aud does not match resource server {:?}", server),
        ))
    }
}

fn expiry(claims: &Map<String, Value>) -> u64 {
    claims.get("exp").and_then(Value::as_u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::SUBJECT;
    use crate::types::ProviderName;

    const RESOURCE: &str = "3fa85f64-5717-4562-b3fc-2c963f66afa6";
    const DELEGATOR: &str = "11111111-1111-1111-1111-111111111111";

    fn claims(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn base(role: &str) -> Map<String, Value> {
        claims(json!({
            "sub": SUBJECT,
            "role": role,
            "cons": {"limit": 10},
            "iid": format!("ri:{}", RESOURCE),
            "exp": 1900000000u64,
        }))
    }

    #[test]
    fn test_consumer_with_resource() {
        let ctx = AuthorizationContext::from_claims(&base("consumer")).unwrap();

        assert_eq!(ctx.user_id().to_string(), SUBJECT);
        assert_eq!(ctx.role(), Role::Consumer);
        assert_eq!(ctx.constraints(), &json!({"limit": 10}));
        assert_eq!(ctx.resource_id().map(|r| r.to_string()).as_deref(), Some(RESOURCE));
        assert!(!ctx.is_resource_server_token());
        assert_eq!(ctx.delegator_role(), None);
        assert_eq!(ctx.expiry(), 1900000000);
    }

    #[test]
    fn test_unknown_role() {
        let err = AuthorizationContext::from_claims(&base("superuser")).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::RoleInvalid);
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_missing_role() {
        let mut c = base("consumer");
        c.remove("role");
        let err = AuthorizationContext::from_claims(&c).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::RoleInvalid);
    }

    #[test]
    fn test_subject_must_be_uuid() {
        let mut c = base("consumer");
        c.insert("sub".into(), json!("alice"));
        let err = AuthorizationContext::from_claims(&c).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::ClaimInvalid);
    }

    #[test]
    fn test_missing_cons_defaults_to_empty_object() {
        let mut c = base("provider");
        c.remove("cons");
        let ctx = AuthorizationContext::from_claims(&c).unwrap();
        assert_eq!(ctx.constraints(), &json!({}));
    }

    #[test]
    fn test_delegate_requires_delegation_claims() {
        let err = AuthorizationContext::from_claims(&base("delegate")).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::DelegationIncomplete);

        let mut only_drl = base("delegate");
        only_drl.insert("drl".into(), json!("provider"));
        let err = AuthorizationContext::from_claims(&only_drl).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::DelegationIncomplete);

        let mut bad_did = only_drl.clone();
        bad_did.insert("did".into(), json!("not-a-uuid"));
        let err = AuthorizationContext::from_claims(&bad_did).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::DelegationIncomplete);
    }

    #[test]
    fn test_delegate_with_delegation_claims() {
        let mut c = base("delegate");
        c.insert("drl".into(), json!("provider"));
        c.insert("did".into(), json!(DELEGATOR));

        let ctx = AuthorizationContext::from_claims(&c).unwrap();
        assert!(ctx.is_delegate());
        assert_eq!(ctx.delegator_role(), Some(Role::Provider));
        assert_eq!(ctx.delegator_user_id().map(|d| d.to_string()).as_deref(), Some(DELEGATOR));
    }

    #[test]
    fn test_delegation_claims_ignored_for_other_roles() {
        let mut c = base("admin");
        c.insert("drl".into(), json!("provider"));
        c.insert("did".into(), json!(DELEGATOR));

        let ctx = AuthorizationContext::from_claims(&c).unwrap();
        assert_eq!(ctx.delegator_role(), None);
        assert_eq!(ctx.delegator_user_id(), None);
    }

    #[test]
    fn test_resource_server_audience_match() {
        let mut c = base("consumer");
        c.insert("iid".into(), json!("rs:resource-server.example.com"));
        c.insert("aud".into(), json!("resource-server.example.com"));

        let ctx = AuthorizationContext::from_claims(&c).unwrap();
        assert!(ctx.is_resource_server_token());
        assert_eq!(ctx.resource_id(), None);
    }

    #[test]
    fn test_resource_server_audience_array() {
        let mut c = base("consumer");
        c.insert("iid".into(), json!("rs:resource-server.example.com"));
        c.insert("aud".into(), json!(["resource-server.example.com"]));
        assert!(AuthorizationContext::from_claims(&c).is_ok());
    }

    #[test]
    fn test_resource_server_audience_mismatch() {
        let mut c = base("consumer");
        c.insert("iid".into(), json!("rs:resource-server.example.com"));
        c.insert("aud".into(), json!("other.example.com"));

        let err = AuthorizationContext::from_claims(&c).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::AudienceMismatch);
        assert_eq!(err.to_body()["description"], "Invalid Audience Value");
    }

    #[test]
    fn test_resource_server_missing_audience() {
        let mut c = base("consumer");
        c.insert("iid".into(), json!("rs:resource-server.example.com"));
        let err = AuthorizationContext::from_claims(&c).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::AudienceMismatch);
    }

    #[test]
    fn test_iid_invalid() {
        let mut c = base("consumer");
        c.insert("iid".into(), json!("xx:something"));
        assert_eq!(
            AuthorizationContext::from_claims(&c).unwrap_err().kind(),
            AuthErrorKind::ClaimInvalid
        );

        c.insert("iid".into(), json!("ri:not-a-uuid"));
        assert_eq!(
            AuthorizationContext::from_claims(&c).unwrap_err().kind(),
            AuthErrorKind::ClaimInvalid
        );

        c.remove("iid");
        assert_eq!(
            AuthorizationContext::from_claims(&c).unwrap_err().kind(),
            AuthErrorKind::ClaimInvalid
        );
    }

    #[test]
    fn test_missing_exp_is_zero() {
        let mut c = base("consumer");
        c.remove("exp");
        let ctx = AuthorizationContext::from_claims(&c).unwrap();
        assert_eq!(ctx.expiry(), 0);
    }

    #[test]
    fn test_realm_roles_provider() {
        let c = claims(json!({
            "sub": SUBJECT,
            "realm_access": {"roles": ["offline_access", "provider"]},
            "exp": 1900000000u64,
        }));
        let ctx = AuthorizationContext::from_realm_roles(&c).unwrap();
        assert_eq!(ctx.role(), Role::Provider);
        assert_eq!(ctx.constraints(), &json!({"access": ["api"]}));
        assert!(!ctx.is_resource_server_token());
        assert_eq!(ctx.resource_id(), None);
    }

    #[test]
    fn test_realm_roles_defaults_to_consumer() {
        let c = claims(json!({"sub": SUBJECT}));
        let ctx = AuthorizationContext::from_realm_roles(&c).unwrap();
        assert_eq!(ctx.role(), Role::Consumer);
        assert_eq!(ctx.expiry(), 0);
    }

    #[test]
    fn test_from_identity_follows_profile() {
        let c = json!({
            "sub": SUBJECT,
            "iss": "https://keycloak.example.com/realms/main",
            "realm_access": {"roles": ["provider"]},
        });
        let identity = VerifiedIdentity::from_claims(
            claims(c),
            ProviderName::new("keycloak"),
            ClaimsProfile::RealmRoles,
        )
        .unwrap();

        let ctx = AuthorizationContext::from_identity(&identity).unwrap();
        assert_eq!(ctx.role(), Role::Provider);
    }

    #[test]
    fn test_with_effective_resource_id() {
        let mut c = base("consumer");
        c.insert("iid".into(), json!("rs:resource-server.example.com"));
        c.insert("aud".into(), json!("resource-server.example.com"));
        let ctx = AuthorizationContext::from_claims(&c).unwrap();

        let resource = Uuid::parse_str(RESOURCE).unwrap();
        let scoped = ctx.with_effective_resource_id(resource);

        assert_eq!(scoped.resource_id(), Some(resource));
        assert!(!scoped.is_resource_server_token());
        assert!(ctx.is_resource_server_token());
        assert_eq!(scoped.user_id(), ctx.user_id());
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Provider, Role::Consumer, Role::Admin, Role::Delegate] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }
}
