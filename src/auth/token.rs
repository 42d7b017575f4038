//! Bearer token extraction and unverified issuer routing.
//!
//! Nothing here checks a signature. The issuer read by
//! [`read_unverified_issuer`] is only good for picking a verifier; no other
//! claim may be trusted before verification.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use tracing::debug;

use crate::auth::error::AuthError;
use crate::types::{Issuer, RawToken};

/// Maximum accepted token size (8 KiB), checked before any decoding.
pub const MAX_TOKEN_BYTES: usize = 8192;

const BEARER_PREFIX: &str = "Bearer ";

/// Pull the bearer token out of the `Authorization` header.
///
/// Returns `None` when the header is missing, not valid UTF-8, does not start
/// with `"Bearer "`, or carries only whitespace after the prefix.
pub fn extract_bearer(headers: &HeaderMap) -> Option<RawToken> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix(BEARER_PREFIX)?.trim();
    if token.is_empty() {
        return None;
    }
    Some(RawToken::new(token))
}

/// Reject tokens over [`MAX_TOKEN_BYTES`].
pub fn check_token_size(token: &RawToken) -> Result<(), AuthError> {
    if token.len() > MAX_TOKEN_BYTES {
        return Err(AuthError::malformed(format!(
            "token is {} bytes, limit is {}",
            token.len(),
            MAX_TOKEN_BYTES
        )));
    }
    Ok(())
}

/// Reject tokens that are not a compact JWS: size limit, exactly three
/// segments and a decodable header.
pub fn check_token_structure(token: &RawToken) -> Result<(), AuthError> {
    check_token_size(token)?;

    let segments = token.as_str().split('.').count();
    if segments != 3 {
        return Err(AuthError::malformed(format!(
            "token has {} segments, expected 3",
            segments
        )));
    }

    jsonwebtoken::decode_header(token.as_str())
        .map_err(|e| AuthError::malformed(format!("token header is unreadable: {}", e)))?;
    Ok(())
}

/// Decode the payload segment without verification and return its `iss`.
///
/// # Errors
///
/// `MalformedToken` if the token has fewer than two segments or the payload
/// is not base64url JSON; `IssuerUnresolvable` if `iss` is absent or empty.
pub fn read_unverified_issuer(token: &RawToken) -> Result<Issuer, AuthError> {
    check_token_size(token)?;

    let payload = token
        .as_str()
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::malformed("token has fewer than 2 segments"))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::malformed(format!("payload is not base64url: {}", e)))?;

    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::malformed(format!("payload is not JSON: {}", e)))?;

    match claims.get("iss").and_then(|v| v.as_str()) {
        Some(iss) if !iss.is_empty() => {
            debug!(target: "auth.token", issuer = %iss, "Read unverified issuer");
            Ok(Issuer::new(iss))
        }
        _ => Err(AuthError::new(
            crate::auth::AuthErrorKind::IssuerUnresolvable,
            "token payload has no iss claim",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthErrorKind;
    use http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn token_with_payload(payload: &str) -> RawToken {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.as_bytes());
        RawToken::new(format!("{}.{}.signature", header, body))
    }

    #[test]
    fn test_extract_bearer_valid() {
        let token = extract_bearer(&headers_with("Bearer abc.def.ghi")).unwrap();
        assert_eq!(token.as_str(), "abc.def.ghi");
    }

    #[test]
    fn test_extract_bearer_trims_whitespace() {
        let token = extract_bearer(&headers_with("Bearer   abc.def.ghi  ")).unwrap();
        assert_eq!(token.as_str(), "abc.def.ghi");
    }

    #[test]
    fn test_extract_bearer_absent_cases() {
        assert!(extract_bearer(&HeaderMap::new()).is_none());
        assert!(extract_bearer(&headers_with("Basic dXNlcjpwYXNz")).is_none());
        assert!(extract_bearer(&headers_with("bearer abc.def.ghi")).is_none());
        assert!(extract_bearer(&headers_with("Bearer")).is_none());
        assert!(extract_bearer(&headers_with("Bearer    ")).is_none());
    }

    #[test]
    fn test_structure_accepts_compact_jws() {
        assert!(check_token_structure(&token_with_payload(r#"{"iss":"x"}"#)).is_ok());
    }

    #[test]
    fn test_structure_rejects_non_jwt() {
        for raw in ["not-a-jwt", "a.b", "a.b.c.d", "!!.e30.sig"] {
            let err = check_token_structure(&RawToken::new(raw)).unwrap_err();
            assert_eq!(err.kind(), AuthErrorKind::MalformedToken, "{}", raw);
        }
    }

    #[test]
    fn test_structure_rejects_oversized() {
        let err = check_token_structure(&RawToken::new("a".repeat(MAX_TOKEN_BYTES + 1))).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::MalformedToken);
    }

    #[test]
    fn test_read_issuer() {
        let token = token_with_payload(r#"{"iss":"https://idp.example.com","sub":"x"}"#);
        let issuer = read_unverified_issuer(&token).unwrap();
        assert_eq!(issuer.as_str(), "https://idp.example.com");
    }

    #[test]
    fn test_read_issuer_accepts_two_segments() {
        let body = URL_SAFE_NO_PAD.encode(br#"{"iss":"tenant"}"#);
        let token = RawToken::new(format!("header.{}", body));
        assert_eq!(read_unverified_issuer(&token).unwrap().as_str(), "tenant");
    }

    #[test]
    fn test_read_issuer_tolerates_padding() {
        let body = base64::engine::general_purpose::URL_SAFE.encode(br#"{"iss":"abc"}"#);
        assert!(body.ends_with("=="));
        let token = RawToken::new(format!("h.{}.s", body));
        assert_eq!(read_unverified_issuer(&token).unwrap().as_str(), "abc");
    }

    #[test]
    fn test_read_issuer_single_segment() {
        let err = read_unverified_issuer(&RawToken::new("justonesegment")).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::MalformedToken);
    }

    #[test]
    fn test_read_issuer_bad_base64() {
        let err = read_unverified_issuer(&RawToken::new("h.!!!not-base64!!!.s")).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::MalformedToken);
    }

    #[test]
    fn test_read_issuer_bad_json() {
        let body = URL_SAFE_NO_PAD.encode(b"not json");
        let err = read_unverified_issuer(&RawToken::new(format!("h.{}.s", body))).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::MalformedToken);
    }

    #[test]
    fn test_read_issuer_missing_iss() {
        let err = read_unverified_issuer(&token_with_payload(r#"{"sub":"x"}"#)).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::IssuerUnresolvable);

        let err = read_unverified_issuer(&token_with_payload(r#"{"iss":42}"#)).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::IssuerUnresolvable);

        let err = read_unverified_issuer(&token_with_payload(r#"{"iss":""}"#)).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::IssuerUnresolvable);
    }

    #[test]
    fn test_oversized_token_rejected() {
        let token = RawToken::new("a".repeat(MAX_TOKEN_BYTES + 1));
        let err = read_unverified_issuer(&token).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::MalformedToken);
        assert!(check_token_size(&RawToken::new("a".repeat(MAX_TOKEN_BYTES))).is_ok());
    }
}
