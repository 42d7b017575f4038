//! Token and JWKS fixtures shared by the auth tests.

#![cfg(test)]

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::types::RawToken;

pub const SUBJECT: &str = "9f2a1c9e-3b7d-4c55-8e1a-6a4b2d0f7c11";

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Symmetric JWK (`kty: oct`) for an HS256 secret.
pub fn oct_jwk(kid: &str, secret: &[u8]) -> Value {
    json!({
        "kty": "oct",
        "kid": kid,
        "alg": "HS256",
        "use": "sig",
        "k": URL_SAFE_NO_PAD.encode(secret),
    })
}

pub fn jwks_body(keys: Vec<Value>) -> Value {
    json!({ "keys": keys })
}

/// Sign `claims` with HS256 under `kid`.
pub fn mint(claims: &Value, kid: &str, secret: &[u8]) -> RawToken {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    let token = encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap();
    RawToken::new(token)
}

/// Standard-profile claims for a consumer with a resource-scoped token.
pub fn standard_claims(issuer: &str, exp: u64) -> Value {
    json!({
        "sub": SUBJECT,
        "iss": issuer,
        "aud": "rs.example.com",
        "exp": exp,
        "iat": now(),
        "role": "consumer",
        "cons": {"access": ["api"]},
        "iid": "ri:3fa85f64-5717-4562-b3fc-2c963f66afa6",
    })
}

/// Mount a JWKS document at `route` that must be fetched exactly `times`.
pub async fn mount_jwks(server: &MockServer, route: &str, body: Value, times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(times)
        .mount(server)
        .await;
}
