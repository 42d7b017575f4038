//! NewType wrappers for strong typing throughout the authentication core.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a JWKS URL where an issuer is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Value of a token's `iss` claim.
    ///
    /// Used as the key of the verifier cache and matched exactly against
    /// the issuer configured for each verifier.
    Issuer
);

newtype_string!(
    /// Absolute URL of an issuer's JWKS document.
    JwksUrl
);

newtype_string!(
    /// Operator-facing name of an authentication provider (e.g. "keycloak").
    ///
    /// Appears in logs and health output in place of token contents.
    ProviderName
);

/// Compact JWT as received from the `Authorization` header.
///
/// `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct RawToken(String);

impl RawToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawToken([REDACTED; {} bytes])", self.0.len())
    }
}

impl From<&str> for RawToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issuer_borrow_as_str() {
        let issuer = Issuer::new("https://issuer.example.com");
        let borrowed: &str = std::borrow::Borrow::borrow(&issuer);
        assert_eq!(borrowed, "https://issuer.example.com");
        assert_eq!(issuer.to_string(), "https://issuer.example.com");
    }

    #[test]
    fn test_raw_token_debug_is_redacted() {
        let token = RawToken::new("eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJ4In0.sig");
        let debug = format!("{:?}", token);
        assert!(!debug.contains("eyJ"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_newtype_serde_transparent() {
        let name = ProviderName::new("keycloak");
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"keycloak\"");
        let back: ProviderName = serde_json::from_str("\"aaa\"").unwrap();
        assert_eq!(back.as_str(), "aaa");
    }
}
