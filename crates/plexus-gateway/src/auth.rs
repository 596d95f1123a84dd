//! Authentication at the gateway boundary.
//!
//! Tokens arrive either as a bearer header or, for WebSocket clients that
//! cannot set headers, as a `?token=` query parameter. Verification goes
//! through the [`TokenVerifier`] collaborator; the default implementation is
//! a static token table from configuration.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};

use plexus_core::{AuthError, Principal, TokenVerifier};

/// [`TokenVerifier`] over a fixed token → subject table.
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    #[must_use]
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens
            .get(token)
            .map(|subject| Principal {
                subject: subject.clone(),
            })
            .ok_or(AuthError::InvalidToken)
    }
}

/// Pull a bearer token out of the `Authorization` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Establish the principal for a request: bearer header first, query token
/// as the fallback.
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] when no token is presented,
/// [`AuthError::InvalidToken`] when the token does not verify.
pub async fn authenticate(
    verifier: &dyn TokenVerifier,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Principal, AuthError> {
    let token = bearer_token(headers)
        .or(query_token)
        .ok_or(AuthError::MissingToken)?;
    verifier.verify(token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn verifier() -> StaticTokenVerifier {
        StaticTokenVerifier::new(HashMap::from([(
            "secret".to_string(),
            "editor".to_string(),
        )]))
    }

    #[tokio::test]
    async fn bearer_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer secret"),
        );
        let principal = authenticate(&verifier(), &headers, Some("bogus"))
            .await
            .unwrap();
        assert_eq!(principal.subject, "editor");
    }

    #[tokio::test]
    async fn query_token_is_the_fallback() {
        let principal = authenticate(&verifier(), &HeaderMap::new(), Some("secret"))
            .await
            .unwrap();
        assert_eq!(principal.subject, "editor");
    }

    #[tokio::test]
    async fn missing_and_invalid_tokens_fail() {
        assert!(matches!(
            authenticate(&verifier(), &HeaderMap::new(), None).await,
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            authenticate(&verifier(), &HeaderMap::new(), Some("wrong")).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn malformed_authorization_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
