//! Caller identity resolution.
//!
//! The identity provider is an external collaborator: it issues an opaque
//! subject string that arrives here as a bearer token.  Every API operation
//! first resolves that token to exactly one [`User`] record and fails with
//! `Unauthorized` when no record exists.

use axum::http::HeaderMap;

use murmur_store::{Database, StoreError, User};

use crate::config::ServerConfig;
use crate::error::ServerError;

/// Extract the bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

/// Resolve the calling user, or fail with `Unauthorized`.
pub fn authenticate(db: &Database, headers: &HeaderMap) -> Result<User, ServerError> {
    let token = bearer_token(headers).ok_or(ServerError::Unauthorized)?;

    match db.get_user_by_token(token) {
        Ok(user) => Ok(user),
        Err(StoreError::NotFound) => Err(ServerError::Unauthorized),
        Err(e) => Err(e.into()),
    }
}

/// Verify the identity provider's webhook token.
///
/// Constant-time comparison to prevent timing attacks on the shared secret.
pub fn verify_webhook_token(
    headers: &HeaderMap,
    config: &ServerConfig,
) -> Result<(), ServerError> {
    let Some(ref expected) = config.webhook_token else {
        return Err(ServerError::Forbidden(
            "Webhook API is disabled (no WEBHOOK_TOKEN configured)".into(),
        ));
    };

    let token = bearer_token(headers).unwrap_or("");

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid webhook token".into()));
    }

    Ok(())
}
