use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};

use crate::state::AppState;

use super::jwt::decode_jwt;

/// Principal id taken from a verified `Authorization: Bearer` token.
///
/// Never rejects: no secret configured, no header, or a token that fails
/// verification all yield an anonymous (`None`) principal.
#[derive(Debug, Clone, Default)]
pub struct OptionalPrincipal(pub Option<String>);

impl FromRequestParts<Arc<AppState>> for OptionalPrincipal {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.jwt_secret.as_deref() else {
            return Ok(Self(None));
        };
        let Some(token) = bearer_token(&parts.headers) else {
            return Ok(Self(None));
        };
        match decode_jwt(token, secret) {
            Ok(claims) => Ok(Self(Some(claims.sub))),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring invalid bearer token");
                Ok(Self(None))
            }
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
