mod token;

use axum::{extract::{FromRef, FromRequestParts}, http::{header::AUTHORIZATION, request::Parts}};
use serde::Serialize;
use tracing::debug;

use crate::{AppError, db::Role};

pub use token::{Claims, HmacTokenGate, SharedTokenGate, TokenError, TokenGate};

/// The identity bound to an authenticated request or connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub role: Role,
}

impl Principal {
    /// The single authority granted to this principal, e.g. `ROLE_STUDENT`.
    pub fn authority(&self) -> String {
        format!("ROLE_{}", self.role.as_str())
    }

    pub fn is_instructor(&self) -> bool {
        self.role == Role::Instructor
    }
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Principal { user_id: claims.sub, role: claims.role }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalView {
    pub user_id: i64,
    pub authority: String,
}

impl From<&Principal> for PrincipalView {
    fn from(principal: &Principal) -> Self {
        PrincipalView { user_id: principal.user_id, authority: principal.authority() }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    SharedTokenGate: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gate = SharedTokenGate::from_ref(state);

        let Some(token) = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
        else {
            return Err(AppError::Unauthorized);
        };

        match gate.verify(token) {
            Ok(claims) => Ok(claims.into()),
            Err(err) => {
                debug!(error = %err, "rejected bearer token");
                Err(AppError::Unauthorized)
            }
        }
    }
}
