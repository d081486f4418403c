//! Bearer-token identity extraction.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::error::ApiError;
use super::AppState;
use crate::services::orders::{Identity, Role};
use crate::ServiceError;

fn identify(parts: &Parts, state: &AppState) -> Result<Identity, ApiError> {
    let token = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ServiceError::Unauthorized)?;
    state.tokens.resolve(token).cloned().ok_or_else(|| ServiceError::Unauthorized.into())
}

/// An admin or machine caller.
pub struct Staff(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for Staff {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = identify(parts, state)?;
        match identity.role {
            Role::Admin | Role::Machine => Ok(Self(identity)),
            Role::Customer => Err(ServiceError::Forbidden("staff access required".into()).into()),
        }
    }
}

/// An admin caller.
pub struct Admin(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = identify(parts, state)?;
        if identity.role != Role::Admin {
            return Err(ServiceError::Forbidden("admin access required".into()).into());
        }
        Ok(Self(identity))
    }
}
