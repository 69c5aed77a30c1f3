//! Custom Axum extractors.
//!
//! - `CurrentUser`: the buyer, from the `X-User-Id` header set by the identity layer
//! - `AdminKey`: admin access, checked against `ADMIN_API_KEY`
//! - `Signature`: the provider's webhook signature header

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use rifa_core::types::UserId;
use uuid::Uuid;

/// Header carrying the authenticated buyer
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the admin key
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Authenticated buyer.
///
/// Authentication happens upstream; this only reads the identity it forwards.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = header(&parts.headers, USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("X-User-Id header required"))?;
        let id = Uuid::parse_str(raw)
            .map_err(|_| AppError::unauthorized("X-User-Id is not a valid user id"))?;
        Ok(Self(UserId::from_uuid(id)))
    }
}

/// Proof the caller presented the admin key
#[derive(Debug, Clone, Copy)]
pub struct AdminKey;

#[async_trait]
impl FromRequestParts<AppState> for AdminKey {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_key.as_deref() else {
            return Err(AppError::forbidden("admin API disabled"));
        };
        let presented = header(&parts.headers, ADMIN_KEY_HEADER)
            .ok_or_else(|| AppError::unauthorized("X-Admin-Key header required"))?;
        if constant_time_eq::constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(Self)
        } else {
            Err(AppError::forbidden("invalid admin key"))
        }
    }
}

/// Webhook signature, empty when the header is absent so verification fails
#[derive(Debug, Clone)]
pub struct Signature(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Signature
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            header(&parts.headers, rifa_pix::webhook::SIGNATURE_HEADER)
                .unwrap_or_default()
                .to_string(),
        ))
    }
}
