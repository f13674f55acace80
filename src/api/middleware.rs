//! API Middleware
//!
//! Caller identification. Authentication lives in the external auth
//! service; requests arrive here already authenticated and carry the
//! caller's guid in the `X-User-Guid` header. This middleware resolves
//! that guid against the local user projection so handlers can check
//! roles without another lookup.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger::{LedgerEngine, User};

pub const USER_GUID_HEADER: &str = "X-User-Guid";

/// Resolved caller, stored in request extensions.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: User,
}

/// Resolve `X-User-Guid` to a projected user, or reject the request.
pub async fn identity_middleware(
    State(engine): State<Arc<LedgerEngine>>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let raw = headers
        .get(USER_GUID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::MissingHeader(USER_GUID_HEADER.to_string()))?;

    let guid: Uuid = raw
        .parse()
        .map_err(|_| AppError::InvalidHeader(USER_GUID_HEADER.to_string()))?;

    let user = engine
        .get_user(guid)
        .await?
        .ok_or(AppError::UnknownUser(guid))?;

    request.extensions_mut().insert(Caller { user });
    Ok(next.run(request).await)
}
