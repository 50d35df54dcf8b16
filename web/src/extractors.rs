//! Custom Axum extractors.
//!
//! - [`CallerIdentity`]: the authenticated caller, resolved upstream and passed
//!   in as `X-User-Id` / `X-User-Role` headers
//! - [`CorrelationId`]: the request's correlation id
//!
//! Authentication itself happens in front of this service; these headers are
//! trusted as-is.

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tutoring_core::{Caller, Role, UserId};
use uuid::Uuid;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Header carrying the caller's role (`student` or `teacher`).
pub const USER_ROLE_HEADER: &str = "X-User-Role";

/// The caller making the request.
///
/// Rejects with 401 when either header is missing or malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity(pub Caller);

impl CallerIdentity {
    /// Caller user id.
    #[must_use]
    pub const fn id(&self) -> UserId {
        self.0.id
    }

    /// Caller role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.0.role
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized(format!("missing {USER_ID_HEADER} header")))?
            .parse::<UserId>()
            .map_err(|_| AppError::unauthorized(format!("malformed {USER_ID_HEADER} header")))?;
        let role = header(parts, USER_ROLE_HEADER)
            .ok_or_else(|| AppError::unauthorized(format!("missing {USER_ROLE_HEADER} header")))?
            .parse::<Role>()
            .map_err(|_| {
                AppError::unauthorized(format!("malformed {USER_ROLE_HEADER} header"))
            })?;

        Ok(Self(Caller { id, role }))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Correlation ID for request tracing.
///
/// Reads the id the correlation middleware stored; without the middleware it
/// falls back to the `X-Correlation-ID` header or a fresh UUID.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = parts.extensions.get::<Uuid>().copied().unwrap_or_else(|| {
            parts
                .headers
                .get(CORRELATION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| Uuid::parse_str(s).ok())
                .unwrap_or_else(Uuid::new_v4)
        });

        Ok(Self(correlation_id))
    }
}
