use crate::{errors::ServiceError, AppState};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Set by the authentication gateway in front of this service
pub const SHOPPER_ID_HEADER: &str = "x-shopper-id";
pub const API_KEY_HEADER: &str = "x-api-key";

/// The shopper a request acts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShopperId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for ShopperId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(SHOPPER_ID_HEADER)
            .ok_or_else(|| ServiceError::Unauthorized("missing shopper identity".to_string()))?;

        raw.to_str()
            .ok()
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .map(ShopperId)
            .ok_or_else(|| ServiceError::BadRequest("invalid X-Shopper-Id header".to_string()))
    }
}

/// Admin access. Rejects the request unless it carries `X-Api-Key` equal to
/// `admin_api_key`; open when no key is configured.
#[derive(Debug, Clone, Copy)]
pub struct RequireAdmin;

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_api_key.as_deref() else {
            return Ok(RequireAdmin);
        };
        let presented = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected) {
            warn!(path = %parts.uri.path(), "Rejected admin request without a valid API key");
            return Err(ServiceError::Unauthorized("invalid API key".to_string()));
        }
        Ok(RequireAdmin)
    }
}

/// Pagination parameters for list operations
#[derive(Debug, Deserialize, Serialize)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

/// Standard pagination response metadata
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl PaginationMeta {
    pub fn new(page: u64, per_page: u64, total: u64) -> Self {
        let total_pages = if total == 0 || per_page == 0 {
            0
        } else {
            total.div_ceil(per_page)
        };
        Self {
            page,
            per_page,
            total,
            total_pages,
        }
    }
}

/// Standard paginated response wrapper
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, page: u64, per_page: u64, total: u64) -> Self {
        Self {
            data,
            pagination: PaginationMeta::new(page, per_page, total),
        }
    }
}
