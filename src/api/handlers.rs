use std::sync::Arc;

use axum::{
    Json, async_trait,
    extract::{FromRequestParts, State},
    http::request::Parts,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::{LedgerService, UpdateRequest};
use crate::domain::{Operation, UserId};

use super::{ApiError, ApiResult};

/// Header naming the system an update originates from.
pub const SOURCE_TYPE_HEADER: &str = "Source-Type";

/// Origin of a balance update. Only used as a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Game,
    Server,
    Payment,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Game => "game",
            SourceType::Server => "server",
            SourceType::Payment => "payment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "game" => Some(SourceType::Game),
            "server" => Some(SourceType::Server),
            "payment" => Some(SourceType::Payment),
            _ => None,
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SourceType {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(SOURCE_TYPE_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(SourceType::from_str)
            .ok_or_else(|| ApiError::BadRequest("Unknown source type".to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub operation: Operation,
    pub balance: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Record a game result for the configured user.
pub async fn update_state(
    State(service): State<Arc<LedgerService>>,
    source: SourceType,
    Json(request): Json<UpdateRequest>,
) -> ApiResult<Json<UpdateResponse>> {
    debug!(source = source.as_str(), operation_id = %request.operation_id, "update requested");

    let recorded = service.record(request).await?;
    Ok(Json(UpdateResponse {
        operation: recorded.operation,
        balance: recorded.balance,
    }))
}

pub async fn balance(State(service): State<Arc<LedgerService>>) -> ApiResult<Json<BalanceResponse>> {
    let user = service.balance().await?;
    Ok(Json(BalanceResponse {
        user_id: user.id,
        balance: user.balance,
    }))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
