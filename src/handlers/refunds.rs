use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::{refund_request, RefundStatus},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub reason: String,
    pub status: RefundStatus,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<refund_request::Model> for RefundResponse {
    fn from(model: refund_request::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            reason: model.reason,
            status: model.status,
            processed: model.processed,
            created_at: model.created_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/refunds",
    summary = "List refund requests",
    responses(
        (status = 200, description = "The caller's refund requests", body = ApiResponse<Vec<RefundResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Refunds"
)]
pub async fn list_refunds(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<RefundResponse>> {
    let refunds = state.services.refunds.list_for_user(user.user_id).await?;
    Ok(Json(ApiResponse::success(
        refunds.into_iter().map(RefundResponse::from).collect(),
    )))
}
