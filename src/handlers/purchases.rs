use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{auth::AuthUser, entities::purchased_movie, ApiResponse, ApiResult, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct PurchaseResponse {
    pub movie_id: Uuid,
    pub payment_id: Uuid,
    pub purchased_at: DateTime<Utc>,
}

impl From<purchased_movie::Model> for PurchaseResponse {
    fn from(model: purchased_movie::Model) -> Self {
        Self {
            movie_id: model.movie_id,
            payment_id: model.payment_id,
            purchased_at: model.purchased_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/purchases",
    summary = "List owned movies",
    responses(
        (status = 200, description = "Movies the caller owns", body = ApiResponse<Vec<PurchaseResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Purchases"
)]
pub async fn list_purchases(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<PurchaseResponse>> {
    let purchases = state.services.purchases.list_for_user(user.user_id).await?;
    Ok(Json(ApiResponse::success(
        purchases.into_iter().map(PurchaseResponse::from).collect(),
    )))
}
