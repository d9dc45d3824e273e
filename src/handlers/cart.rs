use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser, entities::cart_item, errors::ServiceError, handlers::common::created_response,
    services::cart::CartView, ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddToCartRequest {
    pub movie_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemResponse {
    pub movie_id: Uuid,
    pub added_at: DateTime<Utc>,
}

impl From<cart_item::Model> for CartItemResponse {
    fn from(model: cart_item::Model) -> Self {
        Self {
            movie_id: model.movie_id,
            added_at: model.added_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "View cart",
    responses(
        (status = 200, description = "Cart contents with current prices", body = ApiResponse<CartView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    let cart = state.services.cart.list(user.user_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    summary = "Add movie to cart",
    request_body = AddToCartRequest,
    responses(
        (status = 201, description = "Movie added", body = ApiResponse<CartItemResponse>),
        (status = 400, description = "Already purchased or already in cart", body = crate::errors::ErrorResponse),
        (status = 404, description = "Movie not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddToCartRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let entry = state
        .services
        .cart
        .add(user.user_id, payload.movie_id)
        .await?;
    Ok(created_response(CartItemResponse::from(entry)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{movie_id}",
    summary = "Remove movie from cart",
    params(("movie_id" = Uuid, Path, description = "Movie ID")),
    responses(
        (status = 204, description = "Removed"),
        (status = 404, description = "Movie not in cart", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(movie_id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.cart.remove(user.user_id, movie_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    summary = "Clear cart",
    responses((status = 200, description = "Cart cleared")),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<serde_json::Value> {
    let removed = state.services.cart.clear(user.user_id).await?;
    Ok(Json(ApiResponse::success(json!({ "removed": removed }))))
}
