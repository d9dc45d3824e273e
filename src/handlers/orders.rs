use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::{order, order_item, OrderStatus},
    errors::ServiceError,
    handlers::{
        common::{created_response, PaginationParams},
        refunds::RefundResponse,
    },
    services::{
        orders::{ConfirmOrderInput, Confirmation, OrderWithItems},
        payments::CheckoutSession,
        refunds::RefundRequestInput,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub movie_id: Uuid,
    /// Unit price frozen when the order was assembled
    pub price_at_order: Decimal,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(model: order_item::Model) -> Self {
        Self {
            id: model.id,
            movie_id: model.movie_id,
            price_at_order: model.price_at_order,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItemResponse>,
}

impl From<order::Model> for OrderResponse {
    fn from(model: order::Model) -> Self {
        Self {
            id: model.id,
            status: model.status,
            total_amount: model.total_amount,
            created_at: model.created_at,
            updated_at: model.updated_at,
            items: Vec::new(),
        }
    }
}

impl From<OrderWithItems> for OrderResponse {
    fn from(value: OrderWithItems) -> Self {
        let mut response = OrderResponse::from(value.order);
        response.items = value.items.into_iter().map(Into::into).collect();
        response
    }
}

/// Body returned when confirmation stopped on a changed total
#[derive(Debug, Serialize, ToSchema)]
pub struct PriceChangedResponse {
    pub warning: String,
    pub order: OrderResponse,
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "The caller's orders, newest first",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<OrderResponse>> {
    let (page, per_page) = params.normalized();
    let (orders, total) = state
        .services
        .orders
        .list_for_user(user.user_id, page, per_page)
        .await?;
    let items = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, page, per_page, total,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.get_for_user(user.user_id, id).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order from cart",
    description = "Prices the cart into a pending order and empties the cart",
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>),
        (status = 400, description = "cart_empty, no_available_items, all_already_purchased or all_already_pending", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.create_from_cart(user.user_id).await?;
    Ok(created_response(OrderResponse::from(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/confirm",
    summary = "Confirm order for payment",
    description = "Redirects to the hosted checkout page, or returns a warning when the order total changed",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body(content = ConfirmOrderInput, description = "Optional; names a session to resume"),
    responses(
        (status = 303, description = "Redirect to checkout_url", body = CheckoutSession),
        (status = 200, description = "Total changed, re-confirm to proceed", body = PriceChangedResponse),
        (status = 400, description = "Order is not pending", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 503, description = "Payment gateway unavailable, retry", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    payload: Option<Json<ConfirmOrderInput>>,
) -> Result<Response, ServiceError> {
    let input = payload.map(|Json(input)| input).unwrap_or_default();
    match state
        .services
        .orders
        .confirm_for_payment(user.user_id, id, input.external_payment_id)
        .await?
    {
        Confirmation::Redirect(session) => Ok((
            StatusCode::SEE_OTHER,
            [(header::LOCATION, session.checkout_url.clone())],
            Json(session),
        )
            .into_response()),
        Confirmation::PriceChanged {
            revalidation,
            order,
        } => Ok((
            StatusCode::OK,
            Json(PriceChangedResponse {
                warning: format!(
                    "Order total has changed to {:.2}. Do you want to proceed?",
                    revalidation.new_total
                ),
                order: order.into(),
            }),
        )
            .into_response()),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order canceled", body = ApiResponse<OrderResponse>),
        (status = 400, description = "already_canceled or requires_refund", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.cancel(user.user_id, id).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/refund",
    summary = "Request refund",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = RefundRequestInput,
    responses(
        (status = 201, description = "Refund request recorded", body = ApiResponse<RefundResponse>),
        (status = 400, description = "not_paid, already_requested or validation_error", body = crate::errors::ErrorResponse),
        (status = 404, description = "order_not_found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn request_refund(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundRequestInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let refund = state
        .services
        .refunds
        .request_refund(user.user_id, id, payload)
        .await?;
    Ok(created_response(RefundResponse::from(refund)))
}
