use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::{payment, OrderStatus, PaymentStatus},
    handlers::common::PaginationParams,
    services::payments::PaymentLanding,
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub external_payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<payment::Model> for PaymentResponse {
    fn from(model: payment::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            status: model.status,
            amount: model.amount,
            external_payment_id: model.external_payment_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Payment and order state shown on the checkout return pages
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentLandingResponse {
    pub payment: PaymentResponse,
    pub order_status: OrderStatus,
    pub message: String,
}

impl PaymentLandingResponse {
    fn new(landing: PaymentLanding, message: impl Into<String>) -> Self {
        Self {
            payment: landing.payment.into(),
            order_status: landing.order_status,
            message: message.into(),
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/payments",
    summary = "Payment history",
    params(PaginationParams),
    responses(
        (status = 200, description = "The caller's payments, newest first", body = ApiResponse<PaginatedResponse<PaymentResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<PaymentResponse>> {
    let (page, per_page) = params.normalized();
    let (payments, total) = state
        .services
        .payments
        .list_for_user(user.user_id, page, per_page)
        .await?;
    let items = payments.into_iter().map(PaymentResponse::from).collect();
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, page, per_page, total,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    summary = "Get payment",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment", body = ApiResponse<PaymentResponse>),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentResponse> {
    let payment = state.services.payments.get_for_user(user.user_id, id).await?;
    Ok(Json(ApiResponse::success(payment.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}/status/success",
    summary = "Checkout success landing",
    description = "Reports the payment state. Settlement happens only through the webhook.",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Current payment and order state", body = ApiResponse<PaymentLandingResponse>),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn payment_success(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentLandingResponse> {
    let landing = state
        .services
        .payments
        .landing_success(user.user_id, id)
        .await?;
    let message = match landing.order_status {
        OrderStatus::Paid => "Payment confirmed.",
        _ => "Payment is being processed.",
    };
    Ok(Json(ApiResponse::success(PaymentLandingResponse::new(
        landing, message,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}/status/cancel",
    summary = "Checkout cancel landing",
    description = "Cancels the abandoned payment attempt and its pending order",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment canceled", body = ApiResponse<PaymentLandingResponse>),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn payment_cancel(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentLandingResponse> {
    let landing = state
        .services
        .payments
        .landing_cancel(user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(PaymentLandingResponse::new(
        landing,
        "Payment was canceled.",
    ))))
}
