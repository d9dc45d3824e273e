use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cinema Checkout API",
        version = "1.0.0",
        description = r#"
# Cinema Checkout API

Cart, order and payment settlement for the movie storefront.

## Flow

1. Add movies to the cart (`POST /cart/items`).
2. Turn the cart into a pending order (`POST /orders`).
3. Confirm the order (`POST /orders/{id}/confirm`). The response is a `303`
   redirect to the hosted checkout page, or a `200` warning when the order
   total changed and must be accepted again.
4. The gateway reports the outcome on `POST /webhook`; the order becomes
   `paid` and the movies are owned.
5. Paid orders may receive one refund request (`POST /orders/{id}/refund`).

## Authentication

Every endpoint except the webhook and health probes takes a bearer JWT:

```
Authorization: Bearer <your-jwt-token>
```

## Errors

Errors share one body with a stable `code`:

```json
{
  "error": "Bad Request",
  "code": "cart_empty",
  "message": "Your cart is empty.",
  "request_id": "req-abc123xyz",
  "timestamp": "2025-03-01T00:00:00Z"
}
```
        "#,
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Movies awaiting purchase"),
        (name = "Orders", description = "Order assembly, confirmation and cancellation"),
        (name = "Payments", description = "Payment history, checkout landings and gateway webhook"),
        (name = "Purchases", description = "Owned movies"),
        (name = "Refunds", description = "Refund requests"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Cart
        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_to_cart,
        crate::handlers::cart::remove_from_cart,
        crate::handlers::cart::clear_cart,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::create_order,
        crate::handlers::orders::confirm_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::request_refund,

        // Payments
        crate::handlers::payments::list_payments,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::payment_success,
        crate::handlers::payments::payment_cancel,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,

        crate::handlers::purchases::list_purchases,
        crate::handlers::refunds::list_refunds,

        crate::handlers::health::liveness_check,
        crate::handlers::health::readiness_check,
    ),
    components(
        schemas(
            crate::handlers::cart::AddToCartRequest,
            crate::handlers::cart::CartItemResponse,
            crate::services::cart::CartView,
            crate::services::cart::CartLine,

            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderItemResponse,
            crate::handlers::orders::PriceChangedResponse,
            crate::entities::OrderStatus,

            crate::handlers::payments::PaymentResponse,
            crate::handlers::payments::PaymentLandingResponse,
            crate::services::payments::CheckoutSession,
            crate::entities::PaymentStatus,
            crate::handlers::payment_webhooks::WebhookAck,

            crate::handlers::refunds::RefundResponse,
            crate::services::refunds::RefundRequestInput,
            crate::services::orders::ConfirmOrderInput,
            crate::entities::RefundStatus,
            crate::handlers::purchases::PurchaseResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// GET /api-docs/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}
