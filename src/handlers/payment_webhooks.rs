use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    errors::ServiceError,
    gateway::{signature, GatewayEvent},
    AppState,
};

/// Acknowledgement returned to the gateway
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    #[schema(example = "success")]
    pub status: &'static str,
}

// POST /webhook
#[utoipa::path(
    post,
    path = "/webhook",
    summary = "Payment gateway webhook",
    description = "Verifies the Stripe-Signature header and applies the event at most once",
    request_body = String,
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Invalid signature or malformed payload", body = crate::errors::ErrorResponse),
        (status = 500, description = "Processing failed, the gateway should retry", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    let secret = state
        .config
        .payment_webhook_secret
        .as_deref()
        .unwrap_or_default();
    let header = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    if let Err(e) = signature::verify(
        &body,
        header,
        secret,
        state.config.payment_webhook_tolerance_secs,
    ) {
        warn!(error = %e, "Payment webhook signature verification failed");
        return Err(ServiceError::InvalidSignature);
    }

    let event: GatewayEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::MalformedEvent(format!("invalid json: {}", e)))?;

    let outcome = state.services.settlement.process(&event).await?;
    info!(
        event_type = %event.event_type,
        outcome = outcome.as_str(),
        "payment webhook processed"
    );

    Ok(Json(WebhookAck { status: "success" }))
}
