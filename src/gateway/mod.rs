/*!
 * # Payment gateway
 *
 * Hosted-checkout integration: the client that opens checkout sessions and the
 * shapes of the webhook events the gateway pushes back.
 */

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod signature;
pub mod stripe;

pub use stripe::StripeGateway;

/// Everything the gateway needs to open a hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSessionRequest {
    /// Amount in minor currency units (cents).
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Opaque correlation data echoed back in webhook events.
    pub metadata: BTreeMap<String, String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
    #[error("gateway circuit open")]
    CircuitOpen,
    #[error("gateway is not configured")]
    NotConfigured,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError>;
}

/// Webhook envelope: `{id, type, data: {object}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

/// The parts of a checkout session or payment intent object settlement reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentObject {
    pub id: String,
    /// Captured total in minor units, present on completed checkout sessions.
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl GatewayEvent {
    /// Key used to recognise redeliveries of this event.
    pub fn idempotency_key(&self, object_id: &str) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("{}:{}", self.event_type, object_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_completed_session_event() {
        let raw = r#"{
            "id": "evt_123",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_test_1",
                "amount_total": 2498,
                "metadata": {"order_id": "o", "user_id": "u"}
            }}
        }"#;
        let event: GatewayEvent = serde_json::from_str(raw).unwrap();
        let object: PaymentObject = serde_json::from_value(event.data.object.clone()).unwrap();

        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(object.amount_total, Some(2498));
        assert_eq!(object.metadata.get("order_id").map(String::as_str), Some("o"));
        assert_eq!(event.idempotency_key(&object.id), "evt_123");
    }

    #[test]
    fn idempotency_key_falls_back_to_type_and_object() {
        let event: GatewayEvent = serde_json::from_str(
            r#"{"type":"checkout.session.expired","data":{"object":{"id":"cs_9"}}}"#,
        )
        .unwrap();
        assert_eq!(event.idempotency_key("cs_9"), "checkout.session.expired:cs_9");
    }
}
