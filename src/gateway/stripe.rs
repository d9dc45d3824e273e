use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;
use serde::Deserialize;
use tracing::{instrument, warn};

use super::{CheckoutSession, CheckoutSessionRequest, GatewayError, PaymentGateway};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::config::AppConfig;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

/// Stripe-compatible hosted checkout client.
pub struct StripeGateway {
    client: Client,
    base_url: String,
    secret_key: Option<String>,
    breaker: CircuitBreaker,
}

impl StripeGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: Option<String>,
        timeout: Duration,
        breaker: CircuitBreaker,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key,
            breaker,
        })
    }

    pub fn from_app_config(cfg: &AppConfig) -> Result<Self, GatewayError> {
        Self::new(
            cfg.payment_gateway_base_url.clone(),
            cfg.payment_gateway_secret_key.clone(),
            cfg.payment_gateway_timeout(),
            CircuitBreaker::new(
                cfg.gateway_breaker_failure_threshold,
                cfg.gateway_breaker_reset(),
                1,
            ),
        )
    }

    /// Form fields in the gateway's bracketed encoding.
    fn form_fields(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let mut fields = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                request.amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
        ];

        if let Some(order_id) = request.metadata.get("order_id") {
            fields.push(("client_reference_id".to_string(), order_id.clone()));
        }
        // payment intent events only see metadata copied onto the intent
        for (key, value) in &request.metadata {
            fields.push((format!("metadata[{}]", key), value.clone()));
            fields.push((
                format!("payment_intent_data[metadata][{}]", key),
                value.clone(),
            ));
        }
        fields
    }

    async fn post_session(
        &self,
        secret_key: &str,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&Self::form_fields(request))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<CheckoutSession>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let secret_key = self
            .secret_key
            .as_deref()
            .ok_or(GatewayError::NotConfigured)?;

        match self.breaker.call(self.post_session(secret_key, request)).await {
            Ok(session) => Ok(session),
            Err(CircuitBreakerError::CircuitOpen) => {
                counter!("cinema_gateway.circuit_open", 1);
                Err(GatewayError::CircuitOpen)
            }
            Err(CircuitBreakerError::Inner(err)) => {
                counter!("cinema_gateway.failures", 1);
                warn!(error = %err, "checkout session request failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CheckoutSessionRequest {
        let mut metadata = BTreeMap::new();
        metadata.insert("order_id".to_string(), "order-1".to_string());
        metadata.insert("user_id".to_string(), "user-1".to_string());
        CheckoutSessionRequest {
            amount_minor: 2498,
            currency: "usd".to_string(),
            description: "Order #order-1".to_string(),
            success_url: "http://localhost/success".to_string(),
            cancel_url: "http://localhost/cancel".to_string(),
            metadata,
            idempotency_key: "pay-1".to_string(),
        }
    }

    fn gateway(base: &str, threshold: u32) -> StripeGateway {
        StripeGateway::new(
            base,
            Some("sk_test_123".to_string()),
            Duration::from_secs(2),
            CircuitBreaker::new(threshold, Duration::from_secs(60), 1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn creates_session_with_amount_metadata_and_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(header("idempotency-key", "pay-1"))
            .and(body_string_contains("unit_amount%5D=2498"))
            .and(body_string_contains("metadata%5Border_id%5D=order-1"))
            .and(body_string_contains(
                "payment_intent_data%5Bmetadata%5D%5Border_id%5D=order-1",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_1",
                "url": "https://checkout.example/cs_test_1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = gateway(&server.uri(), 5)
            .create_checkout_session(&request())
            .await
            .unwrap();
        assert_eq!(session.id, "cs_test_1");
        assert_eq!(session.url, "https://checkout.example/cs_test_1");
    }

    #[tokio::test]
    async fn surfaces_gateway_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": {"message": "Your card was declined."}
            })))
            .mount(&server)
            .await;

        let err = gateway(&server.uri(), 5)
            .create_checkout_session(&request())
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::Rejected { status: 402, ref message } if message == "Your card was declined.");
    }

    #[tokio::test]
    async fn opens_circuit_after_repeated_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let gw = gateway(&server.uri(), 2);
        for _ in 0..2 {
            assert_matches!(
                gw.create_checkout_session(&request()).await,
                Err(GatewayError::Rejected { status: 500, .. })
            );
        }
        assert_matches!(
            gw.create_checkout_session(&request()).await,
            Err(GatewayError::CircuitOpen)
        );
    }

    #[tokio::test]
    async fn missing_secret_key_fails_without_calling_out() {
        let gw = StripeGateway::new(
            "http://127.0.0.1:9",
            None,
            Duration::from_secs(1),
            CircuitBreaker::new(1, Duration::from_secs(1), 1),
        )
        .unwrap();
        assert_matches!(
            gw.create_checkout_session(&request()).await,
            Err(GatewayError::NotConfigured)
        );
    }
}
