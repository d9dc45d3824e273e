//! Outbound user notifications. Delivery is best effort: callers log failures
//! and never roll back the state change that triggered them.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// "Payment confirmed" message sent after an order settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub movie_ids: Vec<Uuid>,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_payment_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<(), NotificationError>;
}

/// Writes notifications to the log. Used until a mail transport is wired in.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_payment_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<(), NotificationError> {
        info!(
            user_id = %confirmation.user_id,
            order_id = %confirmation.order_id,
            amount = %confirmation.amount,
            movies = confirmation.movie_ids.len(),
            "payment confirmation queued for delivery"
        );
        Ok(())
    }
}
