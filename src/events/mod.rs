use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::notifications::{Notifier, PaymentConfirmation};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event that follows an already committed change. A closed
    /// channel is logged, never surfaced to the caller.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events emitted after their transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CartItemAdded {
        user_id: Uuid,
        movie_id: Uuid,
    },
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
    },
    OrderCanceled {
        order_id: Uuid,
        user_id: Uuid,
    },
    PaymentSessionCreated {
        payment_id: Uuid,
        order_id: Uuid,
        session_id: String,
    },
    OrderPaid {
        order_id: Uuid,
        user_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
        movie_ids: Vec<Uuid>,
    },
    PaymentCanceled {
        payment_id: Uuid,
        order_id: Uuid,
    },
    RefundRequested {
        refund_id: Uuid,
        order_id: Uuid,
        user_id: Uuid,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Arc<dyn Notifier>) {
    info!("Event processing loop started");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderPaid {
                order_id,
                user_id,
                payment_id,
                amount,
                movie_ids,
            } => {
                let confirmation = PaymentConfirmation {
                    user_id,
                    order_id,
                    payment_id,
                    amount,
                    movie_ids,
                };
                let notifier = notifier.clone();
                tokio::spawn(async move {
                    if let Err(e) = notifier.send_payment_confirmation(&confirmation).await {
                        error!(
                            "Failed to send payment confirmation: order_id={}, error={}",
                            confirmation.order_id, e
                        );
                    }
                });
            }
            Event::OrderCreated {
                order_id,
                user_id,
                total_amount,
            } => {
                info!(%order_id, %user_id, %total_amount, "order created");
            }
            Event::OrderCanceled { order_id, user_id } => {
                info!(%order_id, %user_id, "order canceled");
            }
            Event::PaymentSessionCreated {
                payment_id,
                order_id,
                session_id,
            } => {
                info!(%payment_id, %order_id, %session_id, "checkout session created");
            }
            Event::PaymentCanceled {
                payment_id,
                order_id,
            } => {
                warn!(%payment_id, %order_id, "payment canceled");
            }
            Event::RefundRequested {
                refund_id,
                order_id,
                user_id,
            } => {
                info!(%refund_id, %order_id, %user_id, "refund requested");
            }
            Event::CartItemAdded { user_id, movie_id } => {
                info!(%user_id, %movie_id, "movie added to cart");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationError;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<PaymentConfirmation>>,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn send_payment_confirmation(
            &self,
            confirmation: &PaymentConfirmation,
        ) -> Result<(), NotificationError> {
            self.sent.lock().await.push(confirmation.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn send_payment_confirmation(
            &self,
            _confirmation: &PaymentConfirmation,
        ) -> Result<(), NotificationError> {
            Err(NotificationError::Delivery("smtp down".into()))
        }
    }

    fn paid_event() -> Event {
        Event::OrderPaid {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            amount: dec!(24.98),
            movie_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        }
    }

    #[tokio::test]
    async fn order_paid_triggers_confirmation() {
        let notifier = Arc::new(Recording::default());
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        sender.send_or_log(paid_event()).await;
        drop(sender);
        process_events(rx, notifier.clone()).await;

        // delivery runs on a detached task
        for _ in 0..50 {
            if !notifier.sent.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let sent = notifier.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].amount, dec!(24.98));
    }

    #[tokio::test]
    async fn failing_notifier_does_not_stop_the_loop() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        sender.send_or_log(paid_event()).await;
        sender.send_or_log(paid_event()).await;
        drop(sender);

        process_events(rx, Arc::new(Failing)).await;
    }

    #[tokio::test]
    async fn send_on_closed_channel_is_logged_not_raised() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender.send(paid_event()).await.is_err());
        sender.send_or_log(paid_event()).await;
    }
}
