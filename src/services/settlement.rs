/*!
 * # Settlement
 *
 * Applies verified gateway events to local payment, order and ownership state.
 * Each event is applied at most once: its idempotency key is written to
 * `processed_webhook_events` in the same transaction as its effects, and an
 * order that is already paid short-circuits before any write.
 */

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    IntoActiveModel, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use strum::EnumString;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
        payment::{self, Entity as PaymentEntity},
        payment_item::{self, Entity as PaymentItemEntity},
        processed_webhook_event::{self, Entity as ProcessedEventEntity},
        purchased_movie::{self, Entity as PurchasedMovieEntity},
        OrderStatus, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayEvent, PaymentObject},
    services::{
        order_state::{OrderStateMachine, Transition},
        payments::{cancel_checkout, from_minor_units, open_attempt_exists},
    },
};

/// Gateway event types this service reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
pub enum EventKind {
    #[strum(serialize = "checkout.session.completed")]
    CheckoutCompleted,
    #[strum(
        serialize = "checkout.session.expired",
        serialize = "checkout.session.async_payment_failed",
        serialize = "payment_intent.payment_failed",
        serialize = "payment_intent.failed"
    )]
    CheckoutFailed,
    #[strum(serialize = "payment_intent.succeeded")]
    PaymentSucceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled { order_id: Uuid, payment_id: Uuid },
    AlreadyPaid { order_id: Uuid },
    /// Completion arrived for an order the user already canceled. No ownership
    /// is granted; the capture needs manual review.
    CanceledOrder { order_id: Uuid },
    CheckoutCanceled { order_id: Uuid },
    /// A stale session failed while a newer one for the order is still open.
    AttemptCanceled { order_id: Uuid },
    NothingToCancel { order_id: Uuid },
    Duplicate,
    Ignored,
}

impl SettlementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Settled { .. } => "settled",
            Self::AlreadyPaid { .. } => "already_paid",
            Self::CanceledOrder { .. } => "canceled_order",
            Self::CheckoutCanceled { .. } => "checkout_canceled",
            Self::AttemptCanceled { .. } => "attempt_canceled",
            Self::NothingToCancel { .. } => "nothing_to_cancel",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
        }
    }
}

/// Correlation data pulled out of untrusted event metadata.
#[derive(Debug, Clone, Copy)]
struct Correlation {
    order_id: Uuid,
    user_id: Uuid,
    payment_id: Option<Uuid>,
}

fn metadata_uuid(metadata: &BTreeMap<String, String>, key: &str) -> Result<Uuid, ServiceError> {
    let raw = metadata
        .get(key)
        .ok_or_else(|| ServiceError::MalformedEvent(format!("metadata.{} is missing", key)))?;
    Uuid::parse_str(raw)
        .map_err(|_| ServiceError::MalformedEvent(format!("metadata.{} is not a valid id", key)))
}

fn correlation(object: &PaymentObject) -> Result<Correlation, ServiceError> {
    Ok(Correlation {
        order_id: metadata_uuid(&object.metadata, "order_id")?,
        user_id: metadata_uuid(&object.metadata, "user_id")?,
        payment_id: object
            .metadata
            .get("payment_id")
            .and_then(|raw| Uuid::parse_str(raw).ok()),
    })
}

fn payment_object(event: &GatewayEvent) -> Result<PaymentObject, ServiceError> {
    serde_json::from_value(event.data.object.clone())
        .map_err(|e| ServiceError::MalformedEvent(format!("data.object: {}", e)))
}

/// Loads the order named by metadata and checks it belongs to the user named there.
async fn correlated_order<C: ConnectionTrait>(
    conn: &C,
    corr: &Correlation,
) -> Result<order::Model, ServiceError> {
    let order = OrderEntity::find_by_id(corr.order_id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::MalformedEvent(format!("order {} does not exist", corr.order_id))
        })?;
    if order.user_id != corr.user_id {
        return Err(ServiceError::MalformedEvent(format!(
            "order {} does not belong to the event's user",
            corr.order_id
        )));
    }
    Ok(order)
}

/// Finds the ledger row for this checkout: by session id, then by the
/// payment id carried in metadata.
async fn correlated_payment<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    session_id: &str,
    payment_id: Option<Uuid>,
) -> Result<Option<payment::Model>, ServiceError> {
    let by_session = PaymentEntity::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .filter(payment::Column::ExternalPaymentId.eq(session_id))
        .one(conn)
        .await?;
    if by_session.is_some() {
        return Ok(by_session);
    }

    match payment_id {
        Some(id) => Ok(PaymentEntity::find_by_id(id)
            .one(conn)
            .await?
            .filter(|p| p.order_id == order_id)),
        None => Ok(None),
    }
}

async fn already_processed<C: ConnectionTrait>(conn: &C, key: &str) -> Result<bool, ServiceError> {
    Ok(ProcessedEventEntity::find_by_id(key.to_string())
        .one(conn)
        .await?
        .is_some())
}

/// Writes the ledger row. A unique violation means a concurrent delivery of
/// the same event committed first.
async fn record_processed(
    txn: &DatabaseTransaction,
    key: &str,
    event_type: &str,
    order_id: Option<Uuid>,
    outcome: &SettlementOutcome,
) -> Result<bool, ServiceError> {
    let row = processed_webhook_event::ActiveModel {
        event_id: Set(key.to_string()),
        event_type: Set(event_type.to_string()),
        order_id: Set(order_id),
        outcome: Set(outcome.as_str().to_string()),
        processed_at: Set(Utc::now()),
    };
    match row.insert(txn).await {
        Ok(_) => Ok(true),
        Err(e) if ServiceError::is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Consumes gateway webhook events
#[derive(Clone)]
pub struct SettlementProcessor {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl SettlementProcessor {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type, event_id = ?event.id))]
    pub async fn process(&self, event: &GatewayEvent) -> Result<SettlementOutcome, ServiceError> {
        let outcome = match EventKind::from_str(&event.event_type) {
            Ok(EventKind::CheckoutCompleted) => self.settle_checkout(event).await,
            Ok(EventKind::CheckoutFailed) => self.fail_checkout(event).await,
            Ok(EventKind::PaymentSucceeded) => {
                // settlement is driven by the session completion event
                info!("payment intent succeeded, awaiting checkout completion");
                Ok(SettlementOutcome::Ignored)
            }
            Err(_) => {
                info!("unhandled gateway event type acknowledged");
                Ok(SettlementOutcome::Ignored)
            }
        };

        match &outcome {
            Ok(result) => counter!("cinema_settlement.events", 1, "outcome" => result.as_str()),
            Err(e) => counter!("cinema_settlement.events", 1, "outcome" => e.code()),
        }
        outcome
    }

    async fn settle_checkout(&self, event: &GatewayEvent) -> Result<SettlementOutcome, ServiceError> {
        let session = payment_object(event)?;
        let corr = correlation(&session)?;
        let amount_minor = session
            .amount_total
            .ok_or_else(|| ServiceError::MalformedEvent("amount_total is missing".to_string()))?;
        let captured = from_minor_units(amount_minor);
        let key = event.idempotency_key(&session.id);

        let txn = self.db_pool.begin().await?;

        if already_processed(&txn, &key).await? {
            info!(idempotency_key = %key, "duplicate delivery ignored");
            return Ok(SettlementOutcome::Duplicate);
        }

        let order = correlated_order(&txn, &corr).await?;
        let order_id = order.id;

        let outcome = match order.status {
            OrderStatus::Paid => SettlementOutcome::AlreadyPaid { order_id },
            OrderStatus::Canceled => {
                error!(
                    %order_id,
                    session_id = %session.id,
                    %captured,
                    "checkout completed for a canceled order, no ownership granted"
                );
                SettlementOutcome::CanceledOrder { order_id }
            }
            OrderStatus::Pending => {
                let settled = self
                    .apply_settlement(&txn, &order, &session, corr.payment_id, captured)
                    .await?;
                match settled {
                    Some((payment_id, movie_ids)) => {
                        let outcome = SettlementOutcome::Settled {
                            order_id,
                            payment_id,
                        };
                        if !record_processed(&txn, &key, &event.event_type, Some(order_id), &outcome)
                            .await?
                        {
                            return Ok(SettlementOutcome::Duplicate);
                        }
                        txn.commit().await?;

                        info!(%order_id, %payment_id, %captured, movies = movie_ids.len(), "order settled");
                        if let Some(sender) = &self.event_sender {
                            sender
                                .send_or_log(Event::OrderPaid {
                                    order_id,
                                    user_id: order.user_id,
                                    payment_id,
                                    amount: captured,
                                    movie_ids,
                                })
                                .await;
                        }
                        return Ok(outcome);
                    }
                    None => SettlementOutcome::AlreadyPaid { order_id },
                }
            }
        };

        if !record_processed(&txn, &key, &event.event_type, Some(order_id), &outcome).await? {
            return Ok(SettlementOutcome::Duplicate);
        }
        txn.commit().await?;
        Ok(outcome)
    }

    /// Steps 3-6 of settlement. Returns `None` when a concurrent settlement
    /// won the status update.
    async fn apply_settlement(
        &self,
        txn: &DatabaseTransaction,
        order: &order::Model,
        session: &PaymentObject,
        metadata_payment_id: Option<Uuid>,
        captured: Decimal,
    ) -> Result<Option<(Uuid, Vec<Uuid>)>, ServiceError> {
        let now = Utc::now();

        if order.total_amount != Some(captured) {
            warn!(
                order_id = %order.id,
                stored = ?order.total_amount,
                %captured,
                "captured amount differs from order total, recording the captured amount"
            );
        }

        // The order row is claimed first so concurrent settlements serialise on it.
        if OrderStateMachine::settle_paid(txn, order).await? == Transition::Unchanged {
            return Ok(None);
        }

        let payment = match correlated_payment(txn, order.id, &session.id, metadata_payment_id).await? {
            Some(existing) => {
                let mut active = existing.into_active_model();
                active.status = Set(PaymentStatus::Successful);
                active.amount = Set(captured);
                active.external_payment_id = Set(Some(session.id.clone()));
                active.updated_at = Set(Some(now));
                active.update(txn).await?
            }
            None => {
                payment::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(order.user_id),
                    order_id: Set(order.id),
                    status: Set(PaymentStatus::Successful),
                    amount: Set(captured),
                    external_payment_id: Set(Some(session.id.clone())),
                    created_at: Set(now),
                    updated_at: Set(Some(now)),
                }
                .insert(txn)
                .await
                .map_err(|e| {
                    ServiceError::from_write(e, || {
                        ServiceError::Conflict(format!("session {} already recorded", session.id))
                    })
                })?
            }
        };

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(txn)
            .await?;

        let recorded: HashSet<Uuid> = PaymentItemEntity::find()
            .select_only()
            .column(payment_item::Column::OrderItemId)
            .filter(payment_item::Column::PaymentId.eq(payment.id))
            .into_tuple::<Uuid>()
            .all(txn)
            .await?
            .into_iter()
            .collect();

        for item in items.iter().filter(|item| !recorded.contains(&item.id)) {
            payment_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                payment_id: Set(payment.id),
                order_item_id: Set(item.id),
                price_at_payment: Set(item.price_at_order),
            }
            .insert(txn)
            .await?;
        }

        let movie_ids: Vec<Uuid> = items.iter().map(|item| item.movie_id).collect();
        let owned: HashSet<Uuid> = PurchasedMovieEntity::find()
            .select_only()
            .column(purchased_movie::Column::MovieId)
            .filter(purchased_movie::Column::UserId.eq(order.user_id))
            .filter(purchased_movie::Column::MovieId.is_in(movie_ids.iter().copied()))
            .into_tuple::<Uuid>()
            .all(txn)
            .await?
            .into_iter()
            .collect();

        for movie_id in movie_ids.iter().filter(|id| !owned.contains(id)) {
            purchased_movie::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(order.user_id),
                movie_id: Set(*movie_id),
                payment_id: Set(payment.id),
                purchased_at: Set(now),
            }
            .insert(txn)
            .await
            .map_err(|e| {
                ServiceError::from_write(e, || {
                    ServiceError::Conflict(format!("movie {} already owned", movie_id))
                })
            })?;
        }

        Ok(Some((payment.id, movie_ids)))
    }

    async fn fail_checkout(&self, event: &GatewayEvent) -> Result<SettlementOutcome, ServiceError> {
        let object = payment_object(event)?;
        // failure notices from outside our checkout flow carry no correlation data
        let corr = match correlation(&object) {
            Ok(corr) => corr,
            Err(e) => {
                warn!(error = %e, object_id = %object.id, "failure event without correlation metadata acknowledged");
                return Ok(SettlementOutcome::Ignored);
            }
        };
        let key = event.idempotency_key(&object.id);

        let txn = self.db_pool.begin().await?;
        if already_processed(&txn, &key).await? {
            info!(idempotency_key = %key, "duplicate delivery ignored");
            return Ok(SettlementOutcome::Duplicate);
        }

        let order = correlated_order(&txn, &corr).await?;
        let order_id = order.id;
        let user_id = order.user_id;

        let outcome = match correlated_payment(&txn, order_id, &object.id, corr.payment_id).await? {
            Some(payment) => {
                let canceled = cancel_checkout(&txn, payment, order).await?;
                if canceled.order_canceled {
                    SettlementOutcome::CheckoutCanceled { order_id }
                } else if canceled.superseded {
                    SettlementOutcome::AttemptCanceled { order_id }
                } else {
                    SettlementOutcome::NothingToCancel { order_id }
                }
            }
            None if order.status == OrderStatus::Pending => {
                if open_attempt_exists(&txn, order_id, None).await? {
                    // unmatched failure while a session is open
                    SettlementOutcome::NothingToCancel { order_id }
                } else {
                    OrderStateMachine::cancel(&txn, order).await?;
                    SettlementOutcome::CheckoutCanceled { order_id }
                }
            }
            None => SettlementOutcome::NothingToCancel { order_id },
        };
        let order_canceled = matches!(outcome, SettlementOutcome::CheckoutCanceled { .. });

        if !record_processed(&txn, &key, &event.event_type, Some(order_id), &outcome).await? {
            return Ok(SettlementOutcome::Duplicate);
        }
        txn.commit().await?;

        info!(%order_id, outcome = outcome.as_str(), "checkout failure applied");
        if order_canceled {
            if let Some(sender) = &self.event_sender {
                sender
                    .send_or_log(Event::OrderCanceled { order_id, user_id })
                    .await;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case("checkout.session.completed", EventKind::CheckoutCompleted)]
    #[case("checkout.session.expired", EventKind::CheckoutFailed)]
    #[case("checkout.session.async_payment_failed", EventKind::CheckoutFailed)]
    #[case("payment_intent.payment_failed", EventKind::CheckoutFailed)]
    #[case("payment_intent.failed", EventKind::CheckoutFailed)]
    #[case("payment_intent.succeeded", EventKind::PaymentSucceeded)]
    fn classifies_event_types(#[case] raw: &str, #[case] kind: EventKind) {
        assert_eq!(EventKind::from_str(raw).unwrap(), kind);
    }

    #[test]
    fn unknown_event_types_do_not_classify() {
        assert!(EventKind::from_str("customer.created").is_err());
    }

    #[test]
    fn correlation_requires_order_and_user() {
        let mut object = PaymentObject {
            id: "cs_1".to_string(),
            ..Default::default()
        };
        assert_matches!(correlation(&object), Err(ServiceError::MalformedEvent(_)));

        object
            .metadata
            .insert("order_id".to_string(), Uuid::new_v4().to_string());
        object
            .metadata
            .insert("user_id".to_string(), "not-a-uuid".to_string());
        assert_matches!(correlation(&object), Err(ServiceError::MalformedEvent(_)));

        object
            .metadata
            .insert("user_id".to_string(), Uuid::new_v4().to_string());
        let corr = correlation(&object).unwrap();
        assert!(corr.payment_id.is_none());
    }
}
