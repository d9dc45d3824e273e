use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity},
        payment::{self, Entity as PaymentEntity},
        OrderStatus, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{CheckoutSessionRequest, GatewayError, PaymentGateway},
    services::{
        order_state::{self, OrderStateMachine},
        orders::find_owned_order,
    },
};

/// Converts a monetary amount to gateway minor units, half away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} out of range", amount)))
}

/// Converts gateway minor units back to a monetary amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// A checkout page ready for the user
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutSession {
    pub payment_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
}

/// Payment as seen from the redirect landing pages
#[derive(Debug, Clone)]
pub struct PaymentLanding {
    pub payment: payment::Model,
    pub order_status: OrderStatus,
}

/// Opens hosted checkout sessions and keeps the local payment ledger
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<AppConfig>,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            gateway,
            config,
        }
    }

    /// Reserves the payment row to charge against: the one matching
    /// `external_payment_id` when given, else a pending attempt that never
    /// reached the gateway, else a fresh row.
    async fn reserve_payment(
        &self,
        order: &order::Model,
        external_payment_id: Option<&str>,
    ) -> Result<payment::Model, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let now = Utc::now();
        let amount = order.total_amount.unwrap_or(Decimal::ZERO);

        let existing = match external_payment_id {
            Some(external_id) => {
                PaymentEntity::find()
                    .filter(payment::Column::OrderId.eq(order.id))
                    .filter(payment::Column::ExternalPaymentId.eq(external_id))
                    .one(&txn)
                    .await?
            }
            None => None,
        };
        let existing = match existing {
            Some(found) => Some(found),
            None => {
                PaymentEntity::find()
                    .filter(payment::Column::OrderId.eq(order.id))
                    .filter(payment::Column::Status.eq(PaymentStatus::Pending))
                    .filter(payment::Column::ExternalPaymentId.is_null())
                    .order_by_desc(payment::Column::CreatedAt)
                    .one(&txn)
                    .await?
            }
        };

        let payment = match existing {
            Some(found) => {
                if found.status == PaymentStatus::Successful {
                    return Err(ServiceError::OrderNotPending(order.id));
                }
                let mut active = found.into_active_model();
                active.status = Set(PaymentStatus::Pending);
                active.amount = Set(amount);
                active.updated_at = Set(Some(now));
                active.update(&txn).await?
            }
            None => {
                payment::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(order.user_id),
                    order_id: Set(order.id),
                    status: Set(PaymentStatus::Pending),
                    amount: Set(amount),
                    external_payment_id: Set(None),
                    created_at: Set(now),
                    updated_at: Set(Some(now)),
                }
                .insert(&txn)
                .await?
            }
        };

        txn.commit().await?;
        Ok(payment)
    }

    /// Opens a hosted checkout session for a pending order.
    ///
    /// The payment row is committed before the gateway call, so a failed call
    /// leaves a pending row that the next attempt reuses.
    #[instrument(skip(self))]
    pub async fn create_session(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        external_payment_id: Option<String>,
    ) -> Result<CheckoutSession, ServiceError> {
        let order = find_owned_order(&*self.db_pool, user_id, order_id).await?;
        order_state::ensure_payable(&order)?;
        let amount = order.total_amount.unwrap_or(Decimal::ZERO);
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "order total must be positive".to_string(),
            ));
        }

        let payment = self
            .reserve_payment(&order, external_payment_id.as_deref())
            .await?;

        let mut metadata = BTreeMap::new();
        metadata.insert("order_id".to_string(), order.id.to_string());
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("payment_id".to_string(), payment.id.to_string());

        let request = CheckoutSessionRequest {
            amount_minor: to_minor_units(amount)?,
            currency: self.config.currency.clone(),
            description: format!("Order #{}", order.id),
            success_url: self.config.payment_return_url(payment.id, "success"),
            cancel_url: self.config.payment_return_url(payment.id, "cancel"),
            metadata,
            idempotency_key: payment.id.to_string(),
        };

        let session = self
            .gateway
            .create_checkout_session(&request)
            .await
            .map_err(|e| {
                error!(error = %e, payment_id = %payment.id, "gateway refused checkout session");
                match e {
                    GatewayError::NotConfigured => {
                        ServiceError::InternalError("payment gateway is not configured".to_string())
                    }
                    other => ServiceError::GatewayUnavailable(other.to_string()),
                }
            })?;

        let payment_id = payment.id;
        let mut active = payment.into_active_model();
        active.external_payment_id = Set(Some(session.id.clone()));
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db_pool).await.map_err(|e| {
            ServiceError::from_write(e, || {
                ServiceError::Conflict(format!("session {} already recorded", session.id))
            })
        })?;

        counter!("cinema_payments.sessions_created", 1);
        info!(%payment_id, %order_id, session_id = %session.id, "checkout session created");

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::PaymentSessionCreated {
                    payment_id,
                    order_id,
                    session_id: session.id.clone(),
                })
                .await;
        }

        Ok(CheckoutSession {
            payment_id,
            session_id: session.id,
            checkout_url: session.url,
        })
    }

    /// Payment history, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<payment::Model>, u64), ServiceError> {
        let paginator = PaymentEntity::find()
            .filter(payment::Column::UserId.eq(user_id))
            .order_by_desc(payment::Column::CreatedAt)
            .paginate(&*self.db_pool, per_page);

        let total = paginator.num_items().await?;
        let payments = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((payments, total))
    }

    #[instrument(skip(self))]
    pub async fn get_for_user(
        &self,
        user_id: Uuid,
        payment_id: Uuid,
    ) -> Result<payment::Model, ServiceError> {
        PaymentEntity::find_by_id(payment_id)
            .one(&*self.db_pool)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or(ServiceError::PaymentNotFound(payment_id))
    }

    /// Landing after a completed checkout. Read-only; the webhook settles.
    #[instrument(skip(self))]
    pub async fn landing_success(
        &self,
        user_id: Uuid,
        payment_id: Uuid,
    ) -> Result<PaymentLanding, ServiceError> {
        let payment = self.get_for_user(user_id, payment_id).await?;
        let order = OrderEntity::find_by_id(payment.order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or(ServiceError::OrderNotFound(payment.order_id))?;
        Ok(PaymentLanding {
            payment,
            order_status: order.status,
        })
    }

    /// Landing after an abandoned checkout: cancels the pending attempt and
    /// its order, like a gateway cancellation event would.
    #[instrument(skip(self))]
    pub async fn landing_cancel(
        &self,
        user_id: Uuid,
        payment_id: Uuid,
    ) -> Result<PaymentLanding, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let payment = PaymentEntity::find_by_id(payment_id)
            .one(&txn)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or(ServiceError::PaymentNotFound(payment_id))?;
        let order = OrderEntity::find_by_id(payment.order_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::OrderNotFound(payment.order_id))?;

        let canceled = cancel_checkout(&txn, payment, order).await?;
        txn.commit().await?;

        if canceled.order_canceled {
            if let Some(sender) = &self.event_sender {
                sender
                    .send_or_log(Event::PaymentCanceled {
                        payment_id,
                        order_id: canceled.order.id,
                    })
                    .await;
            }
        }

        Ok(PaymentLanding {
            payment: canceled.payment,
            order_status: canceled.order.status,
        })
    }
}

pub(crate) struct CheckoutCancellation {
    pub payment: payment::Model,
    pub order: order::Model,
    pub order_canceled: bool,
    /// Another gateway session for the order is still open, so only this
    /// attempt was canceled.
    pub superseded: bool,
}

/// True when the order has a pending attempt, other than `except`, that
/// already reached the gateway.
pub(crate) async fn open_attempt_exists<C: sea_orm::ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    except: Option<Uuid>,
) -> Result<bool, ServiceError> {
    let mut query = PaymentEntity::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .filter(payment::Column::Status.eq(PaymentStatus::Pending))
        .filter(payment::Column::ExternalPaymentId.is_not_null());
    if let Some(id) = except {
        query = query.filter(payment::Column::Id.ne(id));
    }
    Ok(query.count(conn).await? > 0)
}

/// Marks a pending payment canceled and cancels its order when still pending
/// and no other session for it is open. Paid orders are left alone; this is
/// cleanup, not a reversal.
pub(crate) async fn cancel_checkout<C: sea_orm::ConnectionTrait>(
    conn: &C,
    payment: payment::Model,
    order: order::Model,
) -> Result<CheckoutCancellation, ServiceError> {
    let payment = if payment.status == PaymentStatus::Pending {
        let mut active = payment.into_active_model();
        active.status = Set(PaymentStatus::Canceled);
        active.updated_at = Set(Some(Utc::now()));
        active.update(conn).await?
    } else {
        payment
    };

    match order.status {
        OrderStatus::Pending => {
            if open_attempt_exists(conn, order.id, Some(payment.id)).await? {
                info!(order_id = %order.id, payment_id = %payment.id, "stale checkout attempt canceled, order stays pending");
                return Ok(CheckoutCancellation {
                    payment,
                    order,
                    order_canceled: false,
                    superseded: true,
                });
            }
            let order = OrderStateMachine::cancel(conn, order).await?;
            Ok(CheckoutCancellation {
                payment,
                order,
                order_canceled: true,
                superseded: false,
            })
        }
        _ => {
            warn!(order_id = %order.id, status = ?order.status, "checkout cancellation for non-pending order ignored");
            Ok(CheckoutCancellation {
                payment,
                order,
                order_canceled: false,
                superseded: false,
            })
        }
    }
}
