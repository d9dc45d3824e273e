/*!
 * # Order state machine
 *
 * `Pending` is the only state with outgoing transitions; `Paid` and `Canceled`
 * are terminal. The pure transition functions decide, the async helpers apply
 * the decision through whatever connection or transaction the caller holds.
 */

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    Set,
};
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    entities::{
        order::{self, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
        payment::{self, Entity as PaymentEntity},
        OrderStatus, PaymentStatus,
    },
    errors::ServiceError,
};

/// Outcome of an idempotent transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply(OrderStatus),
    Unchanged,
}

/// Decides a user cancel. Paid orders go through the refund workflow.
pub fn cancel_transition(current: OrderStatus) -> Result<OrderStatus, ServiceError> {
    match current {
        OrderStatus::Pending => Ok(OrderStatus::Canceled),
        OrderStatus::Paid => Err(ServiceError::RefundRequired),
        OrderStatus::Canceled => Err(ServiceError::AlreadyCanceled),
    }
}

/// Decides settlement. Settling a paid order again is a no-op.
pub fn settle_transition(current: OrderStatus) -> Result<Transition, ServiceError> {
    match current {
        OrderStatus::Pending => Ok(Transition::Apply(OrderStatus::Paid)),
        OrderStatus::Paid => Ok(Transition::Unchanged),
        OrderStatus::Canceled => Err(ServiceError::AlreadyCanceled),
    }
}

/// Only pending orders may start a payment.
pub fn ensure_payable(order: &order::Model) -> Result<(), ServiceError> {
    match order.status {
        OrderStatus::Pending => Ok(()),
        OrderStatus::Canceled => Err(ServiceError::AlreadyCanceled),
        OrderStatus::Paid => Err(ServiceError::OrderNotPending(order.id)),
    }
}

/// Result of comparing the stored total with the sum of its own items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct TotalRevalidation {
    pub changed: bool,
    pub new_total: Decimal,
}

/// Sum of the frozen item prices.
pub fn items_total(items: &[order_item::Model]) -> Decimal {
    items.iter().map(|item| item.price_at_order).sum()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Cancels a pending order and every payment attempt still pending on it.
    pub async fn cancel<C: ConnectionTrait>(
        conn: &C,
        order: order::Model,
    ) -> Result<order::Model, ServiceError> {
        let next = cancel_transition(order.status)?;
        let order_id = order.id;

        // Guarded on the current status so a concurrent settlement wins cleanly.
        let updated = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(next))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(conn)
            .await?;

        if updated.rows_affected == 0 {
            let current = OrderEntity::find_by_id(order_id)
                .one(conn)
                .await?
                .ok_or(ServiceError::OrderNotFound(order_id))?;
            cancel_transition(current.status)?;
            return Err(ServiceError::OrderNotPending(order_id));
        }

        let payments = PaymentEntity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Canceled))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(conn)
            .await?;

        info!(
            %order_id,
            payments_canceled = payments.rows_affected,
            "order canceled"
        );

        OrderEntity::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))
    }

    /// Recomputes the total from the items' frozen prices and persists it when
    /// it drifted. Items are never re-priced.
    pub async fn revalidate_total<C: ConnectionTrait>(
        conn: &C,
        order: &order::Model,
    ) -> Result<TotalRevalidation, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(conn)
            .await?;
        let new_total = items_total(&items);

        if order.total_amount == Some(new_total) {
            return Ok(TotalRevalidation {
                changed: false,
                new_total,
            });
        }

        warn!(
            order_id = %order.id,
            stored = ?order.total_amount,
            %new_total,
            "order total out of sync with its items"
        );

        let mut active: order::ActiveModel = order.clone().into();
        active.total_amount = Set(Some(new_total));
        active.updated_at = Set(Some(Utc::now()));
        active.update(conn).await?;

        Ok(TotalRevalidation {
            changed: true,
            new_total,
        })
    }

    /// Marks the order paid. Returns `Transition::Unchanged` when it already was.
    pub async fn settle_paid<C: ConnectionTrait>(
        conn: &C,
        order: &order::Model,
    ) -> Result<Transition, ServiceError> {
        match settle_transition(order.status)? {
            Transition::Unchanged => Ok(Transition::Unchanged),
            Transition::Apply(next) => {
                let updated = OrderEntity::update_many()
                    .col_expr(order::Column::Status, Expr::value(next))
                    .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
                    .filter(order::Column::Id.eq(order.id))
                    .filter(order::Column::Status.eq(OrderStatus::Pending))
                    .exec(conn)
                    .await?;

                if updated.rows_affected == 1 {
                    return Ok(Transition::Apply(next));
                }

                // lost a race: re-read and decide again
                let current = OrderEntity::find_by_id(order.id)
                    .one(conn)
                    .await?
                    .ok_or(ServiceError::OrderNotFound(order.id))?;
                match settle_transition(current.status)? {
                    Transition::Unchanged => Ok(Transition::Unchanged),
                    Transition::Apply(_) => Err(ServiceError::Conflict(format!(
                        "order {} changed during settlement",
                        order.id
                    ))),
                }
            }
        }
    }
}
