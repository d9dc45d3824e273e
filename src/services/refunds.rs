use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        refund_request::{self, Entity as RefundRequestEntity},
        OrderStatus, RefundStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::find_owned_order,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RefundRequestInput {
    #[validate(length(
        min = 10,
        max = 500,
        message = "Reason must be between 10 and 500 characters"
    ))]
    pub reason: String,
}

/// Records refund requests against paid orders. Review and fund reversal
/// happen elsewhere.
#[derive(Clone)]
pub struct RefundService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl RefundService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, input))]
    pub async fn request_refund(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        input: RefundRequestInput,
    ) -> Result<refund_request::Model, ServiceError> {
        input.validate()?;

        let txn = self.db_pool.begin().await?;
        let order = find_owned_order(&txn, user_id, order_id).await?;
        if order.status != OrderStatus::Paid {
            return Err(ServiceError::OrderNotPaid);
        }

        let existing = RefundRequestEntity::find()
            .filter(refund_request::Column::OrderId.eq(order_id))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::RefundAlreadyRequested);
        }

        let refund = refund_request::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            order_id: Set(order_id),
            reason: Set(input.reason.trim().to_string()),
            status: Set(RefundStatus::Pending),
            processed: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::from_write(e, || ServiceError::RefundAlreadyRequested))?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit refund request");
            ServiceError::from_write(e, || ServiceError::RefundAlreadyRequested)
        })?;

        info!(refund_id = %refund.id, %order_id, "refund requested");

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::RefundRequested {
                    refund_id: refund.id,
                    order_id,
                    user_id,
                })
                .await;
        }

        Ok(refund)
    }

    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<refund_request::Model>, ServiceError> {
        Ok(RefundRequestEntity::find()
            .filter(refund_request::Column::UserId.eq(user_id))
            .order_by_desc(refund_request::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_length_is_bounded() {
        let short = RefundRequestInput {
            reason: "too short".to_string(),
        };
        assert!(short.validate().is_err());

        let ok = RefundRequestInput {
            reason: "Bought the wrong edition".to_string(),
        };
        assert!(ok.validate().is_ok());

        let long = RefundRequestInput {
            reason: "x".repeat(501),
        };
        assert!(long.validate().is_err());
    }
}
