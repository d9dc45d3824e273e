use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        cart_item::{self, Entity as CartItemEntity},
        movie,
        order::{self, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
        purchased_movie::{self, Entity as PurchasedMovieEntity},
        OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::CatalogService,
        order_state::{self, OrderStateMachine, TotalRevalidation},
        payments::{CheckoutSession, PaymentService},
    },
};

/// An order with its line items
#[derive(Debug, Clone)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Optional body of an order confirmation.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ConfirmOrderInput {
    /// Gateway session id of an earlier attempt to resume instead of
    /// opening a new ledger row.
    #[serde(default)]
    pub external_payment_id: Option<String>,
}

/// What `confirm_for_payment` decided.
#[derive(Debug, Clone)]
pub enum Confirmation {
    /// The stored total drifted; the caller must accept the new total first.
    PriceChanged {
        revalidation: TotalRevalidation,
        order: OrderWithItems,
    },
    /// A checkout session is ready.
    Redirect(CheckoutSession),
}

/// Order assembly and the user-facing order lifecycle
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    payments: Arc<PaymentService>,
    assembly_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        payments: Arc<PaymentService>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            payments,
            assembly_locks: Arc::new(DashMap::new()),
        }
    }

    fn assembly_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.assembly_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Turns the user's cart into a priced pending order and empties the cart,
    /// all in one transaction.
    #[instrument(skip(self))]
    pub async fn create_from_cart(&self, user_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        // Serialises assembly per user inside this process; the exclusion checks
        // and unique indexes cover other processes.
        let lock = self.assembly_lock(user_id);
        let _guard = lock.lock().await;

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order assembly");
            ServiceError::DatabaseError(e)
        })?;

        let cart = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::AddedAt)
            .all(&txn)
            .await?;
        if cart.is_empty() {
            return Err(ServiceError::CartEmpty);
        }

        let movie_ids: Vec<Uuid> = cart.iter().map(|entry| entry.movie_id).collect();
        let movies = CatalogService::get_movies(&txn, &movie_ids).await?;
        let available: Vec<Uuid> = movie_ids
            .iter()
            .copied()
            .filter(|id| movies.contains_key(id))
            .collect();
        if available.is_empty() {
            return Err(ServiceError::NoAvailableItems);
        }

        let owned: HashSet<Uuid> = PurchasedMovieEntity::find()
            .select_only()
            .column(purchased_movie::Column::MovieId)
            .filter(purchased_movie::Column::UserId.eq(user_id))
            .filter(purchased_movie::Column::MovieId.is_in(available.iter().copied()))
            .into_tuple::<Uuid>()
            .all(&txn)
            .await?
            .into_iter()
            .collect();
        let not_owned: Vec<Uuid> = available
            .into_iter()
            .filter(|id| !owned.contains(id))
            .collect();
        if not_owned.is_empty() {
            return Err(ServiceError::AllAlreadyPurchased);
        }

        let pending: HashSet<Uuid> = OrderItemEntity::find()
            .select_only()
            .column(order_item::Column::MovieId)
            .inner_join(OrderEntity)
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order_item::Column::MovieId.is_in(not_owned.iter().copied()))
            .into_tuple::<Uuid>()
            .all(&txn)
            .await?
            .into_iter()
            .collect();
        let to_order: Vec<&movie::Model> = not_owned
            .iter()
            .filter(|id| !pending.contains(id))
            .filter_map(|id| movies.get(id))
            .collect();
        if to_order.is_empty() {
            return Err(ServiceError::AllAlreadyPending);
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let total: Decimal = to_order.iter().map(|movie| movie.price).sum();

        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            status: Set(OrderStatus::Pending),
            total_amount: Set(Some(total)),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(to_order.len());
        for movie in &to_order {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                movie_id: Set(movie.id),
                price_at_order: Set(movie.price),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        // The whole cart goes, including entries that were excluded above.
        CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit order assembly");
            ServiceError::DatabaseError(e)
        })?;

        counter!("cinema_orders.created", 1);
        info!(
            %order_id,
            %user_id,
            %total,
            items = items.len(),
            skipped = cart.len() - items.len(),
            "order assembled from cart"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderCreated {
                    order_id,
                    user_id,
                    total_amount: total,
                })
                .await;
        }

        Ok(OrderWithItems { order, items })
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db_pool, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Loads an order owned by `user_id`. Other users' orders are reported as missing.
    #[instrument(skip(self))]
    pub async fn get_for_user(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let db = &*self.db_pool;
        let order = find_owned_order(db, user_id, order_id).await?;
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await?;
        Ok(OrderWithItems { order, items })
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, user_id: Uuid, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let order = find_owned_order(&txn, user_id, order_id).await?;
        let canceled = OrderStateMachine::cancel(&txn, order).await?;
        txn.commit().await?;

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderCanceled { order_id, user_id })
                .await;
        }
        Ok(canceled)
    }

    /// Revalidates the total and, when it still holds, opens a checkout
    /// session. A drifted total is persisted and returned instead.
    #[instrument(skip(self))]
    pub async fn confirm_for_payment(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        external_payment_id: Option<String>,
    ) -> Result<Confirmation, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let order = find_owned_order(&txn, user_id, order_id).await?;
        order_state::ensure_payable(&order)?;
        let revalidation = OrderStateMachine::revalidate_total(&txn, &order).await?;
        txn.commit().await?;

        if revalidation.changed {
            info!(%order_id, new_total = %revalidation.new_total, "confirmation halted on changed total");
            let order = self.get_for_user(user_id, order_id).await?;
            return Ok(Confirmation::PriceChanged {
                revalidation,
                order,
            });
        }

        let session = self
            .payments
            .create_session(user_id, order_id, external_payment_id)
            .await?;
        Ok(Confirmation::Redirect(session))
    }
}

pub(crate) async fn find_owned_order<C: sea_orm::ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    OrderEntity::find_by_id(order_id)
        .one(conn)
        .await?
        .filter(|order| order.user_id == user_id)
        .ok_or(ServiceError::OrderNotFound(order_id))
}
