use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        cart_item::{self, Entity as CartItemEntity},
        movie::Entity as MovieEntity,
        purchased_movie::{self, Entity as PurchasedMovieEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::CatalogService,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub movie_id: Uuid,
    pub name: String,
    /// Current catalog price. The order snapshots its own price at assembly.
    pub price: Decimal,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartLine>,
    pub subtotal: Decimal,
}

/// Per-user set of movies awaiting purchase
#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl CartService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Adds a movie to the user's cart.
    #[instrument(skip(self))]
    pub async fn add(&self, user_id: Uuid, movie_id: Uuid) -> Result<cart_item::Model, ServiceError> {
        let db = &*self.db_pool;

        if CatalogService::get_movie(db, movie_id).await?.is_none() {
            return Err(ServiceError::MovieNotFound(movie_id));
        }

        let owned = PurchasedMovieEntity::find()
            .filter(purchased_movie::Column::UserId.eq(user_id))
            .filter(purchased_movie::Column::MovieId.eq(movie_id))
            .one(db)
            .await?;
        if owned.is_some() {
            return Err(ServiceError::AlreadyPurchased(movie_id));
        }

        let existing = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::MovieId.eq(movie_id))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::AlreadyInCart(movie_id));
        }

        let entry = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            movie_id: Set(movie_id),
            added_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .map_err(|e| ServiceError::from_write(e, || ServiceError::AlreadyInCart(movie_id)))?;

        info!(%user_id, %movie_id, "movie added to cart");

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::CartItemAdded { user_id, movie_id })
                .await;
        }

        Ok(entry)
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, movie_id: Uuid) -> Result<(), ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::MovieId.eq(movie_id))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotInCart(movie_id));
        }
        Ok(())
    }

    /// Empties the cart, returning how many entries were removed.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&*self.db_pool)
            .await?;
        Ok(result.rows_affected)
    }

    #[instrument(skip(self))]
    pub async fn list(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let rows = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::AddedAt)
            .find_also_related(MovieEntity)
            .all(&*self.db_pool)
            .await?;

        // entries whose movie was deleted are skipped, assembly drops them too
        let items: Vec<CartLine> = rows
            .into_iter()
            .filter_map(|(entry, movie)| {
                movie.map(|m| CartLine {
                    movie_id: entry.movie_id,
                    name: m.name,
                    price: m.price,
                    added_at: entry.added_at,
                })
            })
            .collect();

        let subtotal = items.iter().map(|line| line.price).sum();
        Ok(CartView { items, subtotal })
    }
}
