use std::sync::Arc;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::purchased_movie::{self, Entity as PurchasedMovieEntity},
    errors::ServiceError,
};

/// Read access to ownership records written by settlement
#[derive(Clone)]
pub struct PurchaseService {
    db_pool: Arc<DbPool>,
}

impl PurchaseService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<purchased_movie::Model>, ServiceError> {
        Ok(PurchasedMovieEntity::find()
            .filter(purchased_movie::Column::UserId.eq(user_id))
            .order_by_desc(purchased_movie::Column::PurchasedAt)
            .all(&*self.db_pool)
            .await?)
    }
}
