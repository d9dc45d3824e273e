//! Read-only price lookup over the catalog table. Takes the caller's
//! connection so it can run inside an assembly transaction.

use std::collections::HashMap;

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::{
    entities::movie::{self, Entity as MovieEntity},
    errors::ServiceError,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogService;

impl CatalogService {
    /// Resolves one movie, `None` when it no longer exists.
    pub async fn get_movie<C: ConnectionTrait>(
        conn: &C,
        movie_id: Uuid,
    ) -> Result<Option<movie::Model>, ServiceError> {
        Ok(MovieEntity::find_by_id(movie_id).one(conn).await?)
    }

    /// Resolves a batch of movies. Ids that do not resolve are absent from the map.
    pub async fn get_movies<C: ConnectionTrait>(
        conn: &C,
        movie_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, movie::Model>, ServiceError> {
        if movie_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let movies = MovieEntity::find()
            .filter(movie::Column::Id.is_in(movie_ids.iter().copied()))
            .all(conn)
            .await?;

        Ok(movies.into_iter().map(|m| (m.id, m)).collect())
    }
}
