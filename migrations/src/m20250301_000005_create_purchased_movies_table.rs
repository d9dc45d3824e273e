use sea_orm_migration::prelude::*;

use super::m20250301_000001_create_movies_table::Movies;
use super::m20250301_000004_create_payments_tables::Payments;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PurchasedMovies::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PurchasedMovies::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PurchasedMovies::UserId).uuid().not_null())
                    .col(ColumnDef::new(PurchasedMovies::MovieId).uuid().not_null())
                    .col(ColumnDef::new(PurchasedMovies::PaymentId).uuid().not_null())
                    .col(
                        ColumnDef::new(PurchasedMovies::PurchasedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_purchased_movies_movie_id")
                            .from(PurchasedMovies::Table, PurchasedMovies::MovieId)
                            .to(Movies::Table, Movies::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_purchased_movies_payment_id")
                            .from(PurchasedMovies::Table, PurchasedMovies::PaymentId)
                            .to(Payments::Table, Payments::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uix_user_movie_purchase")
                    .table(PurchasedMovies::Table)
                    .col(PurchasedMovies::UserId)
                    .col(PurchasedMovies::MovieId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PurchasedMovies::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PurchasedMovies {
    Table,
    Id,
    UserId,
    MovieId,
    PaymentId,
    PurchasedAt,
}
