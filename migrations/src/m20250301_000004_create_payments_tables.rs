use sea_orm_migration::prelude::*;

use super::m20250301_000003_create_orders_tables::{OrderItems, Orders};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Payments::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Payments::UserId).uuid().not_null())
                    .col(ColumnDef::new(Payments::OrderId).uuid().not_null())
                    .col(
                        ColumnDef::new(Payments::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Payments::Amount).decimal_len(16, 4).not_null())
                    .col(
                        ColumnDef::new(Payments::ExternalPaymentId)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Payments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Payments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payments_order_id")
                            .from(Payments::Table, Payments::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uix_payment_order_external")
                    .table(Payments::Table)
                    .col(Payments::OrderId)
                    .col(Payments::ExternalPaymentId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payments_user_created")
                    .table(Payments::Table)
                    .col(Payments::UserId)
                    .col((Payments::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PaymentItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaymentItems::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PaymentItems::PaymentId).uuid().not_null())
                    .col(ColumnDef::new(PaymentItems::OrderItemId).uuid().not_null())
                    .col(
                        ColumnDef::new(PaymentItems::PriceAtPayment)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payment_items_payment_id")
                            .from(PaymentItems::Table, PaymentItems::PaymentId)
                            .to(Payments::Table, Payments::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payment_items_order_item_id")
                            .from(PaymentItems::Table, PaymentItems::OrderItemId)
                            .to(OrderItems::Table, OrderItems::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uix_payment_item_order_item")
                    .table(PaymentItems::Table)
                    .col(PaymentItems::PaymentId)
                    .col(PaymentItems::OrderItemId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PaymentItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Payments {
    Table,
    Id,
    UserId,
    OrderId,
    Status,
    Amount,
    ExternalPaymentId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PaymentItems {
    Table,
    Id,
    PaymentId,
    OrderItemId,
    PriceAtPayment,
}
