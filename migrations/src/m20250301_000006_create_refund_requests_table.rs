use sea_orm_migration::prelude::*;

use super::m20250301_000003_create_orders_tables::Orders;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RefundRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RefundRequests::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RefundRequests::UserId).uuid().not_null())
                    .col(ColumnDef::new(RefundRequests::OrderId).uuid().not_null())
                    .col(ColumnDef::new(RefundRequests::Reason).text().not_null())
                    .col(
                        ColumnDef::new(RefundRequests::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(RefundRequests::Processed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(RefundRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_refund_requests_order_id")
                            .from(RefundRequests::Table, RefundRequests::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One request per order, ever.
        manager
            .create_index(
                Index::create()
                    .name("uix_refund_request_order")
                    .table(RefundRequests::Table)
                    .col(RefundRequests::OrderId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RefundRequests::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RefundRequests {
    Table,
    Id,
    UserId,
    OrderId,
    Reason,
    Status,
    Processed,
    CreatedAt,
}
