use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProcessedWebhookEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProcessedWebhookEvents::EventId)
                            .string_len(255)
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProcessedWebhookEvents::EventType)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProcessedWebhookEvents::OrderId).uuid().null())
                    .col(
                        ColumnDef::new(ProcessedWebhookEvents::Outcome)
                            .string_len(30)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProcessedWebhookEvents::ProcessedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProcessedWebhookEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ProcessedWebhookEvents {
    Table,
    EventId,
    EventType,
    OrderId,
    Outcome,
    ProcessedAt,
}
