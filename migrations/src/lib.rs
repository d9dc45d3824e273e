pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_movies_table;
mod m20250301_000002_create_cart_items_table;
mod m20250301_000003_create_orders_tables;
mod m20250301_000004_create_payments_tables;
mod m20250301_000005_create_purchased_movies_table;
mod m20250301_000006_create_refund_requests_table;
mod m20250301_000007_create_processed_webhook_events_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_movies_table::Migration),
            Box::new(m20250301_000002_create_cart_items_table::Migration),
            Box::new(m20250301_000003_create_orders_tables::Migration),
            Box::new(m20250301_000004_create_payments_tables::Migration),
            Box::new(m20250301_000005_create_purchased_movies_table::Migration),
            Box::new(m20250301_000006_create_refund_requests_table::Migration),
            Box::new(m20250301_000007_create_processed_webhook_events_table::Migration),
        ]
    }
}
