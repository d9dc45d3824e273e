pub mod cart;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;
pub mod purchases;
pub mod refunds;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;
