// Order assembly and lifecycle
pub mod cart;
pub mod catalog;
pub mod order_state;
pub mod orders;

// Payment sessions and settlement
pub mod payments;
pub mod settlement;

// After-sale
pub mod purchases;
pub mod refunds;

// Service factory for dependency injection
pub mod factory;

pub use factory::{ServiceContainer, ServiceFactory};
