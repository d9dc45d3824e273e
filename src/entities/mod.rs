pub mod cart_item;
pub mod movie;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod payment_item;
pub mod processed_webhook_event;
pub mod purchased_movie;
pub mod refund_request;

pub use order::OrderStatus;
pub use payment::PaymentStatus;
pub use refund_request::RefundStatus;
