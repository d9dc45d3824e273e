use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        cart::CartService, orders::OrderService, payments::PaymentService,
        purchases::PurchaseService, refunds::RefundService, settlement::SettlementProcessor,
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<AppConfig>,
}

impl ServiceFactory {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db_pool,
            event_sender: Arc::new(event_sender),
            gateway,
            config,
        }
    }

    fn sender(&self) -> Option<Arc<EventSender>> {
        Some(self.event_sender.clone())
    }

    pub fn cart_service(&self) -> CartService {
        CartService::new(self.db_pool.clone(), self.sender())
    }

    pub fn payment_service(&self) -> PaymentService {
        PaymentService::new(
            self.db_pool.clone(),
            self.sender(),
            self.gateway.clone(),
            self.config.clone(),
        )
    }

    pub fn order_service(&self, payments: Arc<PaymentService>) -> OrderService {
        OrderService::new(self.db_pool.clone(), self.sender(), payments)
    }

    pub fn settlement_processor(&self) -> SettlementProcessor {
        SettlementProcessor::new(self.db_pool.clone(), self.sender())
    }

    pub fn refund_service(&self) -> RefundService {
        RefundService::new(self.db_pool.clone(), self.sender())
    }

    pub fn purchase_service(&self) -> PurchaseService {
        PurchaseService::new(self.db_pool.clone())
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub cart: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub settlement: Arc<SettlementProcessor>,
    pub refunds: Arc<RefundService>,
    pub purchases: Arc<PurchaseService>,
}

impl ServiceContainer {
    pub fn new(factory: &ServiceFactory) -> Self {
        let payments = Arc::new(factory.payment_service());

        Self {
            cart: Arc::new(factory.cart_service()),
            orders: Arc::new(factory.order_service(payments.clone())),
            payments,
            settlement: Arc::new(factory.settlement_processor()),
            refunds: Arc::new(factory.refund_service()),
            purchases: Arc::new(factory.purchase_service()),
        }
    }
}
