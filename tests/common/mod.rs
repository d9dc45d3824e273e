#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use cinema_checkout::{
    config::AppConfig,
    db,
    entities::{
        movie,
        order::{self, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
    },
    events::{self, EventSender},
    gateway::{
        signature, CheckoutSession as GatewaySession, CheckoutSessionRequest, GatewayError,
        PaymentGateway,
    },
    notifications::{NotificationError, Notifier, PaymentConfirmation},
    services::{orders::Confirmation, payments::CheckoutSession},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
const JWT_SECRET: &str =
    "integration-tests-only-secret-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGH";

/// Gateway double that hands out sequential sessions and records every request.
#[derive(Default)]
pub struct FakeGateway {
    requests: Mutex<Vec<CheckoutSessionRequest>>,
    counter: AtomicUsize,
    fail: AtomicBool,
}

impl FakeGateway {
    pub fn fail_requests(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CheckoutSessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<GatewaySession, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{n}");
        Ok(GatewaySession {
            url: format!("https://checkout.test/pay/{id}"),
            id,
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<PaymentConfirmation>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<PaymentConfirmation> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_payment_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(confirmation.clone());
        Ok(())
    }
}

/// Application wired against in-memory SQLite, a fake gateway and a recording notifier.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub movie_a: movie::Model,
    pub movie_b: movie::Model,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        cfg.public_base_url = "http://cinema.test".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let notifier = Arc::new(RecordingNotifier::default());
        let event_task = tokio::spawn(events::process_events(event_rx, notifier.clone()));

        let gateway = Arc::new(FakeGateway::default());
        let state = AppState::new(
            db_arc,
            Arc::new(cfg),
            gateway.clone(),
            EventSender::new(event_tx),
        );
        let router = cinema_checkout::app_router(state.clone());

        let movie_a = insert_movie(&state.db, "Movie A", Decimal::new(999, 2)).await;
        let movie_b = insert_movie(&state.db, "Movie B", Decimal::new(1499, 2)).await;

        Self {
            router,
            state,
            gateway,
            notifier,
            movie_a,
            movie_b,
            _event_task: event_task,
        }
    }

    pub async fn seed_movie(&self, name: &str, price: Decimal) -> movie::Model {
        insert_movie(&self.state.db, name, price).await
    }

    pub async fn set_movie_price(&self, movie_id: Uuid, price: Decimal) {
        let movie = movie::Entity::find_by_id(movie_id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("movie exists");
        let mut active = movie.into_active_model();
        active.price = Set(price);
        active.update(&*self.state.db).await.unwrap();
    }

    /// Rewrites one line's frozen price without touching the stored total.
    pub async fn set_item_price(&self, order_id: Uuid, movie_id: Uuid, price: Decimal) {
        let item = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::MovieId.eq(movie_id))
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("order item exists");
        let mut active = item.into_active_model();
        active.price_at_order = Set(price);
        active.update(&*self.state.db).await.unwrap();
    }

    /// Cart with both seeded movies, assembled into an order and confirmed.
    pub async fn checkout(&self, user_id: Uuid) -> (Uuid, CheckoutSession) {
        let services = &self.state.services;
        services.cart.add(user_id, self.movie_a.id).await.unwrap();
        services.cart.add(user_id, self.movie_b.id).await.unwrap();
        let order = services.orders.create_from_cart(user_id).await.unwrap();
        let order_id = order.order.id;
        match services
            .orders
            .confirm_for_payment(user_id, order_id, None)
            .await
            .unwrap()
        {
            Confirmation::Redirect(session) => (order_id, session),
            other => panic!("expected a checkout redirect, got {other:?}"),
        }
    }

    pub async fn order(&self, order_id: Uuid) -> order::Model {
        OrderEntity::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("order exists")
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.state.auth.issue_token(user_id).expect("issue token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user_id: Option<Uuid>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header("authorization", format!("Bearer {}", self.token_for(user_id)));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .expect("router error during test request")
    }

    /// Posts `payload` to the webhook signed with the test secret.
    pub async fn deliver_webhook(&self, payload: &Value) -> axum::response::Response {
        let raw = serde_json::to_vec(payload).unwrap();
        let header = signature::sign(&raw, WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
        self.raw_webhook(raw, Some(header)).await
    }

    pub async fn raw_webhook(&self, raw: Vec<u8>, header: Option<String>) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(header) = header {
            builder = builder.header(signature::SIGNATURE_HEADER, header);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::from(raw)).unwrap())
            .await
            .expect("router error during webhook")
    }

    /// Waits for the detached notifier task to record `count` confirmations.
    pub async fn wait_for_confirmations(&self, count: usize) -> Vec<PaymentConfirmation> {
        for _ in 0..50 {
            let sent = self.notifier.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.notifier.sent()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

async fn insert_movie(db: &db::DbPool, name: &str, price: Decimal) -> movie::Model {
    movie::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        price: Set(price),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed movie")
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// A `checkout.session.completed` event as the gateway would send it.
pub fn completed_event(
    event_id: &str,
    session_id: &str,
    order_id: Uuid,
    user_id: Uuid,
    payment_id: Option<Uuid>,
    amount_minor: i64,
) -> Value {
    let mut metadata = json!({
        "order_id": order_id.to_string(),
        "user_id": user_id.to_string(),
    });
    if let Some(payment_id) = payment_id {
        metadata["payment_id"] = json!(payment_id.to_string());
    }
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": session_id,
            "amount_total": amount_minor,
            "metadata": metadata,
        }}
    })
}

pub fn expired_event(event_id: &str, session_id: &str, order_id: Uuid, user_id: Uuid) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.expired",
        "data": {"object": {
            "id": session_id,
            "metadata": {
                "order_id": order_id.to_string(),
                "user_id": user_id.to_string(),
            },
        }}
    })
}
