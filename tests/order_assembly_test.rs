mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use cinema_checkout::{
    entities::{cart_item, OrderStatus},
    errors::ServiceError,
};
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

async fn put_in_cart_unchecked(app: &TestApp, user: Uuid, movie_id: Uuid) {
    cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user),
        movie_id: Set(movie_id),
        added_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .unwrap();
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;
    assert_matches!(
        app.state.services.orders.create_from_cart(Uuid::new_v4()).await,
        Err(ServiceError::CartEmpty)
    );
}

#[tokio::test]
async fn assembles_priced_order_and_clears_cart() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = Uuid::new_v4();

    services.cart.add(user, app.movie_a.id).await.unwrap();
    services.cart.add(user, app.movie_b.id).await.unwrap();

    let created = services.orders.create_from_cart(user).await.unwrap();
    assert_eq!(created.order.status, OrderStatus::Pending);
    assert_eq!(created.order.total_amount, Some(dec!(24.98)));
    assert_eq!(created.items.len(), 2);

    let mut prices: Vec<_> = created.items.iter().map(|i| i.price_at_order).collect();
    prices.sort();
    assert_eq!(prices, vec![dec!(9.99), dec!(14.99)]);

    assert!(services.cart.list(user).await.unwrap().items.is_empty());
}

#[tokio::test]
async fn item_prices_are_frozen_at_assembly() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = Uuid::new_v4();

    services.cart.add(user, app.movie_a.id).await.unwrap();
    let created = services.orders.create_from_cart(user).await.unwrap();

    app.set_movie_price(app.movie_a.id, dec!(19.99)).await;

    let reloaded = services
        .orders
        .get_for_user(user, created.order.id)
        .await
        .unwrap();
    assert_eq!(reloaded.items[0].price_at_order, dec!(9.99));
    assert_eq!(reloaded.order.total_amount, Some(dec!(9.99)));
}

#[tokio::test]
async fn movies_pending_in_another_order_are_excluded() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = Uuid::new_v4();

    services.cart.add(user, app.movie_a.id).await.unwrap();
    services.orders.create_from_cart(user).await.unwrap();

    // A is pending elsewhere, B is new
    services.cart.add(user, app.movie_a.id).await.unwrap();
    services.cart.add(user, app.movie_b.id).await.unwrap();
    let second = services.orders.create_from_cart(user).await.unwrap();

    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].movie_id, app.movie_b.id);
    assert_eq!(second.order.total_amount, Some(dec!(14.99)));
    // the excluded entry is cleared with the rest of the cart
    assert!(services.cart.list(user).await.unwrap().items.is_empty());
}

#[tokio::test]
async fn fails_when_everything_is_pending_and_keeps_the_cart() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = Uuid::new_v4();

    services.cart.add(user, app.movie_a.id).await.unwrap();
    services.orders.create_from_cart(user).await.unwrap();

    services.cart.add(user, app.movie_a.id).await.unwrap();
    assert_matches!(
        services.orders.create_from_cart(user).await,
        Err(ServiceError::AllAlreadyPending)
    );
    assert_eq!(services.cart.list(user).await.unwrap().items.len(), 1);
}

#[tokio::test]
async fn canceled_orders_release_their_movies() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = Uuid::new_v4();

    services.cart.add(user, app.movie_a.id).await.unwrap();
    let first = services.orders.create_from_cart(user).await.unwrap();
    services.orders.cancel(user, first.order.id).await.unwrap();

    services.cart.add(user, app.movie_a.id).await.unwrap();
    let second = services.orders.create_from_cart(user).await.unwrap();
    assert_eq!(second.items[0].movie_id, app.movie_a.id);
}

#[tokio::test]
async fn owned_movies_are_excluded_from_new_orders() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = Uuid::new_v4();
    let (order_id, session) = app.checkout(user).await;
    let event = common::completed_event(
        "evt_assembly",
        &session.session_id,
        order_id,
        user,
        Some(session.payment_id),
        2498,
    );
    assert_eq!(app.deliver_webhook(&event).await.status(), 200);

    // bypass the cart's own ownership check to exercise the assembler's
    put_in_cart_unchecked(&app, user, app.movie_a.id).await;
    assert_matches!(
        services.orders.create_from_cart(user).await,
        Err(ServiceError::AllAlreadyPurchased)
    );

    let movie_c = app.seed_movie("Movie C", dec!(4.50)).await;
    services.cart.add(user, movie_c.id).await.unwrap();
    let order = services.orders.create_from_cart(user).await.unwrap();
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].movie_id, movie_c.id);
}

#[tokio::test]
async fn concurrent_assembly_creates_one_order() {
    let app = TestApp::new().await;
    let services = app.state.services.clone();
    let user = Uuid::new_v4();
    services.cart.add(user, app.movie_a.id).await.unwrap();

    let (first, second) = tokio::join!(
        services.orders.create_from_cart(user),
        services.orders.create_from_cart(user)
    );

    let created = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 1);
    let failed = if first.is_err() { first } else { second };
    assert_matches!(failed, Err(ServiceError::CartEmpty));
}

#[tokio::test]
async fn other_users_orders_are_not_found() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let owner = Uuid::new_v4();
    services.cart.add(owner, app.movie_a.id).await.unwrap();
    let order = services.orders.create_from_cart(owner).await.unwrap();

    assert_matches!(
        services.orders.get_for_user(Uuid::new_v4(), order.order.id).await,
        Err(ServiceError::OrderNotFound(_))
    );
}
