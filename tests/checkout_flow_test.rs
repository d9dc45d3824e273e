mod common;

use axum::http::{header, Method, StatusCode};
use cinema_checkout::entities::{purchased_movie, OrderStatus};
use common::{body_json, completed_event, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn cart_to_refund_over_http() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();

    // empty cart
    let response = app
        .request(Method::POST, "/api/v1/orders", None, Some(user))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "cart_empty");

    for movie_id in [app.movie_a.id, app.movie_b.id] {
        let response = app
            .request(
                Method::POST,
                "/api/v1/cart/items",
                Some(json!({"movie_id": movie_id})),
                Some(user),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .request(Method::POST, "/api/v1/orders", None, Some(user))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let order = &body["data"];
    assert_eq!(order["status"], "pending");
    assert_eq!(order["items"].as_array().unwrap().len(), 2);
    let order_id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    assert_eq!(app.order(order_id).await.total_amount, Some(dec!(24.98)));

    let cart = body_json(app.request(Method::GET, "/api/v1/cart", None, Some(user)).await).await;
    assert!(cart["data"]["items"].as_array().unwrap().is_empty());

    // confirm redirects to the hosted checkout
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/confirm"),
            None,
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
    let session = body_json(response).await;
    assert_eq!(location, session["checkout_url"]);
    let session_id = session["session_id"].as_str().unwrap().to_string();
    let payment_id: Uuid = session["payment_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(app.order(order_id).await.status, OrderStatus::Pending);

    // the gateway reports completion, twice
    let event = completed_event("evt_flow", &session_id, order_id, user, Some(payment_id), 2498);
    for _ in 0..2 {
        let response = app.deliver_webhook(&event).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(app.order(order_id).await.status, OrderStatus::Paid);
    let owned = purchased_movie::Entity::find()
        .filter(purchased_movie::Column::UserId.eq(user))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(owned, 2);

    let purchases =
        body_json(app.request(Method::GET, "/api/v1/purchases", None, Some(user)).await).await;
    assert_eq!(purchases["data"].as_array().unwrap().len(), 2);

    let landing = body_json(
        app.request(
            Method::GET,
            &format!("/api/v1/payments/{payment_id}/status/success"),
            None,
            Some(user),
        )
        .await,
    )
    .await;
    assert_eq!(landing["data"]["order_status"], "paid");
    assert_eq!(landing["data"]["payment"]["status"], "successful");

    // refunds: once only
    let refund_uri = format!("/api/v1/orders/{order_id}/refund");
    let reason = json!({"reason": "Bought the wrong edition by mistake"});
    let response = app
        .request(Method::POST, &refund_uri, Some(reason.clone()), Some(user))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["data"]["status"], "pending");

    let response = app
        .request(Method::POST, &refund_uri, Some(reason), Some(user))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "already_requested");

    // paid orders cannot be canceled directly
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/cancel"),
            None,
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "requires_refund");
}

#[tokio::test]
async fn confirm_reports_changed_total_as_warning() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    app.state.services.cart.add(user, app.movie_a.id).await.unwrap();
    let order = app.state.services.orders.create_from_cart(user).await.unwrap().order;
    app.set_item_price(order.id, app.movie_a.id, dec!(12.5)).await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/confirm", order.id),
            None,
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["warning"],
        "Order total has changed to 12.50. Do you want to proceed?"
    );
    assert_eq!(body["order"]["id"], order.id.to_string());
}

#[tokio::test]
async fn cancel_landing_cancels_the_checkout() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let (order_id, session) = app.checkout(user).await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/{}/status/cancel", session.payment_id),
            None,
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["order_status"], "canceled");
    assert_eq!(body["data"]["payment"]["status"], "canceled");
    assert_eq!(app.order(order_id).await.status, OrderStatus::Canceled);

    // someone else's payment is not visible
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/{}", session.payment_id),
            None,
            Some(Uuid::new_v4()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lists_are_paginated_newest_first() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user = Uuid::new_v4();
    for movie_id in [app.movie_a.id, app.movie_b.id] {
        services.cart.add(user, movie_id).await.unwrap();
        services.orders.create_from_cart(user).await.unwrap();
    }

    let body = body_json(
        app.request(Method::GET, "/api/v1/orders?page=1&per_page=1", None, Some(user))
            .await,
    )
    .await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["total_pages"], 2);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn requests_need_a_valid_bearer_token() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "unauthorized");
}

#[tokio::test]
async fn health_openapi_and_request_ids() {
    let app = TestApp::new().await;

    let live = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(live.status(), StatusCode::OK);
    assert!(live.headers().contains_key("x-request-id"));

    let ready = body_json(app.request(Method::GET, "/health/ready", None, None).await).await;
    assert_eq!(ready["status"], "ready");

    let doc = body_json(
        app.request(Method::GET, "/api-docs/openapi.json", None, None)
            .await,
    )
    .await;
    assert!(doc["paths"]["/api/v1/orders/{id}/confirm"].is_object());
}
