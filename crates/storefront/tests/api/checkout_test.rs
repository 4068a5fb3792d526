use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use storefront::{GatewayError, QrCodeResponse};

use crate::helpers::{charge_created, dec, dec_at, qr_ready, spawn_app, MockGateway};

#[sqlx::test(migrations = "./migrations")]
async fn test_pix_checkout_issues_qr_and_confirmation_activates(pool: SqlitePool) {
    let mut gateway = MockGateway::new();
    gateway
        .expect_create_charge()
        .withf(|request| request.amount == dec("20.00") && request.customer_ref == "cus_000042")
        .times(1)
        .returning(|_| Ok(charge_created("pay_happy")));
    gateway
        .expect_fetch_qr_code()
        .times(1)
        .returning(|id| Ok(qr_ready(id)));

    let app = spawn_app(pool, gateway).await;
    let contest_id = app.active_contest("20.00").await;

    let response = app
        .user_post(
            "/checkout/pix",
            json!({
                "customer_ref": "cus_000042",
                "contest_id": contest_id,
                "numbers": [4, 8, 15],
                "amount": "20.00",
            }),
        )
        .await;
    assert_eq!(response.status(), 201);
    let receipt: Value = response.json().await.unwrap();
    assert_eq!(receipt["external_id"], "pay_happy");
    assert!(receipt["qr_code"]["payload"].as_str().unwrap().contains("pay_happy"));
    assert_eq!(receipt["participations"][0]["status"], "pending");
    assert_eq!(receipt["payments"][0]["status"], "pending");
    assert_eq!(dec_at(&receipt["total"]), dec("20.00"));

    let confirmed = app
        .admin_post("/pix_charges/pay_happy/confirm", json!({}))
        .await;
    assert_eq!(confirmed.status(), 200);
    let confirmed: Value = confirmed.json().await.unwrap();
    assert_eq!(confirmed["payments"][0]["status"], "paid");
    assert_eq!(confirmed["participations"][0]["status"], "active");

    let mine: Value = app.user_get("/participations").await.json().await.unwrap();
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["status"], "active");

    let pool: Value = app
        .user_get(&format!("/contests/{}/prize_pool", contest_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(dec_at(&pool["split"]["pool"]), dec("20.00"));
    assert_eq!(dec_at(&pool["split"]["first_place"]), dec("13.00"));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_rejected_charge_hides_gateway_body_and_cancels_ticket(pool: SqlitePool) {
    let mut gateway = MockGateway::new();
    gateway.expect_create_charge().times(1).returning(|_| {
        Err(GatewayError::Rejected {
            status: 400,
            body: String::from(r#"{"errors":[{"code":"invalid_customer","description":"secret"}]}"#),
        })
    });
    gateway.expect_fetch_qr_code().never();

    let app = spawn_app(pool, gateway).await;
    let contest_id = app.active_contest("20.00").await;

    let response = app
        .user_post(
            "/checkout/pix",
            json!({
                "customer_ref": "cus_unknown",
                "contest_id": contest_id,
                "numbers": [1, 2, 3],
                "amount": "20.00",
            }),
        )
        .await;
    assert_eq!(response.status(), 502);
    let body = response.text().await.unwrap();
    assert!(!body.contains("invalid_customer"));
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["code"], "GATEWAY_REJECTED");

    let mine: Value = app.user_get("/participations").await.json().await.unwrap();
    assert_eq!(mine[0]["status"], "cancelled");
}

#[sqlx::test(migrations = "./migrations")]
async fn test_charge_timeout_is_not_retried(pool: SqlitePool) {
    let mut gateway = MockGateway::new();
    gateway
        .expect_create_charge()
        .times(1)
        .returning(|_| Err(GatewayError::Timeout(std::time::Duration::from_secs(15))));
    gateway.expect_fetch_qr_code().never();

    let app = spawn_app(pool, gateway).await;
    let contest_id = app.active_contest("20.00").await;

    let response = app
        .user_post(
            "/checkout/pix",
            json!({
                "customer_ref": "cus_000042",
                "contest_id": contest_id,
                "numbers": [1, 2, 3],
                "amount": "20.00",
            }),
        )
        .await;
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "GATEWAY_UNAVAILABLE");
}

#[sqlx::test(migrations = "./migrations")]
async fn test_slow_qr_code_can_be_fetched_later(pool: SqlitePool) {
    let lookups = Arc::new(AtomicUsize::new(0));
    let counter = lookups.clone();

    let mut gateway = MockGateway::new();
    gateway
        .expect_create_charge()
        .times(1)
        .returning(|_| Ok(charge_created("pay_slow")));
    gateway.expect_fetch_qr_code().returning(move |id| {
        // Three lookups during checkout come back empty, the fourth has the code
        if counter.fetch_add(1, Ordering::SeqCst) < 3 {
            Ok(QrCodeResponse::default())
        } else {
            Ok(qr_ready(id))
        }
    });

    let app = spawn_app(pool, gateway).await;
    let contest_id = app.active_contest("10.00").await;

    let response = app
        .user_post(
            "/checkout/cart",
            json!({
                "customer_ref": "cus_000042",
                "lines": [
                    { "contest_id": contest_id, "numbers": [1, 2, 3], "amount": "10.00" },
                    { "contest_id": contest_id, "numbers": [4, 5, 6], "amount": "10.00" },
                ],
            }),
        )
        .await;
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "QR_UNAVAILABLE");
    assert_eq!(body["checkout"]["external_id"], "pay_slow");
    let payment_ids = body["checkout"]["payment_ids"].as_array().unwrap();
    assert_eq!(payment_ids.len(), 2);
    assert_eq!(lookups.load(Ordering::SeqCst), 3);

    let payment_id = payment_ids[0].as_str().unwrap();
    let refreshed = app
        .user_post(&format!("/payments/{}/qr_code", payment_id), json!({}))
        .await;
    assert_eq!(refreshed.status(), 200);
    let refreshed: Value = refreshed.json().await.unwrap();
    assert!(refreshed["qr_code"]["payload"].as_str().unwrap().contains("pay_slow"));
    assert_eq!(refreshed["payments"].as_array().unwrap().len(), 2);
    assert!(refreshed["payments"]
        .as_array()
        .unwrap()
        .iter()
        .all(|p| p["external_data"]["qr_code"]["payload"] == refreshed["qr_code"]["payload"]));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_qr_code_of_another_user_is_hidden(pool: SqlitePool) {
    let mut gateway = MockGateway::new();
    gateway
        .expect_create_charge()
        .returning(|_| Ok(charge_created("pay_private")));
    gateway
        .expect_fetch_qr_code()
        .returning(|id| Ok(qr_ready(id)));

    let app = spawn_app(pool, gateway).await;
    let contest_id = app.active_contest("10.00").await;
    let receipt: Value = app
        .user_post(
            "/checkout/pix",
            json!({
                "customer_ref": "cus_000042",
                "contest_id": contest_id,
                "numbers": [7, 8, 9],
                "amount": "10.00",
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    let payment_id = receipt["payments"][0]["id"].as_str().unwrap();

    let response = app
        .client
        .post(app.url(&format!("/payments/{}/qr_code", payment_id)))
        .header("x-user-id", "someone-else")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
