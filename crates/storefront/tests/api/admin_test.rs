use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::helpers::{dec, dec_at, spawn_app, MockGateway, TestApp, ORIGIN, USER};

async fn create_ticket(app: &TestApp, contest_id: &str, numbers: [i64; 3]) -> Value {
    let response = app
        .user_post(
            "/participations",
            json!({ "contest_id": contest_id, "numbers": numbers, "amount": "10.00" }),
        )
        .await;
    assert_eq!(response.status(), 201);
    response.json().await.unwrap()
}

#[sqlx::test(migrations = "./migrations")]
async fn test_health_check_and_unknown_route(pool: SqlitePool) {
    let app = spawn_app(pool, MockGateway::new()).await;

    let health = app.client.get(app.url("/health_check")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let missing = app.client.get(app.url("/nowhere")).send().await.unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[sqlx::test(migrations = "./migrations")]
async fn test_admin_routes_require_token(pool: SqlitePool) {
    let app = spawn_app(pool, MockGateway::new()).await;

    let response = app
        .client
        .get(app.url("/admin/participations/pending"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let wrong = app
        .client
        .get(app.url("/admin/participations/pending"))
        .header("x-admin-token", "guess")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 403);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_browser_preflight_allows_admin_token(pool: SqlitePool) {
    let app = spawn_app(pool, MockGateway::new()).await;

    let response = app
        .client
        .request(reqwest::Method::OPTIONS, app.url("/admin/contests"))
        .header("origin", ORIGIN)
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "x-admin-token,content-type")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let allowed = response
        .headers()
        .get("access-control-allow-headers")
        .unwrap()
        .to_str()
        .unwrap()
        .to_lowercase();
    assert!(allowed.contains("x-admin-token"));
    assert!(allowed.contains("x-user-id"));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_user_routes_require_identity(pool: SqlitePool) {
    let app = spawn_app(pool, MockGateway::new()).await;
    let response = app
        .client
        .get(app.url("/participations"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_cash_payment_over_contest_value_is_refused(pool: SqlitePool) {
    let app = spawn_app(pool, MockGateway::new()).await;
    let contest_id = app.active_contest("10.00").await.to_string();
    let ticket = create_ticket(&app, &contest_id, [3, 9, 21]).await;
    let ticket_id = ticket["id"].as_str().unwrap();
    assert!(ticket["ticket_code"].as_str().unwrap().starts_with("TK-"));

    let pending: Value = app
        .client
        .get(app.url("/admin/participations/pending"))
        .header("x-admin-token", crate::helpers::ADMIN_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let too_much = app
        .admin_post(
            &format!("/participations/{}/cash_payment", ticket_id),
            json!({ "amount": "12.00" }),
        )
        .await;
    assert_eq!(too_much.status(), 422);
    let body: Value = too_much.json().await.unwrap();
    assert_eq!(body["code"], "AMOUNT_EXCEEDS_CONTEST_VALUE");

    let paid = app
        .admin_post(
            &format!("/participations/{}/cash_payment", ticket_id),
            json!({ "amount": "10.00", "notes": "desk 1" }),
        )
        .await;
    assert_eq!(paid.status(), 200);
    let paid: Value = paid.json().await.unwrap();
    assert_eq!(paid["payment"]["payment_method"], "cash");
    assert_eq!(paid["payment"]["status"], "paid");
    assert_eq!(paid["participation"]["status"], "active");

    let cancel = app
        .admin_post(&format!("/participations/{}/cancel", ticket_id), json!({}))
        .await;
    assert_eq!(cancel.status(), 409);
    let body: Value = cancel.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_STATE");
}

#[sqlx::test(migrations = "./migrations")]
async fn test_draw_closes_contest_to_new_tickets(pool: SqlitePool) {
    let app = spawn_app(pool, MockGateway::new()).await;
    let contest_id = app.active_contest("10.00").await.to_string();
    create_ticket(&app, &contest_id, [1, 2, 3]).await;

    let draw = app
        .admin_post(
            &format!("/contests/{}/draws", contest_id),
            json!({ "drawn_numbers": [1, 2, 3, 4, 5] }),
        )
        .await;
    assert_eq!(draw.status(), 201);

    let response = app
        .user_post(
            "/participations",
            json!({ "contest_id": contest_id, "numbers": [4, 5, 6], "amount": "10.00" }),
        )
        .await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "CONTEST_NOT_ACCEPTING");
    assert_eq!(body["error"], "draw already performed");

    let mine: Value = app.user_get("/participations").await.json().await.unwrap();
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["user_id"], USER);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_invalid_numbers_are_rejected(pool: SqlitePool) {
    let app = spawn_app(pool, MockGateway::new()).await;
    let contest_id = app.active_contest("10.00").await.to_string();

    let response = app
        .user_post(
            "/participations",
            json!({ "contest_id": contest_id, "numbers": [1, 1, 30], "amount": "10.00" }),
        )
        .await;
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_NUMBERS");
}

#[sqlx::test(migrations = "./migrations")]
async fn test_discount_quote(pool: SqlitePool) {
    let app = spawn_app(pool, MockGateway::new()).await;
    let contest_id = app.active_contest("20.00").await;

    let created = app
        .admin_post(
            "/discounts",
            json!({
                "code": "welcome10",
                "discount_type": "percentage",
                "discount_value": "10",
                "max_uses": 100,
            }),
        )
        .await;
    assert_eq!(created.status(), 201);

    let quote: Value = app
        .user_get(&format!(
            "/discounts/WELCOME10?contest_id={}&amount=20.00",
            contest_id
        ))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(quote["code"], "WELCOME10");
    assert_eq!(dec_at(&quote["discount_amount"]), dec("2.00"));
    assert_eq!(dec_at(&quote["final_price"]), dec("18.00"));

    let unknown = app
        .user_get(&format!("/discounts/NOPE?contest_id={}&amount=20.00", contest_id))
        .await;
    assert_eq!(unknown.status(), 404);

    let oversized = app
        .user_get(&format!(
            "/discounts/WELCOME10?contest_id={}&amount=50000000000000000000000000000",
            contest_id
        ))
        .await;
    assert_eq!(oversized.status(), 422);
    let body: Value = oversized.json().await.unwrap();
    assert_eq!(body["code"], "AMOUNT_INVALID");
}
