use async_trait::async_trait;
use mockall::mock;
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::{net::SocketAddr, sync::Arc};
use storefront::{
    app,
    domain::pix::TokioSleeper,
    AppState, ChargeCreated, ChargeRequest, DBConnection, GatewayError, PixGateway,
    QrCodeResponse, Settings,
};
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const USER: &str = "user-7f3a";
pub const ORIGIN: &str = "http://localhost:5173";

mock! {
    pub Gateway {}

    #[async_trait]
    impl PixGateway for Gateway {
        async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeCreated, GatewayError>;
        async fn fetch_qr_code(&self, external_id: &str) -> Result<QrCodeResponse, GatewayError>;
    }
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Decimals are serialized as strings
pub fn dec_at(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

pub fn charge_created(id: &str) -> ChargeCreated {
    ChargeCreated {
        id: id.to_string(),
        status: String::from("PENDING"),
        due_date: None,
    }
}

pub fn qr_ready(id: &str) -> QrCodeResponse {
    QrCodeResponse {
        encoded_image: Some(format!("iVBORw0KGgo{}", id)),
        payload: Some(format!("00020126580014br.gov.bcb.pix{}", id)),
        expiration_date: None,
    }
}

pub struct TestApp {
    pub address: SocketAddr,
    pub client: Client,
}

pub async fn spawn_app(pool: SqlitePool, gateway: MockGateway) -> TestApp {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut settings = Settings::default();
    settings.api_settings.admin_token = ADMIN_TOKEN.to_string();
    settings.pix_settings.qr_poll_delays_ms = vec![0, 0, 0];

    let db = DBConnection::from_pools(pool.clone(), pool);
    let state = AppState::new(db, Arc::new(gateway), Arc::new(TokioSleeper), &settings);
    let router = app(state, vec![ORIGIN.to_string()]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        client: Client::new(),
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/api/v1{}", self.address, path)
    }

    pub async fn admin_post(&self, path: &str, body: Value) -> Response {
        self.client
            .post(self.url(&format!("/admin{}", path)))
            .header("x-admin-token", ADMIN_TOKEN)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn user_post(&self, path: &str, body: Value) -> Response {
        self.client
            .post(self.url(path))
            .header("x-user-id", USER)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn user_get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .header("x-user-id", USER)
            .send()
            .await
            .unwrap()
    }

    /// Creates a pick-3-of-25 contest open since yesterday and activates it
    pub async fn active_contest(&self, price: &str) -> Uuid {
        let now = OffsetDateTime::now_utc();
        let created = self
            .admin_post(
                "/contests",
                json!({
                    "name": "Mega Sena",
                    "min_number": 1,
                    "max_number": 25,
                    "numbers_per_participation": 3,
                    "start_date": (now - Duration::days(1)).format(&Rfc3339).unwrap(),
                    "end_date": (now + Duration::days(1)).format(&Rfc3339).unwrap(),
                    "participation_value": price,
                    "first_place_pct": "65",
                    "second_place_pct": "10",
                    "lowest_place_pct": "7",
                    "admin_fee_pct": "18",
                }),
            )
            .await;
        assert_eq!(created.status(), 201);
        let contest: Value = created.json().await.unwrap();
        assert_eq!(contest["status"], "draft");
        let id: Uuid = contest["id"].as_str().unwrap().parse().unwrap();

        let activated = self
            .client
            .put(self.url(&format!("/admin/contests/{}", id)))
            .header("x-admin-token", ADMIN_TOKEN)
            .json(&json!({ "status": "active" }))
            .send()
            .await
            .unwrap();
        assert_eq!(activated.status(), 200);
        id
    }
}
