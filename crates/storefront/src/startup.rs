use crate::{
    api::{
        errors::not_found,
        extractors::require_admin,
        routes::{
            activate_participation, cancel_participation, cart_checkout, confirm_pix_charge,
            create_contest, create_discount, create_participation, get_contest, get_prize_pool,
            health_check, list_participations, list_pending_participations, pix_checkout,
            quote_discount, record_draw, refresh_qr_code, register_cash_payment, update_contest,
        },
    },
    config::Settings,
    domain::{
        pix::{PixReconciler, Sleeper, TokioSleeper},
        ContestStore, DiscountStore, ParticipationLedger, PaymentRecorder,
        SettlementOrchestrator,
    },
    infra::{
        db::{DBConnection, DatabasePoolConfig},
        pix_gateway::{AsaasClient, PixGateway},
    },
};

// In-memory gateway only available with e2e-testing feature or debug builds
#[cfg(any(feature = "e2e-testing", debug_assertions))]
use crate::infra::pix_gateway_mock::MockPixGateway;
use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{connect_info::IntoMakeServiceWithConnectInfo, ConnectInfo, Request},
    http::{Extensions, HeaderName, HeaderValue},
    middleware::{self, AddExtension, Next},
    response::IntoResponse,
    routing::{get, post, put},
    serve::Serve,
    Router,
};
use hyper::{
    header::{ACCEPT, CONTENT_TYPE},
    Method,
};
use log::{error, info, warn};
use reqwest_middleware::{
    reqwest::{self, Client},
    ClientBuilder, ClientWithMiddleware, Middleware,
};
use secrecy::SecretString;
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use storefront_core::RandomCodeGenerator;
use tokio::signal::unix::{signal, SignalKind};
use tokio::{net::TcpListener, select};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub struct Application {
    server: Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    cancellation_token: CancellationToken,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let address = format!(
            "{}:{}",
            config.api_settings.domain, config.api_settings.port
        );
        let listener = SocketAddr::from_str(&address)?;
        let origins = config.api_settings.origins.clone();
        let app_state = build_app(config).await?;
        let cancellation_token = app_state.cancel_token.clone();
        let server = build_server(listener, app_state, origins).await?;
        Ok(Self {
            server,
            cancellation_token,
        })
    }

    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        info!("Starting server...");
        let token = self.cancellation_token.clone();
        match self
            .server
            .with_graceful_shutdown(shutdown_signal(token))
            .await
        {
            Ok(_) => {
                self.cancellation_token.cancel();
                info!("Shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Server shutdown error: {}", e);
                self.cancellation_token.cancel();
                Err(anyhow!("Error during server shutdown: {}", e))
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub contests: ContestStore,
    pub ledger: ParticipationLedger,
    pub payments: PaymentRecorder,
    pub discounts: DiscountStore,
    pub settlement: Arc<SettlementOrchestrator>,
    pub admin_token: SecretString,
    /// Parent of the token handed to every QR poll; cancelled on shutdown
    pub cancel_token: CancellationToken,
}

impl AppState {
    pub fn new(
        db: DBConnection,
        gateway: Arc<dyn PixGateway>,
        sleeper: Arc<dyn Sleeper>,
        config: &Settings,
    ) -> Self {
        let codes = Arc::new(RandomCodeGenerator);
        let contests = ContestStore::new(db.clone(), codes.clone());
        let ledger = ParticipationLedger::new(db.clone(), contests.clone(), codes);
        let payments = PaymentRecorder::new(db.clone());
        let discounts = DiscountStore::new(db);
        let pix = PixReconciler::new(
            gateway,
            sleeper,
            config.pix_settings.qr_poll_delays(),
            config.pix_settings.due_in_days,
        );
        let settlement = SettlementOrchestrator::new(
            contests.clone(),
            ledger.clone(),
            payments.clone(),
            discounts.clone(),
            pix,
        );

        AppState {
            contests,
            ledger,
            payments,
            discounts,
            settlement: Arc::new(settlement),
            admin_token: SecretString::from(config.api_settings.admin_token.clone()),
            cancel_token: CancellationToken::new(),
        }
    }
}

pub async fn build_app(config: Settings) -> Result<AppState, anyhow::Error> {
    let reqwest_client = build_reqwest_client();

    // Create PIX gateway (real or mock based on config)
    #[cfg(any(feature = "e2e-testing", debug_assertions))]
    let gateway: Arc<dyn PixGateway> = if config.pix_settings.mock_enabled {
        info!(
            "Mock PIX gateway configured (qr ready after {} polls)",
            config.pix_settings.mock_qr_ready_after_polls
        );
        Arc::new(MockPixGateway::new(
            config.pix_settings.mock_qr_ready_after_polls,
        ))
    } else {
        let client = AsaasClient::new(reqwest_client, &config.pix_settings)?;
        info!("Asaas gateway configured at {}", client.base_url);
        Arc::new(client)
    };

    #[cfg(not(any(feature = "e2e-testing", debug_assertions)))]
    let gateway: Arc<dyn PixGateway> = {
        if config.pix_settings.mock_enabled {
            return Err(anyhow!(
                "Mock PIX gateway requires e2e-testing feature or debug build"
            ));
        }
        let client = AsaasClient::new(reqwest_client, &config.pix_settings)?;
        info!("Asaas gateway configured at {}", client.base_url);
        Arc::new(client)
    };

    std::fs::create_dir_all(&config.db_settings.data_folder).map_err(|e| {
        anyhow!(
            "Failed to create data folder {}: {}",
            config.db_settings.data_folder,
            e
        )
    })?;
    let pool_config: DatabasePoolConfig = config.db_settings.clone().into();
    let db = DBConnection::new(&config.db_settings.data_folder, "storefront", pool_config)
        .await
        .map_err(|e| anyhow!("Error setting up storefront db: {}", e))?;
    info!("Storefront db ready at {}", db.database_path);

    Ok(AppState::new(db, gateway, Arc::new(TokioSleeper), &config))
}

pub async fn build_server(
    socket_addr: SocketAddr,
    app_state: AppState,
    origins: Vec<String>,
) -> Result<
    Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    anyhow::Error,
> {
    let listener = TcpListener::bind(socket_addr).await?;

    info!("Setting up service");
    let app = app(app_state, origins);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    info!(
        "Service running @: http://{}:{}",
        socket_addr.ip(),
        socket_addr.port()
    );
    Ok(server)
}

pub fn app(app_state: AppState, origins: Vec<String>) -> Router {
    let origins: Vec<HeaderValue> = origins
        .into_iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-admin-token"),
        ])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true);

    let state = Arc::new(app_state);

    let admin_endpoints = Router::new()
        .route("/contests", post(create_contest))
        .route("/contests/{contest_id}", put(update_contest))
        .route("/contests/{contest_id}/draws", post(record_draw))
        .route(
            "/participations/pending",
            get(list_pending_participations),
        )
        .route(
            "/participations/{participation_id}/activate",
            post(activate_participation),
        )
        .route(
            "/participations/{participation_id}/cancel",
            post(cancel_participation),
        )
        .route(
            "/participations/{participation_id}/cash_payment",
            post(register_cash_payment),
        )
        .route(
            "/pix_charges/{external_id}/confirm",
            post(confirm_pix_charge),
        )
        .route("/discounts", post(create_discount))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/api/v1/health_check", get(health_check))
        .route("/api/v1/contests/{contest_id}", get(get_contest))
        .route(
            "/api/v1/contests/{contest_id}/prize_pool",
            get(get_prize_pool),
        )
        .route(
            "/api/v1/participations",
            post(create_participation).get(list_participations),
        )
        .route("/api/v1/checkout/pix", post(pix_checkout))
        .route("/api/v1/checkout/cart", post(cart_checkout))
        .route("/api/v1/payments/{payment_id}/qr_code", post(refresh_qr_code))
        .route("/api/v1/discounts/{code}", get(quote_discount))
        .nest("/api/v1/admin", admin_endpoints)
        .fallback(not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
        .layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_default();
    info!(target: "http_request", "new request, {} {}", method.as_str(), path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, {} {} code: {}, time: {}", method.as_str(), path, response.status().as_str(), response_time);

    response
}

/// Gateway calls are never retried here: a repeated `POST /payments` would
/// create a second charge.
pub fn build_reqwest_client() -> ClientWithMiddleware {
    ClientBuilder::new(Client::new())
        .with(LoggingMiddleware)
        .build()
}

struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let method = req.method().clone();
        let url = req.url().clone();

        info!("Making {} request to: {}", method, url);

        let result = next.run(req, extensions).await;

        match &result {
            Ok(response) => {
                info!("{} {} -> Status: {}", method, url, response.status());
            }
            Err(error) => {
                warn!("{} {} -> Error: {:?}", method, url, error);
            }
        }

        result
    }
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(mut sigint), Ok(mut sigterm)) => {
            select! {
                _ = sigint.recv() => info!("Received SIGINT signal"),
                _ = sigterm.recv() => info!("Received SIGTERM signal"),
                _ = cancel_token.cancelled() => info!("Shutdown requested"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to install signal handlers: {}", e);
            cancel_token.cancelled().await;
        }
    }
    // Abort QR polls still waiting between attempts
    cancel_token.cancel();
}
