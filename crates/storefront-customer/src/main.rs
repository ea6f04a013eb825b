mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use storefront_core::{CartLine, CustomerProfile, Order, ProductSnapshot, ProfileStore};
use storefront_platform::{BrokerClient, Dispatcher, ServiceConfig};
use storefront_store::InMemoryProfileStore;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct AppState {
    profiles: Arc<dyn ProfileStore>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShoppingDetailsResponse {
    cart: Vec<CartLine>,
    orders: Vec<Order>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "storefront_customer=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8002")?;
    let broker = Arc::new(BrokerClient::connect(&config).await?);
    let profiles: Arc<dyn ProfileStore> = Arc::new(InMemoryProfileStore::new());

    let dispatcher = Arc::new(Dispatcher::new(
        broker.clone(),
        config.customer_service.clone(),
        handlers::registry(profiles.clone()),
    ));

    let shutdown = CancellationToken::new();
    let mut consumer = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown.clone();
        async move { dispatcher.run(shutdown).await }
    });

    let state = AppState { profiles };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/customer/profile", get(profile))
        .route("/customer/wishlist", get(wishlist))
        .route("/customer/shopping-details", get(shopping_details))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("customer service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Let in-flight handler work finish before the connection goes away;
    // anything unacknowledged past the timeout is redelivered on restart.
    shutdown.cancel();
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut consumer).await.is_err() {
        warn!("drain timeout exceeded, forcing close");
        consumer.abort();
    }
    broker.close().await;

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
    token.cancel();
}

async fn healthz() -> &'static str {
    "ok"
}

async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CustomerProfile>, (StatusCode, String)> {
    let user_id = user_id(&headers)?;
    let profile = state.profiles.load(&user_id).await.map_err(internal_error)?;
    profile.map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("no profile for user {user_id}"),
        )
    })
}

async fn wishlist(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProductSnapshot>>, (StatusCode, String)> {
    let user_id = user_id(&headers)?;
    let profile = state.profiles.load(&user_id).await.map_err(internal_error)?;
    Ok(Json(profile.map(|p| p.wishlist).unwrap_or_default()))
}

async fn shopping_details(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ShoppingDetailsResponse>, (StatusCode, String)> {
    let user_id = user_id(&headers)?;
    let profile = state.profiles.load(&user_id).await.map_err(internal_error)?;
    let (cart, orders) = profile
        .map(|p| (p.cart, p.orders))
        .unwrap_or_default();
    Ok(Json(ShoppingDetailsResponse { cart, orders }))
}

fn user_id(headers: &HeaderMap) -> Result<String, (StatusCode, String)> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                "x-user-id header is required".to_string(),
            )
        })
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
