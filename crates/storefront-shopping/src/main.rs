mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use storefront_core::{Cart, CartStore, Order, OrderStore};
use storefront_platform::{
    BrokerClient, Dispatcher, Envelope, OrderPlaced, Publisher, ServiceConfig,
};
use storefront_store::{InMemoryCartStore, InMemoryOrderStore};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct AppState {
    carts: Arc<dyn CartStore>,
    orders: Arc<dyn OrderStore>,
    publisher: Arc<Publisher>,
    customer_service: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderRequest {
    txn_id: String,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "storefront_shopping=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8003")?;
    let broker = Arc::new(BrokerClient::connect(&config).await?);
    let publisher = Arc::new(Publisher::new(broker.clone()).await?);
    let carts: Arc<dyn CartStore> = Arc::new(InMemoryCartStore::new());
    let orders: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());

    let dispatcher = Arc::new(Dispatcher::new(
        broker.clone(),
        config.shopping_service.clone(),
        handlers::registry(carts.clone()),
    ));

    let shutdown = CancellationToken::new();
    let mut consumer = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown.clone();
        async move { dispatcher.run(shutdown).await }
    });

    let state = AppState {
        carts,
        orders,
        publisher,
        customer_service: config.customer_service.clone(),
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/shopping/order", post(place_order))
        .route("/shopping/orders", get(list_orders))
        .route("/shopping/cart", get(cart))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("shopping service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

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

async fn place_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<Order>), (StatusCode, String)> {
    let user_id = user_id(&headers)?;

    let cart = state
        .carts
        .load(&user_id)
        .await
        .map_err(internal_error)?
        .unwrap_or_else(|| Cart::new(&user_id));
    if cart.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "cart is empty".to_string()));
    }

    let order = handlers::build_order(&cart, &payload.txn_id);
    state
        .orders
        .append(&user_id, order.clone())
        .await
        .map_err(internal_error)?;
    state
        .carts
        .update(&user_id, Box::new(|cart| cart.items.clear()))
        .await
        .map_err(internal_error)?;

    // The order record above is the source of truth; the announcement to
    // the customer service is asynchronous and must not fail the request.
    let envelope = Envelope::CreateOrder(OrderPlaced {
        user_id,
        order: order.clone(),
    });
    if let Err(err) = state
        .publisher
        .publish(&state.customer_service, &envelope)
        .await
    {
        warn!(
            target = %state.customer_service,
            order = %order.id,
            "order publish failed: {err}"
        );
    }

    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Order>>, (StatusCode, String)> {
    let user_id = user_id(&headers)?;
    state
        .orders
        .list(&user_id)
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Cart>, (StatusCode, String)> {
    let user_id = user_id(&headers)?;
    let cart = state.carts.load(&user_id).await.map_err(internal_error)?;
    Ok(Json(cart.unwrap_or_else(|| Cart::new(&user_id))))
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
