use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use storefront_core::{Product, ProductSnapshot, ProductStore};
use storefront_platform::{
    BrokerClient, CartChange, Envelope, Publisher, ServiceConfig, WishlistChange,
};
use storefront_store::InMemoryProductStore;

#[derive(Clone)]
struct AppState {
    products: Arc<dyn ProductStore>,
    publisher: Arc<Publisher>,
    customer_service: String,
    shopping_service: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProductRequest {
    name: String,
    #[serde(default)]
    desc: String,
    #[serde(rename = "type", default)]
    category: String,
    #[serde(default)]
    unit: u32,
    price: Decimal,
    #[serde(default = "default_available")]
    available: bool,
    #[serde(default)]
    supplier: String,
    #[serde(default)]
    banner: String,
}

fn default_available() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectedProductsRequest {
    ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WishlistMutationRequest {
    product_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CartMutationRequest {
    product_id: String,
    qty: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CartMutationResponse {
    product: ProductSnapshot,
    unit: u32,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "storefront_catalog=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8001")?;
    let broker = Arc::new(BrokerClient::connect(&config).await?);
    let publisher = Arc::new(Publisher::new(broker.clone()).await?);

    let state = AppState {
        products: Arc::new(InMemoryProductStore::new()),
        publisher,
        customer_service: config.customer_service.clone(),
        shopping_service: config.shopping_service.clone(),
    };

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/product", get(list_products))
        .route("/product/create", post(create_product))
        .route("/product/ids", post(selected_products))
        .route("/product/category/{category}", get(products_by_category))
        .route("/product/wishlist", put(add_to_wishlist))
        .route("/product/wishlist/{id}", delete(remove_from_wishlist))
        .route("/product/cart", put(add_to_cart))
        .route("/product/cart/{id}", delete(remove_from_cart))
        .route("/product/{id}", get(product_by_id))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("catalog service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<Product>>, (StatusCode, String)> {
    state.products.list().await.map(Json).map_err(internal_error)
}

async fn product_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>, (StatusCode, String)> {
    let product = state.products.get(&id).await.map_err(internal_error)?;
    product
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no product with id {id}")))
}

async fn products_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<Vec<Product>>, (StatusCode, String)> {
    state
        .products
        .by_category(&category)
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), (StatusCode, String)> {
    if payload.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name is required".to_string()));
    }
    if payload.price < Decimal::ZERO {
        return Err((
            StatusCode::BAD_REQUEST,
            "price must be non-negative".to_string(),
        ));
    }

    let product = Product {
        id: Uuid::new_v4().to_string(),
        name: payload.name.trim().to_string(),
        desc: payload.desc,
        category: payload.category,
        unit: payload.unit,
        price: payload.price,
        available: payload.available,
        supplier: payload.supplier,
        banner: payload.banner,
    };
    state
        .products
        .insert(product.clone())
        .await
        .map_err(internal_error)?;

    Ok((StatusCode::CREATED, Json(product)))
}

async fn selected_products(
    State(state): State<AppState>,
    Json(payload): Json<SelectedProductsRequest>,
) -> Result<Json<Vec<Product>>, (StatusCode, String)> {
    state
        .products
        .by_ids(&payload.ids)
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn add_to_wishlist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WishlistMutationRequest>,
) -> Result<Json<ProductSnapshot>, (StatusCode, String)> {
    let user_id = user_id(&headers)?;
    let product = snapshot_for(&state, &payload.product_id).await?;

    let envelope = Envelope::AddToWishlist(WishlistChange {
        user_id,
        product: product.clone(),
    });
    publish_to(&state, &state.customer_service, &envelope).await;

    Ok(Json(product))
}

async fn remove_from_wishlist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ProductSnapshot>, (StatusCode, String)> {
    let user_id = user_id(&headers)?;
    let product = snapshot_for(&state, &id).await?;

    let envelope = Envelope::RemoveFromWishlist(WishlistChange {
        user_id,
        product: product.clone(),
    });
    publish_to(&state, &state.customer_service, &envelope).await;

    Ok(Json(product))
}

async fn add_to_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CartMutationRequest>,
) -> Result<Json<CartMutationResponse>, (StatusCode, String)> {
    let user_id = user_id(&headers)?;
    if payload.qty == 0 {
        return Err((StatusCode::BAD_REQUEST, "qty must be positive".to_string()));
    }
    let product = snapshot_for(&state, &payload.product_id).await?;

    // Cart state lives in both the customer and shopping services; each
    // destination gets its own publish and may fail independently.
    let envelope = Envelope::AddToCart(CartChange {
        user_id,
        product: product.clone(),
        qty: payload.qty,
    });
    publish_to(&state, &state.customer_service, &envelope).await;
    publish_to(&state, &state.shopping_service, &envelope).await;

    Ok(Json(CartMutationResponse {
        product,
        unit: payload.qty,
    }))
}

async fn remove_from_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CartMutationResponse>, (StatusCode, String)> {
    let user_id = user_id(&headers)?;
    let product = snapshot_for(&state, &id).await?;

    let envelope = Envelope::RemoveFromCart(CartChange {
        user_id,
        product: product.clone(),
        qty: 0,
    });
    publish_to(&state, &state.customer_service, &envelope).await;
    publish_to(&state, &state.shopping_service, &envelope).await;

    Ok(Json(CartMutationResponse { product, unit: 0 }))
}

/// Best-effort announce of a local mutation. The catalog record is the
/// source of truth; a failed publish is logged for retry machinery and
/// never turns the caller's request into an error.
async fn publish_to(state: &AppState, target: &str, envelope: &Envelope) {
    if let Err(err) = state.publisher.publish(target, envelope).await {
        warn!(target, event = %envelope.kind(), "publish failed: {err}");
    }
}

async fn snapshot_for(
    state: &AppState,
    product_id: &str,
) -> Result<ProductSnapshot, (StatusCode, String)> {
    let product = state
        .products
        .get(product_id)
        .await
        .map_err(internal_error)?;
    product
        .map(|product| ProductSnapshot::from(&product))
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("no product with id {product_id}"),
            )
        })
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
