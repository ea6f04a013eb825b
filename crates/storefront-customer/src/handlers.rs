use std::sync::Arc;

use async_trait::async_trait;

use storefront_core::ProfileStore;
use storefront_platform::{Envelope, EventHandler, EventKind, HandlerError, HandlerRegistry};

/// Builds the customer service's event routing: every kind it consumes,
/// mapped once at startup.
pub fn registry(store: Arc<dyn ProfileStore>) -> HandlerRegistry {
    let wishlist = Arc::new(WishlistProjection::new(store.clone()));
    let cart = Arc::new(CartProjection::new(store.clone()));
    let orders = Arc::new(OrderProjection::new(store));

    HandlerRegistry::builder()
        .on(EventKind::AddToWishlist, wishlist.clone())
        .on(EventKind::RemoveFromWishlist, wishlist)
        .on(EventKind::AddToCart, cart.clone())
        .on(EventKind::RemoveFromCart, cart)
        .on(EventKind::CreateOrder, orders)
        .build()
}

pub struct WishlistProjection {
    store: Arc<dyn ProfileStore>,
}

impl WishlistProjection {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for WishlistProjection {
    async fn applies(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        match envelope {
            Envelope::AddToWishlist(change) => {
                let product = change.product.clone();
                self.store
                    .update(
                        &change.user_id,
                        Box::new(move |profile| {
                            profile.add_to_wishlist(product);
                        }),
                    )
                    .await?;
                Ok(())
            }
            Envelope::RemoveFromWishlist(change) => {
                let product_id = change.product.id.clone();
                self.store
                    .update(
                        &change.user_id,
                        Box::new(move |profile| {
                            profile.remove_from_wishlist(&product_id);
                        }),
                    )
                    .await?;
                Ok(())
            }
            other => Err(HandlerError::message(format!(
                "wishlist projection cannot apply {}",
                other.kind()
            ))),
        }
    }
}

pub struct CartProjection {
    store: Arc<dyn ProfileStore>,
}

impl CartProjection {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for CartProjection {
    async fn applies(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        match envelope {
            Envelope::AddToCart(change) => {
                let product = change.product.clone();
                let qty = change.qty;
                self.store
                    .update(
                        &change.user_id,
                        Box::new(move |profile| {
                            profile.set_cart_line(product, qty);
                        }),
                    )
                    .await?;
                Ok(())
            }
            Envelope::RemoveFromCart(change) => {
                let product_id = change.product.id.clone();
                self.store
                    .update(
                        &change.user_id,
                        Box::new(move |profile| {
                            profile.remove_cart_line(&product_id);
                        }),
                    )
                    .await?;
                Ok(())
            }
            other => Err(HandlerError::message(format!(
                "cart projection cannot apply {}",
                other.kind()
            ))),
        }
    }
}

pub struct OrderProjection {
    store: Arc<dyn ProfileStore>,
}

impl OrderProjection {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for OrderProjection {
    async fn applies(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        match envelope {
            Envelope::CreateOrder(placed) => {
                let order = placed.order.clone();
                self.store
                    .update(
                        &placed.user_id,
                        Box::new(move |profile| {
                            profile.record_order(order);
                        }),
                    )
                    .await?;
                Ok(())
            }
            other => Err(HandlerError::message(format!(
                "order projection cannot apply {}",
                other.kind()
            ))),
        }
    }
}
