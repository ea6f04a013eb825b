use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use storefront_core::{Cart, CartStore, Order};
use storefront_platform::{Envelope, EventHandler, EventKind, HandlerError, HandlerRegistry};

/// The shopping service only tracks cart mutations; order events originate
/// here and are consumed by the customer service.
pub fn registry(store: Arc<dyn CartStore>) -> HandlerRegistry {
    let cart = Arc::new(CartProjection::new(store));

    HandlerRegistry::builder()
        .on(EventKind::AddToCart, cart.clone())
        .on(EventKind::RemoveFromCart, cart)
        .build()
}

pub struct CartProjection {
    store: Arc<dyn CartStore>,
}

impl CartProjection {
    pub fn new(store: Arc<dyn CartStore>) -> Self {
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
                        Box::new(move |cart| {
                            cart.set_line(product, qty);
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
                        Box::new(move |cart| {
                            cart.remove_line(&product_id);
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

/// Turns the current cart into an order record. The order id is minted
/// here; downstream consumers deduplicate on it.
pub fn build_order(cart: &Cart, txn_id: &str) -> Order {
    Order {
        id: Uuid::new_v4().to_string(),
        items: cart.items.clone(),
        amount: cart.amount(),
        status: "received".to_string(),
        txn_id: txn_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rust_decimal::Decimal;

    use storefront_core::ProductSnapshot;
    use storefront_platform::CartChange;
    use storefront_store::InMemoryCartStore;

    fn snapshot(id: &str, price: i64) -> ProductSnapshot {
        ProductSnapshot {
            id: id.to_string(),
            name: format!("product {id}"),
            desc: String::new(),
            category: String::new(),
            unit: 1,
            price: Decimal::new(price, 0),
            banner: String::new(),
        }
    }

    #[tokio::test]
    async fn cart_add_delivered_twice_keeps_sent_quantity() {
        let store = Arc::new(InMemoryCartStore::new());
        let handler = CartProjection::new(store.clone());
        let envelope = Envelope::AddToCart(CartChange {
            user_id: "u1".to_string(),
            product: snapshot("p1", 300),
            qty: 2,
        });

        handler.applies(&envelope).await.unwrap();
        handler.applies(&envelope).await.unwrap();

        let cart = store.load("u1").await.unwrap().unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].qty, 2);
    }

    #[tokio::test]
    async fn removing_absent_cart_item_succeeds_unchanged() {
        let store = Arc::new(InMemoryCartStore::new());
        let handler = CartProjection::new(store.clone());

        handler
            .applies(&Envelope::AddToCart(CartChange {
                user_id: "u1".to_string(),
                product: snapshot("p1", 300),
                qty: 1,
            }))
            .await
            .unwrap();
        handler
            .applies(&Envelope::RemoveFromCart(CartChange {
                user_id: "u1".to_string(),
                product: snapshot("p9", 100),
                qty: 0,
            }))
            .await
            .unwrap();

        let cart = store.load("u1").await.unwrap().unwrap();
        assert_eq!(cart.items.len(), 1);
    }

    #[test]
    fn order_amount_reflects_cart_contents() {
        let mut cart = Cart::new("u1");
        cart.set_line(snapshot("p1", 300), 2);
        cart.set_line(snapshot("p2", 50), 3);

        let order = build_order(&cart, "txn-1");

        assert_eq!(order.amount, Decimal::new(750, 0));
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.status, "received");
        assert_eq!(order.txn_id, "txn-1");
    }
}
