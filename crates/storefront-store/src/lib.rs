use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use storefront_core::{
    Cart, CartStore, CustomerProfile, Order, OrderStore, Product, ProductStore, ProfileStore,
    Update,
};

#[derive(Default)]
pub struct InMemoryProductStore {
    products: RwLock<HashMap<String, Product>>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn insert(&self, product: Product) -> anyhow::Result<()> {
        let mut products = self.products.write().await;
        products.insert(product.id.clone(), product);
        Ok(())
    }

    async fn get(&self, product_id: &str) -> anyhow::Result<Option<Product>> {
        let products = self.products.read().await;
        Ok(products.get(product_id).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<Product>> {
        let products = self.products.read().await;
        let mut all: Vec<Product> = products.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn by_category(&self, category: &str) -> anyhow::Result<Vec<Product>> {
        let products = self.products.read().await;
        let mut matching: Vec<Product> = products
            .values()
            .filter(|product| product.category == category)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matching)
    }

    async fn by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<Product>> {
        let products = self.products.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| products.get(id).cloned())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, CustomerProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn load(&self, user_id: &str) -> anyhow::Result<Option<CustomerProfile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(user_id).cloned())
    }

    async fn update(
        &self,
        user_id: &str,
        apply: Update<CustomerProfile>,
    ) -> anyhow::Result<CustomerProfile> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| CustomerProfile::new(user_id));
        apply(profile);
        Ok(profile.clone())
    }
}

#[derive(Default)]
pub struct InMemoryCartStore {
    carts: RwLock<HashMap<String, Cart>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn load(&self, user_id: &str) -> anyhow::Result<Option<Cart>> {
        let carts = self.carts.read().await;
        Ok(carts.get(user_id).cloned())
    }

    async fn update(&self, user_id: &str, apply: Update<Cart>) -> anyhow::Result<Cart> {
        let mut carts = self.carts.write().await;
        let cart = carts
            .entry(user_id.to_string())
            .or_insert_with(|| Cart::new(user_id));
        apply(cart);
        Ok(cart.clone())
    }
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<String, Vec<Order>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn append(&self, user_id: &str, order: Order) -> anyhow::Result<bool> {
        let mut orders = self.orders.write().await;
        let history = orders.entry(user_id.to_string()).or_default();
        if history.iter().any(|existing| existing.id == order.id) {
            return Ok(false);
        }
        history.push(order);
        Ok(true)
    }

    async fn list(&self, user_id: &str) -> anyhow::Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(user_id).cloned().unwrap_or_default())
    }
}
