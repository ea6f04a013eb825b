use async_trait::async_trait;

use crate::models::{Cart, CustomerProfile, Order, Product};

/// Mutation applied to a single user document under the store's lock.
pub type Update<T> = Box<dyn FnOnce(&mut T) + Send>;

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert(&self, product: Product) -> anyhow::Result<()>;
    async fn get(&self, product_id: &str) -> anyhow::Result<Option<Product>>;
    async fn list(&self) -> anyhow::Result<Vec<Product>>;
    async fn by_category(&self, category: &str) -> anyhow::Result<Vec<Product>>;
    async fn by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<Product>>;
}

/// Customer-service store keyed by user id. `update` creates the document
/// if absent and applies the mutation atomically with respect to other
/// callers of the same store.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self, user_id: &str) -> anyhow::Result<Option<CustomerProfile>>;
    async fn update(
        &self,
        user_id: &str,
        apply: Update<CustomerProfile>,
    ) -> anyhow::Result<CustomerProfile>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn load(&self, user_id: &str) -> anyhow::Result<Option<Cart>>;
    async fn update(&self, user_id: &str, apply: Update<Cart>) -> anyhow::Result<Cart>;
}

/// Order history per user. `append` must deduplicate by order id so that a
/// redelivered order event leaves the history unchanged; it returns whether
/// the order was actually added.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn append(&self, user_id: &str, order: Order) -> anyhow::Result<bool>;
    async fn list(&self, user_id: &str) -> anyhow::Result<Vec<Order>>;
}
