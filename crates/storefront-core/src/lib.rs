pub mod models;
pub mod store;

pub use models::{Cart, CartLine, CustomerProfile, Order, Product, ProductSnapshot};
pub use store::{CartStore, OrderStore, ProductStore, ProfileStore, Update};
