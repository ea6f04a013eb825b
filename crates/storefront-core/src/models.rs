use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(rename = "type", default)]
    pub category: String,
    #[serde(default)]
    pub unit: u32,
    pub price: Decimal,
    #[serde(default = "default_available")]
    pub available: bool,
    #[serde(default)]
    pub supplier: String,
    #[serde(default)]
    pub banner: String,
}

fn default_available() -> bool {
    true
}

/// The portion of a catalog record that travels inside events and is held
/// by services that keep a derived copy. Only `id` and `price` are required
/// on the wire; everything else defaults so older producers stay readable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(rename = "type", default)]
    pub category: String,
    #[serde(default)]
    pub unit: u32,
    pub price: Decimal,
    #[serde(default)]
    pub banner: String,
}

impl From<&Product> for ProductSnapshot {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            desc: product.desc.clone(),
            category: product.category.clone(),
            unit: product.unit,
            price: product.price,
            banner: product.banner.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product: ProductSnapshot,
    pub qty: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    #[serde(default)]
    pub items: Vec<CartLine>,
    pub amount: Decimal,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub txn_id: String,
}

/// Shopping-side cart document, one per user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub user_id: String,
    pub items: Vec<CartLine>,
}

impl Cart {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            items: Vec::new(),
        }
    }

    /// Sets the line for the product to the given quantity. Applying the
    /// same payload again leaves the cart unchanged.
    pub fn set_line(&mut self, product: ProductSnapshot, qty: u32) {
        match self.items.iter_mut().find(|line| line.product.id == product.id) {
            Some(line) => {
                line.product = product;
                line.qty = qty;
            }
            None => self.items.push(CartLine { product, qty }),
        }
    }

    /// Removes the line for the product; removing an absent line is a no-op.
    pub fn remove_line(&mut self, product_id: &str) {
        self.items.retain(|line| line.product.id != product_id);
    }

    pub fn amount(&self) -> Decimal {
        self.items
            .iter()
            .map(|line| line.product.price * Decimal::from(line.qty))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Customer-side view of one user: profile projection fed by events from
/// the catalog and shopping services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomerProfile {
    pub user_id: String,
    pub wishlist: Vec<ProductSnapshot>,
    pub cart: Vec<CartLine>,
    pub orders: Vec<Order>,
}

impl CustomerProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            wishlist: Vec::new(),
            cart: Vec::new(),
            orders: Vec::new(),
        }
    }

    /// Adds a product to the wishlist unless it is already present.
    /// Returns whether the wishlist changed.
    pub fn add_to_wishlist(&mut self, product: ProductSnapshot) -> bool {
        if self.wishlist.iter().any(|entry| entry.id == product.id) {
            return false;
        }
        self.wishlist.push(product);
        true
    }

    pub fn remove_from_wishlist(&mut self, product_id: &str) -> bool {
        let before = self.wishlist.len();
        self.wishlist.retain(|entry| entry.id != product_id);
        self.wishlist.len() != before
    }

    pub fn set_cart_line(&mut self, product: ProductSnapshot, qty: u32) {
        match self.cart.iter_mut().find(|line| line.product.id == product.id) {
            Some(line) => {
                line.product = product;
                line.qty = qty;
            }
            None => self.cart.push(CartLine { product, qty }),
        }
    }

    pub fn remove_cart_line(&mut self, product_id: &str) {
        self.cart.retain(|line| line.product.id != product_id);
    }

    /// Appends an order to the history unless an order with the same id was
    /// already recorded. Returns whether the history changed.
    pub fn record_order(&mut self, order: Order) -> bool {
        if self.orders.iter().any(|existing| existing.id == order.id) {
            return false;
        }
        self.orders.push(order);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn adding_same_product_to_wishlist_twice_keeps_single_entry() {
        let mut profile = CustomerProfile::new("u1");
        assert!(profile.add_to_wishlist(snapshot("p1", 300)));
        assert!(!profile.add_to_wishlist(snapshot("p1", 300)));
        assert_eq!(profile.wishlist.len(), 1);
    }

    #[test]
    fn removing_absent_wishlist_entry_is_a_noop() {
        let mut profile = CustomerProfile::new("u1");
        profile.add_to_wishlist(snapshot("p1", 300));
        assert!(!profile.remove_from_wishlist("p9"));
        assert_eq!(profile.wishlist.len(), 1);
    }

    #[test]
    fn setting_cart_line_twice_keeps_sent_quantity() {
        let mut cart = Cart::new("u1");
        cart.set_line(snapshot("p1", 300), 2);
        cart.set_line(snapshot("p1", 300), 2);
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].qty, 2);
    }

    #[test]
    fn removing_absent_cart_line_is_a_noop() {
        let mut cart = Cart::new("u1");
        cart.set_line(snapshot("p1", 300), 1);
        cart.remove_line("p9");
        assert_eq!(cart.items.len(), 1);
    }

    #[test]
    fn cart_amount_sums_price_times_quantity() {
        let mut cart = Cart::new("u1");
        cart.set_line(snapshot("p1", 300), 2);
        cart.set_line(snapshot("p2", 50), 1);
        assert_eq!(cart.amount(), Decimal::new(650, 0));
    }

    #[test]
    fn recording_same_order_twice_keeps_single_entry() {
        let mut profile = CustomerProfile::new("u1");
        let order = Order {
            id: "o1".to_string(),
            items: Vec::new(),
            amount: Decimal::new(600, 0),
            status: "received".to_string(),
            txn_id: "txn-1".to_string(),
        };
        assert!(profile.record_order(order.clone()));
        assert!(!profile.record_order(order));
        assert_eq!(profile.orders.len(), 1);
    }
}
