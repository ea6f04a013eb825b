use std::fmt;

use serde::{Deserialize, Serialize};

use storefront_core::{Order, ProductSnapshot};

use crate::error::ValidationError;

/// Closed enumeration of the event kinds that may cross service boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AddToWishlist,
    RemoveFromWishlist,
    AddToCart,
    RemoveFromCart,
    CreateOrder,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::AddToWishlist,
        EventKind::RemoveFromWishlist,
        EventKind::AddToCart,
        EventKind::RemoveFromCart,
        EventKind::CreateOrder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::AddToWishlist => "ADD_TO_WISHLIST",
            EventKind::RemoveFromWishlist => "REMOVE_FROM_WISHLIST",
            EventKind::AddToCart => "ADD_TO_CART",
            EventKind::RemoveFromCart => "REMOVE_FROM_CART",
            EventKind::CreateOrder => "CREATE_ORDER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WishlistChange {
    pub user_id: String,
    pub product: ProductSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CartChange {
    pub user_id: String,
    pub product: ProductSnapshot,
    pub qty: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaced {
    pub user_id: String,
    pub order: Order,
}

/// Wire unit exchanged between services: `{"event": "...", "data": {...}}`.
/// Unknown fields inside `data` are ignored on receipt; missing required
/// fields reject the whole envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum Envelope {
    #[serde(rename = "ADD_TO_WISHLIST")]
    AddToWishlist(WishlistChange),
    #[serde(rename = "REMOVE_FROM_WISHLIST")]
    RemoveFromWishlist(WishlistChange),
    #[serde(rename = "ADD_TO_CART")]
    AddToCart(CartChange),
    #[serde(rename = "REMOVE_FROM_CART")]
    RemoveFromCart(CartChange),
    #[serde(rename = "CREATE_ORDER")]
    CreateOrder(OrderPlaced),
}

impl Envelope {
    pub fn kind(&self) -> EventKind {
        match self {
            Envelope::AddToWishlist(_) => EventKind::AddToWishlist,
            Envelope::RemoveFromWishlist(_) => EventKind::RemoveFromWishlist,
            Envelope::AddToCart(_) => EventKind::AddToCart,
            Envelope::RemoveFromCart(_) => EventKind::RemoveFromCart,
            Envelope::CreateOrder(_) => EventKind::CreateOrder,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ValidationError> {
        serde_json::to_vec(self).map_err(ValidationError::Encode)
    }

    /// Decodes and validates a received envelope. The event kind is checked
    /// against the closed enumeration before the payload shape, so an
    /// unrecognized kind and a malformed payload surface as distinct errors.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(ValidationError::Malformed)?;
        let event = value
            .get("event")
            .and_then(serde_json::Value::as_str)
            .ok_or(ValidationError::MissingEvent)?;
        let kind = EventKind::parse(event)
            .ok_or_else(|| ValidationError::UnknownEvent(event.to_string()))?;
        serde_json::from_value(value).map_err(|source| ValidationError::Payload { kind, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn product() -> ProductSnapshot {
        ProductSnapshot {
            id: "p1".to_string(),
            name: "olive oil".to_string(),
            desc: String::new(),
            category: String::new(),
            unit: 1,
            price: Decimal::new(300, 0),
            banner: String::new(),
        }
    }

    #[test]
    fn cart_event_uses_the_wire_shape() {
        let envelope = Envelope::AddToCart(CartChange {
            user_id: "u1".to_string(),
            product: product(),
            qty: 2,
        });

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "ADD_TO_CART",
                "data": {
                    "userId": "u1",
                    "product": {
                        "id": "p1",
                        "name": "olive oil",
                        "desc": "",
                        "type": "",
                        "unit": 1,
                        "price": "300",
                        "banner": ""
                    },
                    "qty": 2
                }
            })
        );
    }

    #[test]
    fn envelope_round_trips_through_bytes() {
        let envelope = Envelope::AddToWishlist(WishlistChange {
            user_id: "u1".to_string(),
            product: product(),
        });

        let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.kind(), EventKind::AddToWishlist);
    }

    #[test]
    fn minimal_product_snapshot_is_accepted() {
        let bytes = json!({
            "event": "ADD_TO_CART",
            "data": {"userId": "u1", "product": {"id": "p1", "price": 300}, "qty": 2}
        })
        .to_string();

        let envelope = Envelope::from_bytes(bytes.as_bytes()).unwrap();
        let Envelope::AddToCart(change) = envelope else {
            panic!("expected a cart change");
        };
        assert_eq!(change.qty, 2);
        assert_eq!(change.product.price, Decimal::new(300, 0));
    }

    #[test]
    fn unrecognized_event_kind_is_rejected() {
        let bytes = json!({"event": "EMPTY_CART", "data": {"userId": "u1"}}).to_string();
        let err = Envelope::from_bytes(bytes.as_bytes()).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownEvent(kind) if kind == "EMPTY_CART"));
    }

    #[test]
    fn missing_event_field_is_rejected() {
        let bytes = json!({"data": {"userId": "u1"}}).to_string();
        let err = Envelope::from_bytes(bytes.as_bytes()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingEvent));
    }

    #[test]
    fn missing_user_id_is_rejected() {
        let bytes = json!({
            "event": "ADD_TO_CART",
            "data": {"product": {"id": "p1", "price": 300}, "qty": 2}
        })
        .to_string();

        let err = Envelope::from_bytes(bytes.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Payload { kind: EventKind::AddToCart, .. }
        ));
    }

    #[test]
    fn missing_qty_is_rejected() {
        let bytes = json!({
            "event": "ADD_TO_CART",
            "data": {"userId": "u1", "product": {"id": "p1", "price": 300}}
        })
        .to_string();

        assert!(Envelope::from_bytes(bytes.as_bytes()).is_err());
    }

    #[test]
    fn unknown_extra_fields_are_ignored() {
        let bytes = json!({
            "event": "REMOVE_FROM_WISHLIST",
            "data": {
                "userId": "u1",
                "product": {"id": "p1", "price": 300, "ribbon": "new"},
                "reason": "price drop"
            }
        })
        .to_string();

        let envelope = Envelope::from_bytes(bytes.as_bytes()).unwrap();
        assert_eq!(envelope.kind(), EventKind::RemoveFromWishlist);
    }

    #[test]
    fn body_that_is_not_json_is_rejected() {
        let err = Envelope::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("CHECKOUT"), None);
    }
}
