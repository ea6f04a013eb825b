pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod publisher;

pub use broker::BrokerClient;
pub use config::ServiceConfig;
pub use dispatcher::{Dispatcher, DispatcherState};
pub use envelope::{CartChange, Envelope, EventKind, OrderPlaced, WishlistChange};
pub use error::{ConnectionError, HandlerError, TransportError, ValidationError};
pub use handler::{EventHandler, HandlerRegistry, HandlerRegistryBuilder};
pub use publisher::Publisher;
