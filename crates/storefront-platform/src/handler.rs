use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::{Envelope, EventKind};
use crate::error::HandlerError;

/// Capability implemented by domain code that applies an event to local
/// state. Applying the same envelope twice must leave the state identical
/// to applying it once; the transport only guarantees at-least-once
/// delivery.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn applies(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn on(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Event-kind to handler mapping owned by a service. Built once at process
/// start and immutable afterwards.
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, kind: EventKind) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn applies(&self, _envelope: &Envelope) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn lookup_only_finds_registered_kinds() {
        let registry = HandlerRegistry::builder()
            .on(EventKind::AddToCart, Arc::new(NoopHandler))
            .build();

        assert!(registry.get(EventKind::AddToCart).is_some());
        assert!(registry.get(EventKind::CreateOrder).is_none());
    }
}
