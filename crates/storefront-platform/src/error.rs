use thiserror::Error;

use crate::envelope::EventKind;

/// Publish-side failures. The local write that triggered the publish stays
/// the source of truth; callers log these and keep serving.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker rejected or dropped the publish: {0}")]
    Broker(#[source] lapin::Error),
    #[error("broker did not confirm the publish")]
    Unconfirmed,
    #[error("target service name is empty")]
    EmptyTarget,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Encode(#[from] ValidationError),
}

/// Receive-side envelope rejections. These can never become valid through
/// redelivery, so the dispatcher dead-letters them without retry.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("envelope is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("envelope has no event field")]
    MissingEvent,
    #[error("unrecognized event kind `{0}`")]
    UnknownEvent(String),
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("envelope could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Domain handler failure; retried by the dispatcher up to its attempt
/// bound, then dead-lettered.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct HandlerError(#[from] anyhow::Error);

impl HandlerError {
    pub fn message(message: impl Into<String>) -> Self {
        Self(anyhow::anyhow!(message.into()))
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("broker unreachable after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: lapin::Error,
    },
    #[error("broker channel failure: {0}")]
    Channel(#[from] lapin::Error),
    #[error("broker closed the delivery stream")]
    StreamClosed,
}
