//! # Bus Errors
//!
//! `BusError` is what `publish` returns and what failure callbacks receive.
//! `HandlerError` is what handlers themselves return.

use crate::events::EventKind;
use crate::handlers::HandlerId;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The event carried no payload and validation is enabled.
    #[error("Null payload rejected for {0} event")]
    NullPayload(EventKind),

    /// A synchronous handler returned an error or panicked.
    #[error("Handler {handler_id} failed on {kind}: {message}")]
    HandlerInvocation {
        kind: EventKind,
        handler_id: HandlerId,
        message: String,
    },

    /// An async handler exceeded its timeout.
    #[error("Async handler {handler_id} on {kind} timed out after {timeout:?}")]
    AsyncHandlerTimeout {
        kind: EventKind,
        handler_id: HandlerId,
        timeout: Duration,
    },

    /// An async handler completed with an error or panicked.
    #[error("Async handler {handler_id} failed on {kind}: {message}")]
    AsyncHandlerFailed {
        kind: EventKind,
        handler_id: HandlerId,
        message: String,
    },
}

impl BusError {
    /// Short label used for metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NullPayload(_) => "null_payload",
            Self::HandlerInvocation { .. } => "error",
            Self::AsyncHandlerTimeout { .. } => "timeout",
            Self::AsyncHandlerFailed { .. } => "async_error",
        }
    }
}

/// Error returned by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("Handler observed cancellation")]
    Cancelled,
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
