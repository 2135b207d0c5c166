//! Bridge façade
//!
//! Front-ends talk to [`ChatBridge`] only. Sends are validated by a
//! [`SendPipeline`] before any I/O, delivered through the message manager
//! and, with auto-reply on, answered through the model router.

pub mod errors;
pub mod middleware;
pub mod service;

pub use errors::BridgeError;
pub use middleware::{
    feature_gate_middleware, logging_middleware, normalization_middleware, MiddlewareFn,
    MiddlewareResult, OutgoingMessage, SendContext, SendPipeline,
};
pub use service::{ChatBridge, ChatBridgeBuilder, SendReport};
