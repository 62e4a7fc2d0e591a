//! Calculation requests arrive as JSON message files

/// Typed calculation request and its checks
pub mod job;

/// Read, validate and deserialise a message file
pub mod message;

/// Embedded JSON schema for messages
pub mod schema;

pub use job::{JobRequest, Resources};
pub use message::{Message, MessageError};
