//! Identity-addressed publish/subscribe relay used as the signaling transport.
//!
//! Every participant owns one inbound channel named after its relay identity.
//! Peers publish `(topic, payload)` pairs onto the remote participant's
//! channel; the relay stamps the publishing identity as `sender`, so handlers
//! can trust it for anti-spoofing checks.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use memory::{InMemoryRelay, InMemoryRelayClient, DEFAULT_MAX_MESSAGE_BYTES};

#[derive(Debug, Clone, PartialEq)]
pub struct RelayMessage {
    /// Identity of the publishing client, supplied by the relay.
    pub sender: String,
    pub channel: String,
    pub topic: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceMember {
    pub identity: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    Enter,
    Update,
    Leave,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEvent {
    pub channel: String,
    pub action: PresenceAction,
    pub member: PresenceMember,
}

/// Handlers run on the publisher's thread and must not block or call back
/// into the relay.
pub type MessageHandler = Arc<dyn Fn(RelayMessage) + Send + Sync>;
pub type PresenceHandler = Arc<dyn Fn(PresenceEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("relay connection closed")]
    Closed,
    #[error("payload of {size} bytes exceeds relay limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("invalid relay address: {0}")]
    InvalidAddress(String),
    #[error("payload encoding failed: {0}")]
    Encode(String),
}

#[async_trait]
pub trait Relay: Send + Sync {
    /// Identity this client publishes as.
    fn identity(&self) -> &str;

    async fn publish(&self, channel: &str, topic: &str, payload: Value) -> Result<(), RelayError>;

    fn subscribe(&self, channel: &str, topic: &str, handler: MessageHandler)
        -> Result<(), RelayError>;

    /// Removes this client's handlers for `topic` on `channel`. Returns whether
    /// anything was removed; calling it again is a no-op.
    fn unsubscribe(&self, channel: &str, topic: &str) -> bool;

    async fn enter_presence(&self, channel: &str, data: Value) -> Result<(), RelayError>;

    async fn leave_presence(&self, channel: &str) -> Result<(), RelayError>;

    fn presence_members(&self, channel: &str) -> Vec<PresenceMember>;

    fn subscribe_presence(&self, channel: &str, handler: PresenceHandler)
        -> Result<(), RelayError>;

    fn unsubscribe_presence(&self, channel: &str) -> bool;
}
