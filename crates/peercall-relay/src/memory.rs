use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    MessageHandler, PresenceAction, PresenceEvent, PresenceHandler, PresenceMember, Relay,
    RelayError, RelayMessage,
};

/// Per-message ceiling of the hosted relay this stands in for.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

struct Subscriber<H> {
    identity: String,
    handler: H,
}

struct HubState {
    max_message_bytes: usize,
    // (channel, topic) -> handlers
    subscribers: HashMap<(String, String), Vec<Subscriber<MessageHandler>>>,
    // channel -> identity -> presence data
    presence: HashMap<String, BTreeMap<String, Value>>,
    presence_subscribers: HashMap<String, Vec<Subscriber<PresenceHandler>>>,
    held: Option<VecDeque<RelayMessage>>,
    history: Vec<RelayMessage>,
}

impl Default for HubState {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            subscribers: HashMap::new(),
            presence: HashMap::new(),
            presence_subscribers: HashMap::new(),
            held: None,
            history: Vec::new(),
        }
    }
}

impl HubState {
    fn handlers_for(&self, channel: &str, topic: &str) -> Vec<MessageHandler> {
        self.subscribers
            .get(&(channel.to_string(), topic.to_string()))
            .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
            .unwrap_or_default()
    }

    fn presence_handlers_for(&self, channel: &str) -> Vec<PresenceHandler> {
        self.presence_subscribers
            .get(channel)
            .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
            .unwrap_or_default()
    }
}

/// Process-local relay hub. Cheap to clone; all clones share one hub.
///
/// Delivery is synchronous: `publish` returns after every current subscriber
/// handler ran, so per-channel order equals publish order. `hold` parks
/// messages until `deliver_held` or `release`, which lets callers force two
/// in-flight messages to cross.
#[derive(Clone, Default)]
pub struct InMemoryRelay {
    state: Arc<Mutex<HubState>>,
    // Serializes delivery so held messages and live ones never reorder.
    delivery: Arc<Mutex<()>>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_message_bytes(limit: usize) -> Self {
        let relay = Self::default();
        relay.state.lock().max_message_bytes = limit;
        relay
    }

    pub fn client(&self, identity: impl Into<String>) -> InMemoryRelayClient {
        InMemoryRelayClient {
            identity: identity.into(),
            hub: self.clone(),
        }
    }

    pub fn max_message_bytes(&self) -> usize {
        self.state.lock().max_message_bytes
    }

    /// Every message accepted by the hub, in publish order, held ones included.
    pub fn history(&self) -> Vec<RelayMessage> {
        self.state.lock().history.clone()
    }

    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    pub fn subscriber_count(&self, channel: &str, topic: &str) -> usize {
        self.state
            .lock()
            .subscribers
            .get(&(channel.to_string(), topic.to_string()))
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn hold(&self) {
        let mut state = self.state.lock();
        if state.held.is_none() {
            state.held = Some(VecDeque::new());
        }
    }

    pub fn held(&self) -> Vec<RelayMessage> {
        self.state
            .lock()
            .held
            .as_ref()
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Delivers parked messages and keeps holding new ones.
    pub fn deliver_held(&self) -> usize {
        self.flush_held(false)
    }

    /// Delivers parked messages and resumes live delivery.
    pub fn release(&self) -> usize {
        self.flush_held(true)
    }

    fn flush_held(&self, stop_holding: bool) -> usize {
        let _delivery = self.delivery.lock();
        let batch: Vec<(RelayMessage, Vec<MessageHandler>)> = {
            let mut state = self.state.lock();
            let drained: Vec<RelayMessage> = match state.held.as_mut() {
                Some(q) => q.drain(..).collect(),
                None => Vec::new(),
            };
            if stop_holding {
                state.held = None;
            }
            drained
                .into_iter()
                .map(|msg| {
                    let handlers = state.handlers_for(&msg.channel, &msg.topic);
                    (msg, handlers)
                })
                .collect()
        };
        let count = batch.len();
        for (msg, handlers) in batch {
            for handler in handlers {
                handler(msg.clone());
            }
        }
        count
    }

    fn publish_from(
        &self,
        sender: &str,
        channel: &str,
        topic: &str,
        payload: Value,
    ) -> Result<usize, RelayError> {
        validate_address(channel, topic)?;
        let size = serde_json::to_vec(&payload)
            .map_err(|e| RelayError::Encode(e.to_string()))?
            .len();
        let msg = RelayMessage {
            sender: sender.to_string(),
            channel: channel.to_string(),
            topic: topic.to_string(),
            payload,
        };

        let _delivery = self.delivery.lock();
        let handlers = {
            let mut state = self.state.lock();
            if size > state.max_message_bytes {
                return Err(RelayError::PayloadTooLarge {
                    size,
                    limit: state.max_message_bytes,
                });
            }
            state.history.push(msg.clone());
            if let Some(held) = state.held.as_mut() {
                held.push_back(msg);
                return Ok(0);
            }
            state.handlers_for(channel, topic)
        };

        tracing::trace!(sender, channel, topic, subscribers = handlers.len(), "relay publish");
        for handler in &handlers {
            handler(msg.clone());
        }
        Ok(handlers.len())
    }

    fn subscribe_as(
        &self,
        identity: &str,
        channel: &str,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<(), RelayError> {
        validate_address(channel, topic)?;
        self.state
            .lock()
            .subscribers
            .entry((channel.to_string(), topic.to_string()))
            .or_default()
            .push(Subscriber {
                identity: identity.to_string(),
                handler,
            });
        Ok(())
    }

    fn unsubscribe_as(&self, identity: &str, channel: &str, topic: &str) -> bool {
        let mut state = self.state.lock();
        let key = (channel.to_string(), topic.to_string());
        let Some(subs) = state.subscribers.get_mut(&key) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.identity != identity);
        let removed = subs.len() != before;
        if subs.is_empty() {
            state.subscribers.remove(&key);
        }
        removed
    }

    fn set_presence(
        &self,
        identity: &str,
        channel: &str,
        data: Option<Value>,
    ) -> Result<(), RelayError> {
        validate_address(channel, "presence")?;
        let _delivery = self.delivery.lock();
        let (event, handlers) = {
            let mut state = self.state.lock();
            let members = state.presence.entry(channel.to_string()).or_default();
            let event = match data {
                Some(data) => {
                    let action = if members.contains_key(identity) {
                        PresenceAction::Update
                    } else {
                        PresenceAction::Enter
                    };
                    members.insert(identity.to_string(), data.clone());
                    Some(PresenceEvent {
                        channel: channel.to_string(),
                        action,
                        member: PresenceMember {
                            identity: identity.to_string(),
                            data,
                        },
                    })
                }
                None => members.remove(identity).map(|data| PresenceEvent {
                    channel: channel.to_string(),
                    action: PresenceAction::Leave,
                    member: PresenceMember {
                        identity: identity.to_string(),
                        data,
                    },
                }),
            };
            (event, state.presence_handlers_for(channel))
        };

        if let Some(event) = event {
            for handler in &handlers {
                handler(event.clone());
            }
        }
        Ok(())
    }
}

fn validate_address(channel: &str, topic: &str) -> Result<(), RelayError> {
    if channel.trim().is_empty() {
        return Err(RelayError::InvalidAddress("channel is empty".to_string()));
    }
    if topic.trim().is_empty() {
        return Err(RelayError::InvalidAddress("topic is empty".to_string()));
    }
    Ok(())
}

/// Identity-bound view of an [`InMemoryRelay`].
#[derive(Clone)]
pub struct InMemoryRelayClient {
    identity: String,
    hub: InMemoryRelay,
}

impl InMemoryRelayClient {
    pub fn hub(&self) -> &InMemoryRelay {
        &self.hub
    }
}

#[async_trait]
impl Relay for InMemoryRelayClient {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn publish(&self, channel: &str, topic: &str, payload: Value) -> Result<(), RelayError> {
        self.hub
            .publish_from(&self.identity, channel, topic, payload)
            .map(|_| ())
    }

    fn subscribe(
        &self,
        channel: &str,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<(), RelayError> {
        self.hub.subscribe_as(&self.identity, channel, topic, handler)
    }

    fn unsubscribe(&self, channel: &str, topic: &str) -> bool {
        self.hub.unsubscribe_as(&self.identity, channel, topic)
    }

    async fn enter_presence(&self, channel: &str, data: Value) -> Result<(), RelayError> {
        self.hub.set_presence(&self.identity, channel, Some(data))
    }

    async fn leave_presence(&self, channel: &str) -> Result<(), RelayError> {
        self.hub.set_presence(&self.identity, channel, None)
    }

    fn presence_members(&self, channel: &str) -> Vec<PresenceMember> {
        self.hub
            .state
            .lock()
            .presence
            .get(channel)
            .map(|members| {
                members
                    .iter()
                    .map(|(identity, data)| PresenceMember {
                        identity: identity.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn subscribe_presence(
        &self,
        channel: &str,
        handler: PresenceHandler,
    ) -> Result<(), RelayError> {
        validate_address(channel, "presence")?;
        self.hub
            .state
            .lock()
            .presence_subscribers
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                identity: self.identity.clone(),
                handler,
            });
        Ok(())
    }

    fn unsubscribe_presence(&self, channel: &str) -> bool {
        let mut state = self.hub.state.lock();
        let Some(subs) = state.presence_subscribers.get_mut(channel) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.identity != self.identity);
        subs.len() != before
    }
}
