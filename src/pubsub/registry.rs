//! Subscription registry.
//!
//! Every connection owns a bounded `mpsc` queue of outgoing frames. The
//! registry maps channels and patterns to those queues; publishing walks the
//! matching subscribers and hands each one a copy of the message with
//! `try_send`, so a slow subscriber can never stall the publisher. When a
//! subscriber's queue is full the message is dropped for that subscriber
//! only.

use crate::protocol::Frame;
use crate::pubsub::pattern::Pattern;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Identifies a connection inside the registry.
pub type ClientId = u64;

type Subscribers = HashMap<ClientId, mpsc::Sender<Frame>>;

#[derive(Debug, Default)]
struct ClientSubscriptions {
    channels: HashSet<Bytes>,
    patterns: HashSet<Pattern>,
}

impl ClientSubscriptions {
    fn count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

#[derive(Debug, Default)]
struct Registry {
    channels: HashMap<Bytes, Subscribers>,
    patterns: HashMap<Pattern, Subscribers>,
    clients: HashMap<ClientId, ClientSubscriptions>,
}

/// Channel and pattern subscriptions for the whole server.
#[derive(Debug, Default)]
pub struct PubSub {
    inner: RwLock<Registry>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `client` to an exact channel name.
    ///
    /// Returns the number of subscriptions the client holds afterwards.
    /// Subscribing twice to the same channel is a no-op.
    pub fn subscribe(&self, client: ClientId, channel: Bytes, outbox: &mpsc::Sender<Frame>) -> usize {
        let mut registry = self.inner.write();
        registry
            .channels
            .entry(channel.clone())
            .or_default()
            .insert(client, outbox.clone());

        let subscriptions = registry.clients.entry(client).or_default();
        subscriptions.channels.insert(channel);
        subscriptions.count()
    }

    /// Subscribes `client` to every channel matching a glob pattern.
    pub fn psubscribe(&self, client: ClientId, pattern: Pattern, outbox: &mpsc::Sender<Frame>) -> usize {
        let mut registry = self.inner.write();
        registry
            .patterns
            .entry(pattern.clone())
            .or_default()
            .insert(client, outbox.clone());

        let subscriptions = registry.clients.entry(client).or_default();
        subscriptions.patterns.insert(pattern);
        subscriptions.count()
    }

    /// Delivers `payload` to every subscriber of `channel`.
    ///
    /// Exact-channel subscribers get `[message, channel, payload]`; pattern
    /// subscribers get `[pmessage, pattern, channel, payload]`. Returns how
    /// many deliveries were queued. Never blocks.
    pub fn publish(&self, channel: &Bytes, payload: &Bytes) -> usize {
        let registry = self.inner.read();
        let mut delivered = 0;

        if let Some(subscribers) = registry.channels.get(channel) {
            let message = Frame::array(vec![
                Frame::bulk("message"),
                Frame::Bulk(channel.clone()),
                Frame::Bulk(payload.clone()),
            ]);
            delivered += deliver(subscribers, &message);
        }

        for (pattern, subscribers) in &registry.patterns {
            if !pattern.matches(channel) {
                continue;
            }
            let message = Frame::array(vec![
                Frame::bulk("pmessage"),
                Frame::Bulk(pattern.as_bytes().clone()),
                Frame::Bulk(channel.clone()),
                Frame::Bulk(payload.clone()),
            ]);
            delivered += deliver(subscribers, &message);
        }

        delivered
    }

    /// Drops every subscription held by `client`.
    pub fn remove_client(&self, client: ClientId) {
        let mut registry = self.inner.write();
        let Some(subscriptions) = registry.clients.remove(&client) else {
            return;
        };

        for channel in subscriptions.channels {
            if let Some(subscribers) = registry.channels.get_mut(&channel) {
                subscribers.remove(&client);
                if subscribers.is_empty() {
                    registry.channels.remove(&channel);
                }
            }
        }
        for pattern in subscriptions.patterns {
            if let Some(subscribers) = registry.patterns.get_mut(&pattern) {
                subscribers.remove(&client);
                if subscribers.is_empty() {
                    registry.patterns.remove(&pattern);
                }
            }
        }

        debug!(client = client, "Removed subscriptions");
    }

    /// Number of subscriptions `client` holds.
    pub fn subscription_count(&self, client: ClientId) -> usize {
        self.inner
            .read()
            .clients
            .get(&client)
            .map_or(0, ClientSubscriptions::count)
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.inner.read().channels.len()
    }

    /// Number of patterns with at least one subscriber.
    pub fn pattern_count(&self) -> usize {
        self.inner.read().patterns.len()
    }
}

fn deliver(subscribers: &Subscribers, message: &Frame) -> usize {
    let mut delivered = 0;
    for (client, outbox) in subscribers {
        match outbox.try_send(message.clone()) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                warn!(client = *client, "Subscriber queue full, dropping message");
            }
            // The connection is on its way out; it unregisters itself.
            Err(TrySendError::Closed(_)) => {}
        }
    }
    delivered
}
