//! Session Manager (§4.8).
//!
//! Tracks, per connection, which channel sets it is currently listening on.
//! A channel set is keyed by its sorted-and-joined channel ids — a stable
//! representation that makes `subscribe` idempotent when the same stream is
//! requested twice (e.g. an auto-subscribed WS handshake stream followed by
//! an identical control-frame subscribe). On close every entry is torn down:
//! every channel unsubscribed from the Upstream Bus Adapter by the listener
//! id actually used to subscribe it, and every heartbeat stopped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::pubsub::{heartbeat::HeartbeatHandle, ListenerId, UpstreamBus};

struct Subscription {
    channel_ids: Vec<String>,
    listener_ids: Vec<ListenerId>,
    heartbeat: HeartbeatHandle,
}

/// One session's view of its own subscriptions. SSE sessions hold exactly
/// one entry; WebSocket sessions may hold many, one per distinct stream
/// request.
pub struct Session {
    bus: UpstreamBus,
    redis_url: String,
    redis_namespace: Option<String>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

/// Stable key for a channel set: sorted, then joined. Two requests for the
/// same set of channels — regardless of the order they were resolved in —
/// collide on this key, which is what makes `subscribe` idempotent.
pub fn channel_set_key(channel_ids: &[String]) -> String {
    let mut sorted = channel_ids.to_vec();
    sorted.sort();
    sorted.join("\u{1}")
}

impl Session {
    pub fn new(bus: UpstreamBus, redis_url: String, redis_namespace: Option<String>) -> Self {
        Session {
            bus,
            redis_url,
            redis_namespace,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to every channel in `channel_ids`, delivering raw payloads
    /// on `tx`. A no-op if this exact channel set is already subscribed.
    pub fn subscribe(&self, channel_ids: Vec<String>, tx: mpsc::UnboundedSender<Arc<str>>) {
        let key = channel_set_key(&channel_ids);

        let mut subs = self.subscriptions.lock().expect("session lock poisoned");
        if subs.contains_key(&key) {
            return;
        }

        let listener_ids: Vec<ListenerId> = channel_ids
            .iter()
            .map(|channel| self.bus.subscribe(channel, tx.clone()))
            .collect();

        let heartbeat = crate::pubsub::heartbeat::start(
            self.redis_url.clone(),
            self.redis_namespace.clone(),
            channel_ids.clone(),
        );

        subs.insert(
            key,
            Subscription {
                channel_ids,
                listener_ids,
                heartbeat,
            },
        );
    }

    /// Tears down a single channel set by its key, if present.
    pub fn unsubscribe(&self, key: &str) {
        let mut subs = self.subscriptions.lock().expect("session lock poisoned");
        if let Some(sub) = subs.remove(key) {
            self.teardown(sub);
        }
    }

    /// Whether `channel_ids` is already an active subscription (by its
    /// stable key).
    pub fn is_subscribed(&self, channel_ids: &[String]) -> bool {
        let key = channel_set_key(channel_ids);
        self.subscriptions
            .lock()
            .expect("session lock poisoned")
            .contains_key(&key)
    }

    /// Tears down every subscription this session holds. Called on close or
    /// any terminal transport error.
    pub fn close(&self) {
        let mut subs = self.subscriptions.lock().expect("session lock poisoned");
        for (_, sub) in subs.drain() {
            self.teardown(sub);
        }
    }

    fn teardown(&self, sub: Subscription) {
        for (channel, id) in sub.channel_ids.iter().zip(sub.listener_ids.iter()) {
            self.bus.unsubscribe(channel, *id);
        }
        sub.heartbeat.stop();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
