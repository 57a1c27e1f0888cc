//! Upstream Bus Adapter (§4.4).
//!
//! Owns the single physical connection to the upstream pub/sub system and
//! multiplexes it across however many local listeners are interested in a
//! given channel. The local subscription table is refcounted: the adapter
//! issues a physical `SUBSCRIBE` only on a channel's first listener and a
//! physical `UNSUBSCRIBE` only when its last listener leaves (I1).
//!
//! Namespace prefixing happens nowhere else — every other component deals
//! in bare channel ids; this module alone holds the configured namespace
//! and applies it only around the physical subscribe/unsubscribe/dispatch
//! boundary.

pub mod heartbeat;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use redis::aio::PubSub;
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};

pub type ListenerId = u64;

enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

type Listeners = Vec<(ListenerId, mpsc::UnboundedSender<Arc<str>>)>;

struct Inner {
    table: Mutex<HashMap<String, Listeners>>,
    next_id: AtomicU64,
    cmd_tx: mpsc::UnboundedSender<Command>,
    namespace: Option<String>,
}

/// Handle to the upstream bus. Cheap to clone — every clone shares the same
/// subscription table and background connection task.
#[derive(Clone)]
pub struct UpstreamBus {
    inner: Arc<Inner>,
}

impl UpstreamBus {
    /// Opens the physical connection and spawns the task that owns it.
    pub async fn connect(redis_url: &str, namespace: Option<String>) -> AppResult<Self> {
        let client = redis::Client::open(redis_url).map_err(AppError::from)?;
        let pubsub = client.get_async_pubsub().await.map_err(AppError::from)?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            table: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cmd_tx,
            namespace,
        });

        tokio::spawn(run_loop(pubsub, cmd_rx, Arc::clone(&inner)));

        Ok(UpstreamBus { inner })
    }

    /// Test-only constructor that skips the real connection entirely. The
    /// caller owns `cmd_rx` and can assert on which commands the refcounting
    /// logic issues (R1/R2) without touching Redis.
    #[cfg(test)]
    fn with_command_channel(
        cmd_tx: mpsc::UnboundedSender<Command>,
        namespace: Option<String>,
    ) -> Self {
        UpstreamBus {
            inner: Arc::new(Inner {
                table: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                cmd_tx,
                namespace,
            }),
        }
    }

    /// Registers `tx` as a listener on `channel` (a bare, unprefixed channel
    /// id) and returns a [`ListenerId`] for later removal. Issues a physical
    /// `SUBSCRIBE` iff this is the channel's first listener.
    pub fn subscribe(&self, channel: &str, tx: mpsc::UnboundedSender<Arc<str>>) -> ListenerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut table = self.inner.table.lock().expect("subscription table poisoned");
        let entry = table.entry(channel.to_owned()).or_default();
        let first = entry.is_empty();
        entry.push((id, tx));
        drop(table);

        if first {
            let _ = self.inner.cmd_tx.send(Command::Subscribe(channel.to_owned()));
        }

        id
    }

    /// Removes listener `id` from `channel`. Issues a physical
    /// `UNSUBSCRIBE` iff this was the channel's last listener.
    pub fn unsubscribe(&self, channel: &str, id: ListenerId) {
        let mut table = self.inner.table.lock().expect("subscription table poisoned");
        let Some(entry) = table.get_mut(channel) else {
            return;
        };
        entry.retain(|(listener_id, _)| *listener_id != id);
        let now_empty = entry.is_empty();
        if now_empty {
            table.remove(channel);
        }
        drop(table);

        if now_empty {
            let _ = self
                .inner
                .cmd_tx
                .send(Command::Unsubscribe(channel.to_owned()));
        }
    }

    /// Fans a raw payload out to every current listener on `channel`. A
    /// listener whose receiver has gone away is a silent no-op here — its
    /// owning session is responsible for calling [`Self::unsubscribe`], and
    /// one dead listener must never block delivery to its siblings.
    fn dispatch(&self, channel: &str, raw: Arc<str>) {
        let table = self.inner.table.lock().expect("subscription table poisoned");
        let Some(listeners) = table.get(channel) else {
            return;
        };
        let snapshot = listeners.clone();
        drop(table);

        for (_, tx) in snapshot {
            let _ = tx.send(Arc::clone(&raw));
        }
    }
}

/// The single task that owns the physical pub/sub connection. Alternates
/// between draining subscribe/unsubscribe commands and reading the next
/// published message, never holding both borrows at once: `on_message()`
/// borrows `&mut self` for as long as its stream is alive, so each read
/// re-acquires the stream fresh rather than holding it open across loop
/// iterations — otherwise it would conflict with the `&mut self` the
/// command arm needs for `subscribe`/`unsubscribe`.
async fn run_loop(
    mut pubsub: PubSub,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    inner: Arc<Inner>,
) {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Subscribe(channel)) => {
                        let physical = namespaced(&inner.namespace, &channel);
                        if let Err(e) = pubsub.subscribe(&physical).await {
                            tracing::warn!(error = ?e, channel = %channel, "upstream subscribe failed");
                        }
                    }
                    Some(Command::Unsubscribe(channel)) => {
                        let physical = namespaced(&inner.namespace, &channel);
                        if let Err(e) = pubsub.unsubscribe(&physical).await {
                            tracing::warn!(error = ?e, channel = %channel, "upstream unsubscribe failed");
                        }
                    }
                    None => return,
                }
            }
            msg = next_message(&mut pubsub) => {
                let Some((physical_channel, payload)) = msg else {
                    tracing::warn!("upstream pub/sub stream ended");
                    return;
                };
                let channel = strip_namespace(&inner.namespace, &physical_channel);
                let bus = UpstreamBus { inner: Arc::clone(&inner) };
                bus.dispatch(channel, Arc::from(payload));
            }
        }
    }
}

async fn next_message(pubsub: &mut PubSub) -> Option<(String, String)> {
    let msg = pubsub.on_message().next().await?;
    let channel = msg.get_channel_name().to_owned();
    let payload: String = msg.get_payload().ok()?;
    Some((channel, payload))
}

fn namespaced(namespace: &Option<String>, channel: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}:{channel}"),
        None => channel.to_owned(),
    }
}

fn strip_namespace<'a>(namespace: &Option<String>, physical: &'a str) -> &'a str {
    match namespace {
        Some(ns) => physical
            .strip_prefix(ns.as_str())
            .and_then(|s| s.strip_prefix(':'))
            .unwrap_or(physical),
        None => physical,
    }
}
