//! Subscription Heartbeat (§4.5).
//!
//! Keeps `subscribed:{channel_id}` alive in the key-value store for as long
//! as a session is actively listening on that channel, so out-of-band
//! tooling (e.g. a delivery worker deciding whether anyone is listening
//! before it bothers publishing) can see which channels currently have
//! subscribers. The first write happens immediately on subscribe rather
//! than waiting a full interval.

use std::time::Duration;

use redis::AsyncCommands;
use tokio::task::JoinHandle;

const INTERVAL: Duration = Duration::from_secs(360);
const TTL_SECS: u64 = 1080; // 3 * INTERVAL

/// Handle returned by [`start`]. Dropping it does not stop the task —
/// call [`HeartbeatHandle::stop`] explicitly, matching the Session
/// Manager's "stop all heartbeats on teardown" requirement (§4.8).
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Starts the periodic marker writer for `channel_ids`. Each channel id is
/// bare (unprefixed) — namespacing, if any, is applied the same way the
/// Upstream Bus Adapter applies it, via `namespace`.
pub fn start(
    redis_url: String,
    namespace: Option<String>,
    channel_ids: Vec<String>,
) -> HeartbeatHandle {
    let task = tokio::spawn(async move {
        let client = match redis::Client::open(redis_url.as_str()) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = ?e, "heartbeat: failed to open redis client");
                return;
            }
        };
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = ?e, "heartbeat: failed to connect");
                return;
            }
        };

        write_all(&mut conn, &namespace, &channel_ids).await;

        let mut interval = tokio::time::interval(INTERVAL);
        interval.tick().await; // consume the immediate first tick; we already wrote above

        loop {
            interval.tick().await;
            write_all(&mut conn, &namespace, &channel_ids).await;
        }
    });

    HeartbeatHandle { task }
}

async fn write_all<C: AsyncCommands>(conn: &mut C, namespace: &Option<String>, channel_ids: &[String]) {
    for channel_id in channel_ids {
        let key = match namespace {
            Some(ns) => format!("{ns}:subscribed:{channel_id}"),
            None => format!("subscribed:{channel_id}"),
        };
        if let Err(e) = conn.set_ex::<_, _, ()>(&key, "1", TTL_SECS).await {
            tracing::warn!(error = ?e, %key, "heartbeat write failed");
        }
    }
}
