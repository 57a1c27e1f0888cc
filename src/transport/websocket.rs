//! WebSocket transport adapter (§4.7).
//!
//! The handshake carries the same auth policy as SSE, with the stream name
//! parsed from `?stream=`; an initial subscription is created from the
//! handshake's query parameters, and the client may additionally send
//! `{"type": "subscribe"|"unsubscribe", "stream": ..., ...}` control frames
//! to manage further subscriptions over the same connection. Auto-ping
//! fires every 30 seconds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth;
use crate::filter::{self, SubscriptionOptions};
use crate::models::UpstreamEvent;
use crate::session::Session;
use crate::state::AppState;
use crate::stream_resolver::{self, ResolvedStream, StreamParams};
use crate::transport::{stream_tuple, OutboundFrame};

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub stream: Option<String>,
    pub tag: Option<String>,
    pub list: Option<uuid::Uuid>,
    pub access_token: Option<String>,
    pub only_media: Option<String>,
}

/// Inbound control frame (§4.7). Unknown `type` values are silently
/// ignored, matching the upstream client libraries' tolerance for frames
/// they do not understand.
#[derive(Debug, Deserialize)]
struct ControlFrame {
    #[serde(rename = "type")]
    kind: String,
    stream: Option<String>,
    tag: Option<String>,
    list: Option<uuid::Uuid>,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<WsQuery>,
) -> Response {
    let mut query_map = HashMap::new();
    if let Some(t) = &q.access_token {
        query_map.insert("access_token".to_string(), t.clone());
    }
    let token = auth::extract_token(&headers, &query_map);

    // The handshake's own stream, if any, determines the scope needed to
    // authorize the connection at all; further per-stream scope checks
    // happen again inside `subscribe_one` for control-frame subscribes. A
    // streamless handshake (the client means to subscribe only via later
    // control frames) is treated like a public stream — anonymous-allowed
    // unless the federation flags force auth — so it can't be rejected for
    // a connection that hasn't named anything yet (§4.7).
    let stream_name = q.stream.clone().map(|s| compose_stream_name(&s, &q));

    let auth_required = match &stream_name {
        Some(name) if !stream_resolver::is_public_stream(name) => true,
        _ => state.config.always_require_auth(),
    };
    let required_scopes: &[&str] = if auth_required {
        stream_name
            .as_deref()
            .map(stream_resolver::required_scopes_for)
            .unwrap_or(auth::STATUS_SCOPES)
    } else {
        &[]
    };

    let ctx = match auth::resolve(&state.pool, token.as_deref(), required_scopes, auth_required).await {
        Ok(ctx) => ctx,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, ctx, stream_name, q))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    ctx: crate::models::AccountCtx,
    initial_stream: Option<String>,
    q: WsQuery,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let session = Arc::new(Session::new(
        state.bus.clone(),
        state.config.redis_url.clone(),
        state.config.redis_namespace.clone(),
    ));

    metrics::gauge!("gateway_connections_active", "transport" => "websocket").increment(1.0);

    if let Some(name) = initial_stream {
        let params = StreamParams {
            tag: q.tag.clone(),
            list: q.list,
        };
        subscribe_one(&state, &session, &ctx, &name, &params, out_tx.clone()).await;
    }

    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                msg = out_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if ws_sender.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let state_for_recv = state.clone();
    let ctx_for_recv = ctx.clone();
    let session_for_recv = Arc::clone(&session);
    let out_tx_for_recv = out_tx.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    handle_control_frame(
                        &state_for_recv,
                        &session_for_recv,
                        &ctx_for_recv,
                        &text,
                        out_tx_for_recv.clone(),
                    )
                    .await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    session.close();
    metrics::gauge!("gateway_connections_active", "transport" => "websocket").decrement(1.0);
}

async fn handle_control_frame(
    state: &AppState,
    session: &Arc<Session>,
    ctx: &crate::models::AccountCtx,
    text: &str,
    out_tx: mpsc::UnboundedSender<String>,
) {
    let Ok(frame) = serde_json::from_str::<ControlFrame>(text) else {
        return;
    };

    match frame.kind.as_str() {
        "subscribe" => {
            let Some(name) = frame.stream else { return };
            let params = StreamParams {
                tag: frame.tag,
                list: frame.list,
            };
            subscribe_one(state, session, ctx, &name, &params, out_tx).await;
        }
        "unsubscribe" => {
            let Some(name) = frame.stream else { return };
            let params = StreamParams {
                tag: frame.tag,
                list: frame.list,
            };
            // No new access is being granted here, so this derives the
            // channel ids directly rather than re-running `resolve`'s
            // authorization (the `list` ownership check in particular) —
            // a transient DB error must never strand an active subscription
            // past the point the client explicitly asked to drop it.
            match stream_resolver::channel_ids_for(ctx, &name, &params) {
                Ok(channel_ids) => {
                    let key = crate::session::channel_set_key(&channel_ids);
                    session.unsubscribe(&key);
                }
                Err(e) => {
                    tracing::debug!(error = ?e, stream = %name, "unsubscribe control frame ignored");
                }
            }
        }
        _ => {
            // Unknown type: silently ignored, per §4.7.
        }
    }
}

async fn subscribe_one(
    state: &AppState,
    session: &Arc<Session>,
    ctx: &crate::models::AccountCtx,
    stream_name: &str,
    params: &StreamParams,
    out_tx: mpsc::UnboundedSender<String>,
) {
    let resolved = match stream_resolver::resolve(&state.pool, ctx, stream_name, params).await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = ?e, stream = %stream_name, "subscribe control frame ignored");
            return;
        }
    };

    if session.is_subscribed(&resolved.channel_ids) {
        return;
    }

    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<Arc<str>>();
    session.subscribe(resolved.channel_ids.clone(), raw_tx);

    metrics::counter!("gateway_stream_subscribes_total", "stream" => stream_name.to_owned(), "transport" => "websocket")
        .increment(1);

    let pool = state.pool.clone();
    let ctx = ctx.clone();
    let param = stream_param(stream_name, params);
    let stream_name_owned = stream_name.to_owned();
    tokio::spawn(forward_loop(
        pool,
        ctx,
        resolved,
        stream_name_owned,
        param,
        raw_rx,
        out_tx,
    ));
}

async fn forward_loop(
    pool: sqlx::PgPool,
    ctx: crate::models::AccountCtx,
    resolved: ResolvedStream,
    stream_name: String,
    param: Option<String>,
    mut raw_rx: mpsc::UnboundedReceiver<Arc<str>>,
    out_tx: mpsc::UnboundedSender<String>,
) {
    let options = SubscriptionOptions {
        needs_filtering: resolved.needs_filtering,
        notification_only: resolved.notification_only,
    };

    while let Some(raw) = raw_rx.recv().await {
        let Ok(event) = serde_json::from_str::<UpstreamEvent>(&raw) else {
            continue;
        };

        let decision = filter::decide(&pool, &ctx, options, &event).await;
        if decision == filter::Decision::Drop {
            continue;
        }

        let tuple = stream_tuple(&stream_name, param.as_deref());
        let frame = OutboundFrame {
            stream: Some(tuple),
            event: &event.event,
            payload: event.payload,
        };

        let Ok(json) = serde_json::to_string(&frame) else {
            continue;
        };
        if out_tx.send(json).is_err() {
            break;
        }
    }
}

fn stream_param(stream_name: &str, params: &StreamParams) -> Option<String> {
    if stream_name.starts_with("list") {
        params.list.map(|id| id.to_string())
    } else if stream_name.starts_with("hashtag") {
        params.tag.clone()
    } else {
        None
    }
}

fn compose_stream_name(base: &str, q: &WsQuery) -> String {
    let only_media = matches!(q.only_media.as_deref(), Some("1") | Some("true"));
    if only_media && matches!(base, "public" | "public:local" | "public:remote") {
        format!("{base}:media")
    } else {
        base.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_param_extracts_list_id() {
        let id = uuid::Uuid::new_v4();
        let params = StreamParams {
            tag: None,
            list: Some(id),
        };
        assert_eq!(stream_param("list", &params), Some(id.to_string()));
    }

    #[test]
    fn stream_param_extracts_hashtag() {
        let params = StreamParams {
            tag: Some("rust".into()),
            list: None,
        };
        assert_eq!(stream_param("hashtag:local", &params), Some("rust".into()));
    }

    #[test]
    fn stream_param_is_none_for_public() {
        let params = StreamParams::default();
        assert_eq!(stream_param("public", &params), None);
    }

    #[test]
    fn compose_stream_name_appends_media() {
        let q = WsQuery {
            only_media: Some("true".into()),
            ..Default::default()
        };
        assert_eq!(compose_stream_name("public:local", &q), "public:local:media");
    }
}
