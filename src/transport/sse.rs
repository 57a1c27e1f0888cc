//! SSE transport adapter (§4.7, §6).
//!
//! Framing is hand-rolled rather than built on `axum::response::sse::Sse`
//! because the wire format is specified down to the byte: a bare `:)\n`
//! priming comment, `:thump\n` heartbeats every 15 seconds, and
//! `event: <E>\ndata: <payload>\n\n` per delivered message — none of which
//! match the `Event`/`KeepAlive` builders' own conventions closely enough
//! to reuse them. The decoupling pattern (background task writes frames
//! into an mpsc, the mpsc is bridged into the response body via
//! `stream::unfold`) is the same one the ecosystem uses for SSE over a
//! pub/sub source.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::auth;
use crate::error::AppError;
use crate::filter::{self, SubscriptionOptions};
use crate::models::UpstreamEvent;
use crate::session::Session;
use crate::state::AppState;
use crate::stream_resolver::{self, StreamParams};

const HEARTBEAT: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Clone, Deserialize)]
pub struct SseQuery {
    pub access_token: Option<String>,
    pub only_media: Option<String>,
    pub tag: Option<String>,
    pub list: Option<uuid::Uuid>,
    /// Only consulted by [`handle_root`], the `/api/v1/streaming` catch-all
    /// alias — every other path fixes its stream name from the route itself.
    pub stream: Option<String>,
}

impl SseQuery {
    fn only_media(&self) -> bool {
        matches!(self.only_media.as_deref(), Some("1") | Some("true"))
    }
}

/// `GET /api/v1/streaming/{stream_name}` for every non-list, non-user stream
/// path; `stream_name` is composed by the caller (e.g. `public`, `hashtag`,
/// `direct`) from the URL path, with `:media` appended per `only_media`.
pub async fn handle(
    state: State<AppState>,
    headers: HeaderMap,
    query: Query<SseQuery>,
    base_stream_name: &str,
) -> Response {
    let State(state) = state;
    let Query(q) = query;

    let stream_name = compose_stream_name(base_stream_name, &q);

    let mut query_map = std::collections::HashMap::new();
    if let Some(t) = &q.access_token {
        query_map.insert("access_token".to_string(), t.clone());
    }
    let token = auth::extract_token(&headers, &query_map);

    // Public (and hashtag) streams only require auth when the federation
    // flags force it; every other stream always requires it. The needed
    // scope set is only meaningful when auth is actually required — a
    // public stream reachable anonymously must not reject a resolved token
    // for lacking `read`/`read:statuses`, since the token is only there to
    // personalize filtering (§4.1).
    let auth_required = if stream_resolver::is_public_stream(&stream_name) {
        state.config.always_require_auth()
    } else {
        true
    };
    let required_scopes: &[&str] = if auth_required {
        stream_resolver::required_scopes_for(&stream_name)
    } else {
        &[]
    };

    let ctx = match auth::resolve(&state.pool, token.as_deref(), required_scopes, auth_required).await {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };

    let params = StreamParams {
        tag: q.tag.clone(),
        list: q.list,
    };

    let resolved = match stream_resolver::resolve(&state.pool, &ctx, &stream_name, &params).await {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let (frame_tx, frame_rx) = mpsc::channel::<Result<Bytes, Infallible>>(64);
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Arc<str>>();

    let session = Arc::new(Session::new(
        state.bus.clone(),
        state.config.redis_url.clone(),
        state.config.redis_namespace.clone(),
    ));
    session.subscribe(resolved.channel_ids.clone(), raw_tx);

    metrics::counter!("gateway_stream_subscribes_total", "stream" => stream_name.clone(), "transport" => "sse")
        .increment(1);
    metrics::gauge!("gateway_connections_active", "transport" => "sse").increment(1.0);

    let options = SubscriptionOptions {
        needs_filtering: resolved.needs_filtering,
        notification_only: resolved.notification_only,
    };

    // Priming comment, sent synchronously so it is always the first byte on
    // the wire — spawning this instead would race the dispatch task below
    // for the first send on `frame_tx`, with no ordering guarantee between
    // two independently scheduled tasks.
    let _ = frame_tx.send(Ok(Bytes::from_static(b":)\n"))).await;

    let pool = state.pool.clone();
    let session_for_task = Arc::clone(&session);
    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT);
        heartbeat.tick().await; // priming already covers the first tick

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if frame_tx.send(Ok(Bytes::from_static(b":thump\n"))).await.is_err() {
                        break;
                    }
                }
                raw = raw_rx.recv() => {
                    let Some(raw) = raw else { break };
                    let Ok(event) = serde_json::from_str::<UpstreamEvent>(&raw) else {
                        continue;
                    };
                    let decision = filter::decide(&pool, &ctx, options, &event).await;
                    if decision == filter::Decision::Drop {
                        continue;
                    }
                    let payload = render_payload(&event.payload);
                    let frame = format!("event: {}\ndata: {}\n\n", event.event, payload);
                    if frame_tx.send(Ok(Bytes::from(frame))).await.is_err() {
                        break;
                    }
                }
            }
        }

        session_for_task.close();
        metrics::gauge!("gateway_connections_active", "transport" => "sse").decrement(1.0);
    });

    let body_stream = stream::unfold(frame_rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });

    let mut response = Response::new(Body::from_stream(body_stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    response
}

/// `GET /api/v1/streaming` — the catch-all alias that takes its stream name
/// from `?stream=` instead of the path, routing to the same resolver and
/// framing as every fixed-path stream (SUPPLEMENTED FEATURES, SPEC_FULL §B).
pub async fn handle_root(
    state: State<AppState>,
    headers: HeaderMap,
    query: Query<SseQuery>,
) -> Response {
    let Query(q) = query;
    let Some(stream_name) = q.stream.clone() else {
        return AppError::MissingRequiredParam("stream is required".into()).into_response();
    };
    handle(state, headers, Query(q), &stream_name).await
}

/// A status/other payload is serialized whole; a bare string payload is
/// passed through untouched (§4.7).
fn render_payload(payload: &Value) -> String {
    match payload.as_str() {
        Some(s) => s.to_owned(),
        None => payload.to_string(),
    }
}

fn compose_stream_name(base: &str, q: &SseQuery) -> String {
    if q.only_media() && matches!(base, "public" | "public:local" | "public:remote") {
        format!("{base}:media")
    } else {
        base.to_owned()
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
