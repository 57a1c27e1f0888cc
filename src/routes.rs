//! Route table (§6 "External interfaces").
//!
//! Every fixed-path stream is a thin closure that pins the logical stream
//! name and forwards into [`transport::sse::handle`]; the parsing, auth and
//! filtering logic is shared by every one of them. `/api/v1/streaming` is
//! the catch-all alias that takes its stream name from `?stream=` instead
//! (SPEC_FULL §B).

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::transport::sse::{self, SseQuery};
use crate::transport::websocket;

macro_rules! fixed_stream_route {
    ($name:literal) => {
        get(
            |state: State<AppState>, headers: HeaderMap, query: Query<SseQuery>| async move {
                sse::handle(state, headers, query, $name).await
            },
        )
    };
}

pub fn build() -> Router<AppState> {
    Router::new()
        .route("/api/v1/streaming/health", get(sse::health))
        .route("/api/v1/streaming", get(sse::handle_root))
        .route("/api/v1/streaming/user", fixed_stream_route!("user"))
        .route(
            "/api/v1/streaming/user/notification",
            fixed_stream_route!("user:notification"),
        )
        .route("/api/v1/streaming/public", fixed_stream_route!("public"))
        .route(
            "/api/v1/streaming/public/local",
            fixed_stream_route!("public:local"),
        )
        .route(
            "/api/v1/streaming/public/remote",
            fixed_stream_route!("public:remote"),
        )
        .route("/api/v1/streaming/direct", fixed_stream_route!("direct"))
        .route("/api/v1/streaming/hashtag", fixed_stream_route!("hashtag"))
        .route(
            "/api/v1/streaming/hashtag/local",
            fixed_stream_route!("hashtag:local"),
        )
        .route("/api/v1/streaming/list", fixed_stream_route!("list"))
        .route("/", get(websocket::upgrade))
}
