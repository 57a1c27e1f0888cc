//! Real-time streaming gateway: fans out an upstream pub/sub timeline bus to
//! many concurrent SSE and WebSocket clients, applying per-viewer visibility
//! filtering and OAuth scope checks along the way.
//!
//! Module map mirrors the component design: [`auth`] is the Auth Resolver
//! and List Authorizer, [`pubsub`] is the Upstream Bus Adapter and
//! Subscription Heartbeat, [`stream_resolver`] is the Stream Resolver,
//! [`filter`] is the Visibility Filter, [`session`] is the Session Manager,
//! and [`transport`] holds the SSE and WebSocket adapters.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod models;
pub mod pubsub;
pub mod routes;
pub mod session;
pub mod state;
pub mod stream_resolver;
pub mod transport;
