use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use streaming_gateway::config::{BindTarget, Config};
use streaming_gateway::pubsub::UpstreamBus;
use streaming_gateway::state::AppState;
use streaming_gateway::{db, routes};

/// Restricts `/metrics` to loopback connections. When `ConnectInfo` is not
/// available (the Unix-socket listener path never attaches it) access is
/// denied — scraping should happen over TCP instead.
async fn require_loopback(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "streaming_gateway=info,tower_http=info,sqlx=warn"
            .parse()
            .unwrap()
    });

    let config = Config::from_env().expect("failed to load configuration");

    if config.is_production {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("streaming gateway starting");

    let pool = db::create_pool(&config.database_url, config.db_pool_size)
        .await
        .expect("failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run database migrations");
    info!("database migrations applied");

    db::health_check(&pool).await.expect("database health check failed");

    let bus = UpstreamBus::connect(&config.redis_url, config.redis_namespace.clone())
        .await
        .expect("failed to connect to upstream pub/sub");
    info!("upstream pub/sub connected");

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(HeaderValue::from_static("*")))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
            axum::http::header::CACHE_CONTROL,
        ]);

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let bind = config.bind.clone();
    let state = AppState {
        pool,
        config: std::sync::Arc::new(config),
        bus,
    };

    let app = routes::build()
        .route(
            "/metrics",
            axum::routing::get(move || async move { metric_handle.render() })
                .route_layer(middleware::from_fn(require_loopback)),
        )
        .layer(prometheus_layer)
        .layer(cors)
        .with_state(state);

    match bind {
        BindTarget::Tcp { ref host, port } => {
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .expect("invalid BIND/PORT combination");
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .expect("failed to bind TCP listener");
            info!(%addr, "listening");

            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown_signal())
            .await
            .expect("server error");
        }
        BindTarget::Unix { ref path } => {
            let _ = std::fs::remove_file(path);
            let listener = tokio::net::UnixListener::bind(path).expect("failed to bind Unix socket");
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
                    .expect("failed to chmod socket");
            }
            info!(%path, "listening on unix socket");

            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await
                .expect("server error");
        }
    }

    info!("streaming gateway shut down gracefully");
}

/// Waits for SIGINT or SIGTERM so in-flight connections can drain before the
/// process exits (§5 "Graceful shutdown").
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
