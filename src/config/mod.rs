use std::env;

/// How the process should bind its listener, mirroring the source's
/// `SOCKET` (or non-numeric `PORT`) convention for selecting a Unix-domain
/// socket instead of TCP.
#[derive(Clone, Debug)]
pub enum BindTarget {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub redis_namespace: Option<String>,
    pub bind: BindTarget,
    pub db_pool_size: u32,
    pub limited_federation_mode: bool,
    pub whitelist_mode: bool,
    pub authorized_fetch: bool,
    pub is_production: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let redis_namespace = env::var("REDIS_NAMESPACE").ok().filter(|s| !s.is_empty());

        let bind = resolve_bind_target();

        let db_pool_size = env::var("DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Ok(Config {
            database_url,
            redis_url,
            redis_namespace,
            bind,
            db_pool_size,
            limited_federation_mode: env_flag("LIMITED_FEDERATION_MODE"),
            whitelist_mode: env_flag("WHITELIST_MODE"),
            authorized_fetch: env_flag("AUTHORIZED_FETCH"),
            is_production: env::var("NODE_ENV").as_deref() == Ok("production")
                || env::var("APP_ENV").as_deref() == Ok("production"),
        })
    }

    /// Public streams (§4.1) require authentication whenever any of the
    /// federation-restricting flags is on.
    pub fn always_require_auth(&self) -> bool {
        self.limited_federation_mode || self.whitelist_mode || self.authorized_fetch
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE")
    )
}

/// `SOCKET`, or a non-numeric `PORT`, selects a Unix-domain socket; otherwise
/// `BIND`/`PORT` (defaulting to `0.0.0.0:4000`) select TCP.
fn resolve_bind_target() -> BindTarget {
    if let Ok(path) = env::var("SOCKET") {
        return BindTarget::Unix { path };
    }

    let port_var = env::var("PORT").ok();
    if let Some(ref p) = port_var {
        if p.parse::<u16>().is_err() {
            return BindTarget::Unix { path: p.clone() };
        }
    }

    let host = env::var("BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let port = port_var.and_then(|p| p.parse().ok()).unwrap_or(4000);
    BindTarget::Tcp { host, port }
}
