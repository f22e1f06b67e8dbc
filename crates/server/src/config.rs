// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. CORS origins are parsed separately in cors.rs; everything
// else the server reads from the environment lives here.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret for credential tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Upper bound on pooled PostgreSQL connections.
    pub db_max_connections: u32,
    /// How long a request may wait for a pooled connection.
    pub db_acquire_timeout: Duration,
    /// Directory where message attachments are written.
    pub uploads_dir: PathBuf,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `parley_server=debug`).
    pub log_filter: String,
}

const DEV_JWT_SECRET: &str = "parley_local_development_jwt_secret_must_be_32_chars";

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `PARLEY_HOST` | `0.0.0.0` |
    /// | `PARLEY_PORT` | `4000` |
    /// | `PARLEY_JWT_SECRET` | dev-only placeholder |
    /// | `PARLEY_DATABASE_URL` | *(none)* |
    /// | `PARLEY_DB_MAX_CONNECTIONS` | `16` |
    /// | `PARLEY_DB_ACQUIRE_TIMEOUT_SECS` | `5` |
    /// | `PARLEY_UPLOADS_DIR` | `./uploads` |
    /// | `PARLEY_CORS_ORIGINS` | *(none — cors.rs uses dev defaults)* |
    /// | `PARLEY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("PARLEY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(4000);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("PARLEY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());
        let database_url = env("PARLEY_DATABASE_URL").ok();
        let db_max_connections = env("PARLEY_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
        let db_acquire_timeout = Duration::from_secs(
            env("PARLEY_DB_ACQUIRE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS),
        );
        let uploads_dir =
            env("PARLEY_UPLOADS_DIR").map(PathBuf::from).unwrap_or_else(|_| "./uploads".into());
        let cors_origins = env("PARLEY_CORS_ORIGINS").ok();
        let log_filter = env("PARLEY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            db_max_connections,
            db_acquire_timeout,
            uploads_dir,
            cors_origins,
            log_filter,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
