mod api;
mod auth;
mod config;
mod cors;
mod db;
mod error;
mod store;
mod uploads;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header::HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::jwt::JwtTokenService;
use crate::config::ServerConfig;
use crate::error::{request_id_from_headers_or_generate, with_request_id_scope, REQUEST_ID_HEADER};
use crate::store::{messages::MessageStore, users::UserStore};
use crate::uploads::UploadStore;
use crate::ws::registry::ConnectionRegistry;

// Inbound frames carry base64 attachments, so the body limit is generous.
const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set PARLEY_JWT_SECRET in production");
    }

    let jwt_service =
        Arc::new(JwtTokenService::new(&config.jwt_secret).context("invalid JWT secret")?);

    let (users, messages) = match &config.database_url {
        Some(database_url) => {
            let pool =
                db::connect(database_url, config.db_max_connections, config.db_acquire_timeout)
                    .await
                    .context("failed to initialize PostgreSQL")?;
            (UserStore::Postgres(pool.clone()), MessageStore::Postgres(pool))
        }
        None => {
            warn!("PARLEY_DATABASE_URL not set; using in-memory stores, state will not survive a restart");
            (UserStore::memory(), MessageStore::memory())
        }
    };

    let uploads = UploadStore::fs(config.uploads_dir.clone());
    let registry = ConnectionRegistry::new();

    let app = build_router(
        api::ApiState {
            users,
            messages: messages.clone(),
            jwt_service: Arc::clone(&jwt_service),
        },
        ws::RelayState { registry, jwt_service, messages, uploads },
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting chat server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited unexpectedly")
}

fn build_router(api_state: api::ApiState, relay_state: ws::RelayState) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(api::router(api_state))
            .merge(ws::router(relay_state)),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(cors::cors_layer())
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response =
        with_request_id_scope(request_id.clone(), next.run(request)).await;

    if let Ok(request_id_header) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id_header);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::{api, build_router, ws};
    use crate::auth::jwt::JwtTokenService;
    use crate::store::{messages::MessageStore, users::UserStore};
    use crate::uploads::UploadStore;
    use crate::ws::registry::ConnectionRegistry;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    const TEST_SECRET: &str = "parley_test_secret_that_is_definitely_long_enough";

    fn test_app() -> axum::Router {
        let jwt_service = Arc::new(
            JwtTokenService::new(TEST_SECRET).expect("jwt service should initialize"),
        );
        let messages = MessageStore::memory();
        build_router(
            api::ApiState {
                users: UserStore::memory(),
                messages: messages.clone(),
                jwt_service: Arc::clone(&jwt_service),
            },
            ws::RelayState {
                registry: ConnectionRegistry::new(),
                jwt_service,
                messages,
                uploads: UploadStore::memory(),
            },
        )
    }

    #[tokio::test]
    async fn healthz_responds_ok() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-test-1")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return response");
        assert_eq!(
            response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("req-test-1")
        );
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/nope")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
