// Request/response API: registration, login, profile, user directory, and
// message history. These are the simple collaborators around the real-time
// core; they share the credential token with the WebSocket handshake via
// the session cookie.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parley_common::types::Identity;
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::auth::{cookie, jwt::JwtTokenService, password};
use crate::error::{ApiError, ErrorCode};
use crate::store::{
    messages::MessageStore,
    users::{CreateUserError, UserStore},
};

const MAX_USERNAME_CHARS: usize = 64;

#[derive(Clone)]
pub struct ApiState {
    pub users: UserStore,
    pub messages: MessageStore,
    pub jwt_service: Arc<JwtTokenService>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/profile", get(profile))
        .route("/api/people", get(people))
        .route("/api/messages/{user_id}", get(message_history))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CredentialsRequest {
    username: String,
    password: String,
}

async fn register(
    State(state): State<ApiState>,
    Json(payload): Json<CredentialsRequest>,
) -> Response {
    if let Err(validation_error) = validate_credentials(&payload) {
        return validation_error.into_response();
    }

    let password_hash = match password::hash_password(&payload.password) {
        Ok(hash) => hash,
        Err(hash_error) => {
            error!(error = ?hash_error, "password hashing failed");
            return ApiError::from_code(ErrorCode::InternalError).into_response();
        }
    };

    let user = match state.users.create(&payload.username, &password_hash).await {
        Ok(user) => user,
        Err(CreateUserError::UsernameTaken) => {
            return ApiError::from_code(ErrorCode::UsernameTaken).into_response();
        }
        Err(CreateUserError::Store(store_error)) => {
            error!(error = ?store_error, "user creation failed");
            return ApiError::from_code(ErrorCode::InternalError).into_response();
        }
    };

    session_response(&state.jwt_service, user.id, &user.username, StatusCode::CREATED)
}

async fn login(
    State(state): State<ApiState>,
    Json(payload): Json<CredentialsRequest>,
) -> Response {
    let user = match state.users.find_by_username(&payload.username).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return ApiError::from_code(ErrorCode::AuthInvalidCredentials).into_response();
        }
        Err(store_error) => {
            error!(error = ?store_error, "login lookup failed");
            return ApiError::from_code(ErrorCode::InternalError).into_response();
        }
    };

    match password::verify_password(&payload.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return ApiError::from_code(ErrorCode::AuthInvalidCredentials).into_response();
        }
        Err(verify_error) => {
            error!(error = ?verify_error, "password verification failed");
            return ApiError::from_code(ErrorCode::InternalError).into_response();
        }
    }

    session_response(&state.jwt_service, user.id, &user.username, StatusCode::OK)
}

async fn logout() -> Response {
    ([(SET_COOKIE, cookie::clear_session_cookie())], Json(json!("ok"))).into_response()
}

async fn profile(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    match identity_from_headers(&headers, &state.jwt_service) {
        Ok(identity) => Json(identity).into_response(),
        Err(auth_error) => auth_error.into_response(),
    }
}

async fn people(State(state): State<ApiState>) -> Response {
    match state.users.list().await {
        Ok(people) => Json(people).into_response(),
        Err(store_error) => {
            error!(error = ?store_error, "user listing failed");
            ApiError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn message_history(
    State(state): State<ApiState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let identity = match identity_from_headers(&headers, &state.jwt_service) {
        Ok(identity) => identity,
        Err(auth_error) => return auth_error.into_response(),
    };

    match state.messages.between(identity.user_id, user_id).await {
        Ok(history) => Json(history).into_response(),
        Err(store_error) => {
            error!(error = ?store_error, "history query failed");
            ApiError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

/// Resolve the caller's identity from the session cookie, or an explicit
/// unauthorized error.
fn identity_from_headers(
    headers: &HeaderMap,
    jwt_service: &JwtTokenService,
) -> Result<Identity, ApiError> {
    let token = cookie::token_from_headers(headers)
        .ok_or_else(|| ApiError::from_code(ErrorCode::AuthInvalidToken))?;

    jwt_service
        .verify_token(token)
        .map_err(|_| ApiError::from_code(ErrorCode::AuthInvalidToken))
}

fn validate_credentials(payload: &CredentialsRequest) -> Result<(), ApiError> {
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            "username and password must be non-empty",
        ));
    }
    if payload.username.chars().count() > MAX_USERNAME_CHARS {
        return Err(ApiError::new(ErrorCode::ValidationFailed, "username is too long")
            .with_details(json!({ "max_chars": MAX_USERNAME_CHARS })));
    }
    Ok(())
}

fn session_response(
    jwt_service: &JwtTokenService,
    user_id: Uuid,
    username: &str,
    status: StatusCode,
) -> Response {
    match jwt_service.issue_token(user_id, username) {
        Ok(token) => (
            status,
            [(SET_COOKIE, cookie::session_cookie(&token))],
            Json(json!({ "id": user_id })),
        )
            .into_response(),
        Err(issue_error) => {
            error!(error = ?issue_error, "token issuance failed");
            ApiError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{router, ApiState};
    use crate::auth::{cookie, jwt::JwtTokenService, password};
    use crate::store::{messages::MessageStore, users::UserStore};
    use axum::{
        body::{to_bytes, Body},
        http::{
            header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
            Method, Request, StatusCode,
        },
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    const TEST_SECRET: &str = "parley_test_secret_that_is_definitely_long_enough";

    fn test_state() -> ApiState {
        ApiState {
            users: UserStore::memory(),
            messages: MessageStore::memory(),
            jwt_service: Arc::new(
                JwtTokenService::new(TEST_SECRET).expect("jwt service should initialize"),
            ),
        }
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build")
    }

    async fn read_json(response: axum::response::Response) -> Value {
        let body =
            to_bytes(response.into_body(), usize::MAX).await.expect("response body should read");
        serde_json::from_slice(&body).expect("response body should be valid json")
    }

    fn session_cookie_from(response: &axum::response::Response) -> String {
        let set_cookie = response
            .headers()
            .get(SET_COOKIE)
            .expect("response should set a cookie")
            .to_str()
            .expect("cookie should be ascii");
        let token_pair =
            set_cookie.split(';').next().expect("cookie should have a first segment");
        assert!(token_pair.starts_with("token="));
        token_pair.to_owned()
    }

    #[tokio::test]
    async fn register_creates_user_and_sets_session_cookie() {
        let state = test_state();
        let app = router(state.clone());

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/register",
                json!({ "username": "alice", "password": "hunter2" }),
            ))
            .await
            .expect("request should return response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let cookie = session_cookie_from(&response);
        assert!(cookie.len() > "token=".len());

        let body = read_json(response).await;
        let id: Uuid =
            body["id"].as_str().expect("id should be a string").parse().expect("id is a uuid");

        let stored = state
            .users
            .find_by_username("alice")
            .await
            .expect("lookup should succeed")
            .expect("alice should exist");
        assert_eq!(stored.id, id);
        assert!(stored.password_hash.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_usernames() {
        let state = test_state();

        let first = router(state.clone())
            .oneshot(json_request(
                Method::POST,
                "/api/register",
                json!({ "username": "alice", "password": "hunter2" }),
            ))
            .await
            .expect("request should return response");
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = router(state)
            .oneshot(json_request(
                Method::POST,
                "/api/register",
                json!({ "username": "alice", "password": "other" }),
            ))
            .await
            .expect("request should return response");
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body = read_json(second).await;
        assert_eq!(body["error"]["code"], "USERNAME_TAKEN");
    }

    #[tokio::test]
    async fn register_rejects_blank_credentials() {
        let response = router(test_state())
            .oneshot(json_request(
                Method::POST,
                "/api/register",
                json!({ "username": "  ", "password": "hunter2" }),
            ))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn login_succeeds_with_correct_password() {
        let state = test_state();
        let hash = password::hash_password("hunter2").expect("hash should succeed");
        let user = state.users.create("alice", &hash).await.expect("create should succeed");

        let response = router(state)
            .oneshot(json_request(
                Method::POST,
                "/api/login",
                json!({ "username": "alice", "password": "hunter2" }),
            ))
            .await
            .expect("request should return response");

        assert_eq!(response.status(), StatusCode::OK);
        let _cookie = session_cookie_from(&response);
        let body = read_json(response).await;
        assert_eq!(body["id"], user.id.to_string());
    }

    #[tokio::test]
    async fn login_rejects_wrong_password_and_unknown_user() {
        let state = test_state();
        let hash = password::hash_password("hunter2").expect("hash should succeed");
        state.users.create("alice", &hash).await.expect("create should succeed");

        let wrong_password = router(state.clone())
            .oneshot(json_request(
                Method::POST,
                "/api/login",
                json!({ "username": "alice", "password": "nope" }),
            ))
            .await
            .expect("request should return response");
        assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);

        let unknown_user = router(state)
            .oneshot(json_request(
                Method::POST,
                "/api/login",
                json!({ "username": "mallory", "password": "nope" }),
            ))
            .await
            .expect("request should return response");
        assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_clears_the_cookie() {
        let response = router(test_state())
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/logout")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return response");

        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response
            .headers()
            .get(SET_COOKIE)
            .expect("logout should set a cookie")
            .to_str()
            .expect("cookie should be ascii");
        assert!(set_cookie.starts_with("token=;"));
        assert!(set_cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn profile_returns_claims_for_a_valid_cookie() {
        let state = test_state();
        let user_id = Uuid::new_v4();
        let token = state
            .jwt_service
            .issue_token(user_id, "alice")
            .expect("token should be issued");

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/profile")
                    .header(COOKIE, format!("{}={token}", cookie::TOKEN_COOKIE))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["userId"], user_id.to_string());
        assert_eq!(body["username"], "alice");
    }

    #[tokio::test]
    async fn profile_without_cookie_is_unauthorized() {
        let response = router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api/profile")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn people_lists_registered_users() {
        let state = test_state();
        state.users.create("alice", "h").await.expect("create should succeed");
        state.users.create("bob", "h").await.expect("create should succeed");

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/people")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        let people = body.as_array().expect("people should be an array");
        assert_eq!(people.len(), 2);
        assert_eq!(people[0]["username"], "alice");
        assert!(people[0]["_id"].is_string());
    }

    #[tokio::test]
    async fn history_requires_authentication() {
        let response = router(test_state())
            .oneshot(
                Request::builder()
                    .uri(format!("/api/messages/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn history_returns_conversation_in_creation_order() {
        let state = test_state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        for i in 0..4 {
            let (from, to) = if i % 2 == 0 { (alice, bob) } else { (bob, alice) };
            state
                .messages
                .create(from, to, Some(format!("m{i}")), None)
                .await
                .expect("create should succeed");
        }
        // noise from a third party
        state
            .messages
            .create(Uuid::new_v4(), alice, Some("spam".into()), None)
            .await
            .expect("create should succeed");

        let token =
            state.jwt_service.issue_token(alice, "alice").expect("token should be issued");
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/api/messages/{bob}"))
                    .header(COOKIE, format!("token={token}"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        let rows = body.as_array().expect("history should be an array");
        let texts: Vec<&str> =
            rows.iter().map(|row| row["text"].as_str().expect("text")).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3"]);
    }
}
