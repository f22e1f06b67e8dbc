// WebSocket endpoint: admission, identification, heartbeats, relay.
//
// One task per connection. The pump multiplexes three event sources:
// liveness timing, the outbound frame channel fed by the registry, and the
// socket itself. Every exit path funnels into the same teardown: evict once,
// re-announce once.

pub mod liveness;
pub mod registry;
pub mod relay;

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::{cookie, jwt::JwtTokenService};
use crate::error::{request_id_from_headers_or_generate, with_request_id_scope};
use crate::store::messages::MessageStore;
use crate::uploads::UploadStore;
use liveness::{Liveness, LivenessEvent, PING_INTERVAL, PONG_TIMEOUT};
use registry::ConnectionRegistry;

#[derive(Clone)]
pub struct RelayState {
    pub registry: Arc<ConnectionRegistry>,
    pub jwt_service: Arc<JwtTokenService>,
    pub messages: MessageStore,
    pub uploads: UploadStore,
}

pub fn router(state: RelayState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(
    State(state): State<RelayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // The credential rides in on the handshake cookie; grab it before the
    // protocol switch. Missing or bad tokens still get a connection.
    let token = cookie::token_from_headers(&headers).map(ToOwned::to_owned);
    let request_id = request_id_from_headers_or_generate(&headers);

    ws.on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, handle_socket(state, socket, token)).await;
    })
}

async fn handle_socket(state: RelayState, mut socket: WebSocket, token: Option<String>) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let conn = state.registry.admit(outbound_tx).await;

    // Identification is best-effort: a failed verification leaves the
    // connection admitted but unauthenticated.
    if let Some(token) = token {
        match state.jwt_service.verify_token(&token) {
            Ok(identity) => {
                debug!(conn = %conn, user_id = %identity.user_id, "connection identified");
                state.registry.identify(conn, identity).await;
            }
            Err(error) => {
                warn!(conn = %conn, error = ?error, "handshake credential rejected");
            }
        }
    }

    state.registry.announce().await;

    let mut liveness = Liveness::new(PING_INTERVAL, PONG_TIMEOUT);
    loop {
        tokio::select! {
            event = liveness.next_event() => match event {
                LivenessEvent::SendPing => {
                    if socket.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    liveness.ping_sent();
                }
                LivenessEvent::Dead => {
                    warn!(conn = %conn, "heartbeat timeout, terminating connection");
                    state.registry.mark_dead(conn).await;
                    // forcible close; the client never answered the ping
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            maybe_frame = outbound_rx.recv() => {
                let Some(frame) = maybe_frame else { break };
                match serde_json::to_string(&frame) {
                    Ok(encoded) => {
                        if socket.send(Message::Text(encoded.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(conn = %conn, error = ?error, "failed to encode outbound frame");
                    }
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else { break };

                match message {
                    Ok(Message::Text(raw)) => {
                        let event = match serde_json::from_str(&raw) {
                            Ok(event) => event,
                            Err(error) => {
                                // malformed events are dropped, not answered
                                debug!(conn = %conn, error = ?error, "dropping malformed event");
                                continue;
                            }
                        };
                        if let Err(error) = relay::handle_inbound(
                            &state.registry,
                            &state.messages,
                            &state.uploads,
                            conn,
                            event,
                        )
                        .await
                        {
                            warn!(conn = %conn, error = ?error, "dropped inbound event");
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        liveness.pong_received();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    // Teardown is shared by every exit path. Evict is idempotent; only an
    // actual removal triggers the re-announcement.
    if state.registry.evict(conn).await {
        info!(conn = %conn, "connection closed");
        state.registry.announce().await;
    }
}
