// Inbound chat event handling: validate, persist, fan out.
//
// One inbound event is one sequential task: attachment decode, blob write
// dispatch, store insert, then delivery to the recipient's connections.
// The sender identity always comes from the authenticated connection, never
// from the event body.

use std::sync::Arc;

use chrono::Utc;
use parley_common::protocol::ws::{ChatFrame, ClientEvent, ServerFrame};
use parley_common::types::StoredMessage;
use thiserror::Error;
use tracing::{debug, error};

use crate::store::messages::MessageStore;
use crate::uploads::{decode_upload, synthesized_filename, UploadStore};
use crate::ws::registry::{ConnectionId, ConnectionRegistry};

#[derive(Debug, Error)]
pub(crate) enum InboundError {
    #[error("connection is not authenticated")]
    NotAuthenticated,
    #[error("event has neither text nor file")]
    EmptyMessage,
    #[error("attachment could not be decoded")]
    Attachment(#[source] anyhow::Error),
    #[error("failed to persist message")]
    Persist(#[source] anyhow::Error),
}

#[derive(Debug)]
pub(crate) struct Delivery {
    pub(crate) message: StoredMessage,
    /// Number of recipient connections the message was fanned out to.
    pub(crate) fanned_out: usize,
}

/// Handle one inbound chat event from `conn`.
///
/// Validation failures are returned to the caller instead of being silently
/// dropped; the caller decides how loudly to log them. No error frame goes
/// back over the wire.
pub(crate) async fn handle_inbound(
    registry: &Arc<ConnectionRegistry>,
    messages: &MessageStore,
    uploads: &UploadStore,
    conn: ConnectionId,
    event: ClientEvent,
) -> Result<Delivery, InboundError> {
    let identity =
        registry.identity_of(conn).await.ok_or(InboundError::NotAuthenticated)?;

    let text = event.text.filter(|text| !text.is_empty());
    let filename = match &event.file {
        Some(file) => {
            let bytes = decode_upload(&file.data).map_err(InboundError::Attachment)?;
            let stored_name = synthesized_filename(&file.name, Utc::now().timestamp_millis());

            // Blob write failure must not block message persistence; it is
            // an accepted inconsistency, logged and left alone.
            let uploads = uploads.clone();
            let task_name = stored_name.clone();
            tokio::spawn(async move {
                if let Err(write_error) = uploads.put(&task_name, &bytes).await {
                    error!(
                        filename = %task_name,
                        error = ?write_error,
                        "failed to write attachment blob"
                    );
                }
            });

            Some(stored_name)
        }
        None => None,
    };

    if text.is_none() && filename.is_none() {
        return Err(InboundError::EmptyMessage);
    }

    let message = messages
        .create(identity.user_id, event.recipient, text, filename)
        .await
        .map_err(InboundError::Persist)?;

    let frame = ServerFrame::Chat(ChatFrame {
        text: message.text.clone(),
        sender: message.sender,
        recipient: message.recipient,
        file: message.file.clone(),
        id: message.id,
    });
    let fanned_out = registry.send_to_user(message.recipient, frame).await;

    debug!(
        message_id = %message.id,
        sender = %message.sender,
        recipient = %message.recipient,
        fanned_out,
        "relayed message"
    );

    Ok(Delivery { message, fanned_out })
}
