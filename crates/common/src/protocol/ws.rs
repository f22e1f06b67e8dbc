// WebSocket wire frames for the Parley chat protocol.
//
// The wire format is plain JSON objects without a type tag, for
// compatibility with existing web clients: the roster frame is recognized
// by its `online` key, the chat frame by its `_id` key.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::OnlineUser;

/// Server -> client frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ServerFrame {
    Roster(RosterFrame),
    Chat(ChatFrame),
}

/// The full online roster, pushed to every admitted connection whenever
/// membership changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterFrame {
    pub online: Vec<OnlineUser>,
}

/// A relayed chat message, delivered to the recipient's connections after
/// the message has been persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatFrame {
    pub text: Option<String>,
    pub sender: Uuid,
    pub recipient: Uuid,
    /// Stored attachment filename, if any.
    pub file: Option<String>,
    /// Store-assigned message id.
    #[serde(rename = "_id")]
    pub id: Uuid,
}

/// Client -> server chat event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientEvent {
    pub recipient: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileUpload>,
}

/// An attachment carried inline with a chat event.
///
/// `data` is base64, optionally prefixed with a data-URL header
/// (`data:<mime>;base64,<payload>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub data: String,
}
