// Core domain types shared across all Parley crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A verified identity extracted from a credential token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub username: String,
}

/// One entry in the online roster: an authenticated live connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnlineUser {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub username: String,
}

/// A persisted direct message.
///
/// Created once by the relay, never mutated. `created_at` is assigned by the
/// message store and is monotonically increasing per insert, which is what
/// history queries order by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub sender: Uuid,
    pub recipient: Uuid,
    pub text: Option<String>,
    /// Stored attachment filename, if any.
    pub file: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// A directory entry from the user listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Person {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub username: String,
}
