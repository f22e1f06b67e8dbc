// Message store: durable chat history, queryable by participant pair.
//
// Insertion order is the ordering contract: postgres assigns a `seq`
// identity column, the memory variant keeps a Vec in insertion order.
// History queries return ascending creation order.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parley_common::types::StoredMessage;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone)]
pub enum MessageStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<Vec<StoredMessage>>>),
}

impl MessageStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(Vec::new())))
    }

    /// Persist a message and return it with its store-assigned id and
    /// creation timestamp. The caller guarantees at least one of `text` or
    /// `file` is present.
    pub async fn create(
        &self,
        sender: Uuid,
        recipient: Uuid,
        text: Option<String>,
        file: Option<String>,
    ) -> anyhow::Result<StoredMessage> {
        let id = Uuid::new_v4();

        match self {
            Self::Postgres(pool) => {
                let created_at = sqlx::query_scalar::<_, DateTime<Utc>>(
                    r#"
                    INSERT INTO messages (id, sender, recipient, text, file)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING created_at
                    "#,
                )
                .bind(id)
                .bind(sender)
                .bind(recipient)
                .bind(&text)
                .bind(&file)
                .fetch_one(pool)
                .await
                .context("failed to insert message")?;

                Ok(StoredMessage { id, sender, recipient, text, file, created_at })
            }
            Self::Memory(store) => {
                let message = StoredMessage {
                    id,
                    sender,
                    recipient,
                    text,
                    file,
                    created_at: Utc::now(),
                };
                store.write().await.push(message.clone());
                Ok(message)
            }
        }
    }

    /// All messages exchanged between `a` and `b` (either direction),
    /// ordered by creation time ascending.
    pub async fn between(&self, a: Uuid, b: Uuid) -> anyhow::Result<Vec<StoredMessage>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<
                    _,
                    (Uuid, Uuid, Uuid, Option<String>, Option<String>, DateTime<Utc>),
                >(
                    r#"
                    SELECT id, sender, recipient, text, file, created_at
                    FROM messages
                    WHERE sender IN ($1, $2) AND recipient IN ($1, $2)
                    ORDER BY seq ASC
                    "#,
                )
                .bind(a)
                .bind(b)
                .fetch_all(pool)
                .await
                .context("failed to query message history")?;

                Ok(rows
                    .into_iter()
                    .map(|(id, sender, recipient, text, file, created_at)| StoredMessage {
                        id,
                        sender,
                        recipient,
                        text,
                        file,
                        created_at,
                    })
                    .collect())
            }
            Self::Memory(store) => {
                let guard = store.read().await;
                Ok(guard
                    .iter()
                    .filter(|message| {
                        (message.sender == a || message.sender == b)
                            && (message.recipient == a || message.recipient == b)
                    })
                    .cloned()
                    .collect())
            }
        }
    }
}
