// Credential store: durable user records keyed by username.

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use parley_common::types::Person;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Error)]
pub enum CreateUserError {
    #[error("username is already taken")]
    UsernameTaken,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Clone)]
pub enum UserStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<Uuid, UserRecord>>>),
}

impl UserStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn create(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<UserRecord, CreateUserError> {
        let record = UserRecord {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            password_hash: password_hash.to_owned(),
        };

        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "INSERT INTO users (id, username, password_hash) VALUES ($1, $2, $3)",
                )
                .bind(record.id)
                .bind(&record.username)
                .bind(&record.password_hash)
                .execute(pool)
                .await;

                match result {
                    Ok(_) => Ok(record),
                    Err(error) if is_unique_violation(&error) => {
                        Err(CreateUserError::UsernameTaken)
                    }
                    Err(error) => Err(CreateUserError::Store(
                        anyhow::Error::new(error).context("failed to insert user"),
                    )),
                }
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                if guard.values().any(|user| user.username == record.username) {
                    return Err(CreateUserError::UsernameTaken);
                }
                guard.insert(record.id, record.clone());
                Ok(record)
            }
        }
    }

    pub async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<UserRecord>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (Uuid, String, String)>(
                    "SELECT id, username, password_hash FROM users WHERE username = $1",
                )
                .bind(username)
                .fetch_optional(pool)
                .await
                .context("failed to query user by username")?;

                Ok(row.map(|(id, username, password_hash)| UserRecord {
                    id,
                    username,
                    password_hash,
                }))
            }
            Self::Memory(store) => {
                let guard = store.read().await;
                Ok(guard.values().find(|user| user.username == username).cloned())
            }
        }
    }

    /// Every known user as a directory entry, for the people listing.
    pub async fn list(&self) -> anyhow::Result<Vec<Person>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, (Uuid, String)>(
                    "SELECT id, username FROM users ORDER BY username",
                )
                .fetch_all(pool)
                .await
                .context("failed to list users")?;

                Ok(rows.into_iter().map(|(id, username)| Person { id, username }).collect())
            }
            Self::Memory(store) => {
                let guard = store.read().await;
                let mut people: Vec<Person> = guard
                    .values()
                    .map(|user| Person { id: user.id, username: user.username.clone() })
                    .collect();
                people.sort_by(|a, b| a.username.cmp(&b.username));
                Ok(people)
            }
        }
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some("23505")
    )
}
