// Attachment blob storage.
//
// Inbound files arrive base64-encoded, optionally wrapped in a data URL.
// The stored filename is synthesized server-side from the current
// epoch-millis timestamp plus a sanitized extension, so client-supplied
// names can neither collide predictably nor traverse directories.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::sync::RwLock;

const FALLBACK_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 16;

#[derive(Clone)]
pub enum UploadStore {
    Fs(Arc<PathBuf>),
    Memory(Arc<RwLock<HashMap<String, Vec<u8>>>>),
}

impl UploadStore {
    pub fn fs(root: PathBuf) -> Self {
        Self::Fs(Arc::new(root))
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn put(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        match self {
            Self::Fs(root) => {
                tokio::fs::create_dir_all(root.as_ref())
                    .await
                    .with_context(|| format!("failed to create uploads dir {}", root.display()))?;
                let path = root.join(name);
                tokio::fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("failed to write upload {}", path.display()))
            }
            Self::Memory(store) => {
                store.write().await.insert(name.to_owned(), bytes.to_vec());
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub async fn get(&self, name: &str) -> Option<Vec<u8>> {
        match self {
            Self::Fs(root) => tokio::fs::read(root.join(name)).await.ok(),
            Self::Memory(store) => store.read().await.get(name).cloned(),
        }
    }
}

/// Decode an uploaded payload: strip an optional `data:<mime>;base64,`
/// prefix (everything up to the first comma), then base64-decode the rest.
pub fn decode_upload(data: &str) -> anyhow::Result<Vec<u8>> {
    let payload = match data.split_once(',') {
        Some((_, tail)) => tail,
        None => data,
    };
    BASE64.decode(payload).context("attachment payload is not valid base64")
}

/// Build the stored filename: `<epoch_millis>.<ext>` where `ext` is the
/// alphanumeric tail of the client-supplied name's last dot segment.
pub fn synthesized_filename(original_name: &str, epoch_millis: i64) -> String {
    let raw_extension = original_name.rsplit('.').next().unwrap_or_default();
    let extension: String = raw_extension
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(MAX_EXTENSION_LEN)
        .collect();

    if extension.is_empty() {
        format!("{epoch_millis}.{FALLBACK_EXTENSION}")
    } else {
        format!("{epoch_millis}.{extension}")
    }
}
