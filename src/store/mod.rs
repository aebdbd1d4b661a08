//! Optional key-value persistence for state that should survive a restart.
//!
//! The relay only needs load/save hooks: it records which chats had a live
//! status or aggregation anchor so a restarted process can mark those
//! messages as interrupted instead of leaving "⏳ Working" forever.

mod file;

pub use file::JsonFileStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{RelayError, Result};
use crate::platform::MessageId;

/// Key under which the relay keeps its anchor records.
pub const ANCHORS_KEY: &str = "relay:anchors";

/// Pluggable key-value backend.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Backend name (e.g., "memory", "json_file").
    fn name(&self) -> &str;

    async fn load(&self, key: &str) -> Result<Option<Value>>;

    async fn save(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove a key. Missing keys are not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;
}

/// Which component owned an anchor message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    Status,
    Aggregation,
}

/// One in-flight message the relay was editing when state was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub chat_id: String,
    pub message_id: MessageId,
    pub kind: AnchorKind,
}

/// Snapshot of in-flight anchors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorSnapshot {
    pub saved_at: DateTime<Utc>,
    pub anchors: Vec<AnchorRecord>,
}

impl AnchorSnapshot {
    pub fn new(anchors: Vec<AnchorRecord>) -> Self {
        Self {
            saved_at: Utc::now(),
            anchors,
        }
    }

    pub async fn load(store: &dyn StateStore) -> Result<Option<Self>> {
        match store.load(ANCHORS_KEY).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| RelayError::Store(format!("corrupt anchor snapshot: {}", e))),
            None => Ok(None),
        }
    }

    pub async fn save(&self, store: &dyn StateStore) -> Result<()> {
        store.save(ANCHORS_KEY, &serde_json::to_value(self)?).await
    }
}

/// In-process store; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
