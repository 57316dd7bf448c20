use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::message::ConversationRecord;
use crate::device::DeviceId;

/// Repository for conversation records. The storage engine behind it is
/// out of scope here; implementations only need whole-record save/load.
#[async_trait::async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn save(&self, record: &ConversationRecord) -> Result<()>;

    async fn load(&self, session_id: Uuid) -> Result<Option<ConversationRecord>>;

    /// Most recent records for one device, newest first.
    async fn list_for_device(&self, device_id: &DeviceId, limit: usize)
        -> Result<Vec<ConversationRecord>>;
}

/// One JSON file per session under a directory.
pub struct FsTranscriptStore {
    dir: PathBuf,
}

impl FsTranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: Uuid) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

#[async_trait::async_trait]
impl TranscriptStore for FsTranscriptStore {
    async fn save(&self, record: &ConversationRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let json = serde_json::to_vec_pretty(record)?;
        let path = self.path_for(record.session_id);
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<ConversationRecord>> {
        match tokio::fs::read(self.path_for(session_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_for_device(
        &self,
        device_id: &DeviceId,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().map(|ext| ext == "json") != Some(true) {
                continue;
            }
            let bytes = tokio::fs::read(entry.path()).await?;
            match serde_json::from_slice::<ConversationRecord>(&bytes) {
                Ok(record) if &record.device_id == device_id && !record.deleted => {
                    records.push(record)
                }
                _ => {}
            }
        }

        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit);
        Ok(records)
    }
}

/// In-memory store for tests, with a switchable failure mode to exercise
/// buffering and reconciliation behavior.
#[derive(Default)]
pub struct MemoryTranscriptStore {
    records: Mutex<HashMap<Uuid, ConversationRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn save(&self, record: &ConversationRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("transcript store unavailable");
        }
        self.records
            .lock()
            .await
            .insert(record.session_id, record.clone());
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<ConversationRecord>> {
        Ok(self.records.lock().await.get(&session_id).cloned())
    }

    async fn list_for_device(
        &self,
        device_id: &DeviceId,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .await
            .values()
            .filter(|r| &r.device_id == device_id && !r.deleted)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit);
        Ok(records)
    }
}
