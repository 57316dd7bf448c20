use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::record::DailyUsageRecord;
use crate::device::DeviceId;

/// Durable backing store for usage records. The ledger writes through this
/// after every mutation; a failed write is retried on the next mutation
/// rather than surfaced to the session path.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist the full day history for one device.
    async fn save_device(
        &self,
        device_id: &DeviceId,
        days: &BTreeMap<NaiveDate, DailyUsageRecord>,
    ) -> Result<()>;

    /// Load everything previously persisted.
    async fn load_all(&self) -> Result<HashMap<DeviceId, BTreeMap<NaiveDate, DailyUsageRecord>>>;
}

/// Single-file JSON store: `{ "<device>": { "<date>": record } }`.
pub struct FsLedgerStore {
    path: PathBuf,
    // Serializes the read-modify-write of the shared file.
    write_lock: Mutex<()>,
}

impl FsLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_file(&self) -> Result<HashMap<DeviceId, BTreeMap<NaiveDate, DailyUsageRecord>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt ledger file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }
}

#[async_trait::async_trait]
impl LedgerStore for FsLedgerStore {
    async fn save_device(
        &self,
        device_id: &DeviceId,
        days: &BTreeMap<NaiveDate, DailyUsageRecord>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut all = self.read_file().await?;
        all.insert(device_id.clone(), days.clone());

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let json = serde_json::to_vec_pretty(&all)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("writing {}", self.path.display()))
    }

    async fn load_all(&self) -> Result<HashMap<DeviceId, BTreeMap<NaiveDate, DailyUsageRecord>>> {
        let _guard = self.write_lock.lock().await;
        self.read_file().await
    }
}

/// In-memory store for tests; can be switched into a failing mode to
/// exercise the delayed-reconciliation path.
#[derive(Default)]
pub struct MemoryLedgerStore {
    records: Mutex<HashMap<DeviceId, BTreeMap<NaiveDate, DailyUsageRecord>>>,
    fail_writes: AtomicBool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn saved_days(
        &self,
        device_id: &DeviceId,
    ) -> Option<BTreeMap<NaiveDate, DailyUsageRecord>> {
        self.records.lock().await.get(device_id).cloned()
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn save_device(
        &self,
        device_id: &DeviceId,
        days: &BTreeMap<NaiveDate, DailyUsageRecord>,
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("ledger store unavailable");
        }
        self.records
            .lock()
            .await
            .insert(device_id.clone(), days.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<HashMap<DeviceId, BTreeMap<NaiveDate, DailyUsageRecord>>> {
        Ok(self.records.lock().await.clone())
    }
}
