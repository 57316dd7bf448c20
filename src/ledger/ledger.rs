use chrono::{NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::record::DailyUsageRecord;
use super::store::LedgerStore;
use crate::device::DeviceId;

/// Outcome of the authoritative quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeResult {
    pub allowed: bool,
    pub remaining: u32,
}

struct DeviceUsage {
    days: BTreeMap<NaiveDate, DailyUsageRecord>,
    /// Set when the last write-through failed; retried on the next mutation.
    dirty: bool,
}

/// Per-device daily episode quota.
///
/// All mutations for one device run under that device's own mutex, held
/// across the whole read-check-increment, so concurrent `try_consume` calls
/// can never push the count past the limit. The outer map lock is only held
/// long enough to fetch or insert the per-device entry.
pub struct UsageLedger {
    limit: u32,
    tz: Tz,
    store: Arc<dyn LedgerStore>,
    devices: Mutex<HashMap<DeviceId, Arc<Mutex<DeviceUsage>>>>,
}

impl UsageLedger {
    /// Build a ledger, loading previously persisted history from the store.
    pub async fn load(limit: u32, tz: Tz, store: Arc<dyn LedgerStore>) -> anyhow::Result<Self> {
        let persisted = store.load_all().await?;
        let mut devices = HashMap::with_capacity(persisted.len());
        for (device_id, days) in persisted {
            devices.insert(
                device_id,
                Arc::new(Mutex::new(DeviceUsage { days, dirty: false })),
            );
        }
        info!(devices = devices.len(), "usage ledger loaded");
        Ok(Self {
            limit,
            tz,
            store,
            devices: Mutex::new(devices),
        })
    }

    pub fn daily_limit(&self) -> u32 {
        self.limit
    }

    /// Today in the server's reference time zone. The device's local clock
    /// is never consulted.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// Seconds until the daily counters reset (next local midnight).
    pub fn seconds_until_reset(&self) -> i64 {
        let now = Utc::now().with_timezone(&self.tz);
        let tomorrow = now
            .date_naive()
            .succ_opt()
            .expect("date overflow")
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid");
        match self.tz.from_local_datetime(&tomorrow).earliest() {
            Some(midnight) => (midnight.with_timezone(&Utc) - Utc::now()).num_seconds().max(0),
            None => 0,
        }
    }

    async fn entry(&self, device_id: &DeviceId) -> Arc<Mutex<DeviceUsage>> {
        let mut devices = self.devices.lock().await;
        devices
            .entry(device_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DeviceUsage {
                    days: BTreeMap::new(),
                    dirty: false,
                }))
            })
            .clone()
    }

    /// Non-mutating preflight: may this device start another episode today?
    pub async fn can_start(&self, device_id: &DeviceId) -> bool {
        self.remaining(device_id).await > 0
    }

    /// Episodes left today for this device (read-only).
    pub async fn remaining(&self, device_id: &DeviceId) -> u32 {
        let entry = self.entry(device_id).await;
        let usage = entry.lock().await;
        let played = usage
            .days
            .get(&self.today())
            .map(|r| r.episodes_played)
            .unwrap_or(0);
        self.limit.saturating_sub(played)
    }

    /// Authoritative, mutating quota check: consume one episode slot if the
    /// daily limit allows it. Called exactly once per episode transition.
    pub async fn try_consume(&self, device_id: &DeviceId) -> ConsumeResult {
        let today = self.today();
        let entry = self.entry(device_id).await;
        let mut usage = entry.lock().await;

        let record = usage
            .days
            .entry(today)
            .or_insert_with(|| DailyUsageRecord::new(today));

        if record.episodes_played >= self.limit {
            return ConsumeResult {
                allowed: false,
                remaining: 0,
            };
        }

        record.episodes_played += 1;
        let remaining = self.limit - record.episodes_played;
        self.persist(device_id, &mut usage).await;

        ConsumeResult {
            allowed: true,
            remaining,
        }
    }

    /// Add connected time for this session to today's record.
    pub async fn record_session_time(&self, device_id: &DeviceId, seconds: f64) {
        let today = self.today();
        let entry = self.entry(device_id).await;
        let mut usage = entry.lock().await;

        let record = usage
            .days
            .entry(today)
            .or_insert_with(|| DailyUsageRecord::new(today));
        record.session_seconds += seconds.max(0.0);
        record.sessions_count += 1;
        self.persist(device_id, &mut usage).await;
    }

    /// Most recent `days_back` daily records for a device, newest first.
    /// Read-only admin surface.
    pub async fn usage_summary(
        &self,
        device_id: &DeviceId,
        days_back: usize,
    ) -> Vec<DailyUsageRecord> {
        let entry = self.entry(device_id).await;
        let usage = entry.lock().await;
        usage.days.values().rev().take(days_back).cloned().collect()
    }

    async fn persist(&self, device_id: &DeviceId, usage: &mut DeviceUsage) {
        match self.store.save_device(device_id, &usage.days).await {
            Ok(()) => {
                if usage.dirty {
                    info!(device_id = %device_id, "ledger write reconciled");
                }
                usage.dirty = false;
            }
            Err(e) => {
                // Quota state stays correct in memory; the write is retried
                // on the next mutation for this device.
                usage.dirty = true;
                warn!(device_id = %device_id, error = %e, "ledger write failed, will retry");
            }
        }
    }
}
