//! Per-device daily usage accounting
//!
//! Tracks how many episodes each device has played per calendar day (in the
//! server's reference time zone) and how much session time it has
//! accumulated. `try_consume` is the authoritative quota check and is
//! serialized per device, never globally.

mod ledger;
mod record;
mod store;

pub use ledger::{ConsumeResult, UsageLedger};
pub use record::DailyUsageRecord;
pub use store::{FsLedgerStore, LedgerStore, MemoryLedgerStore};
