//! Outbound ports: what the service needs from the outside world.

use chrono::{DateTime, Utc};
use pb_shared_types::StoreError;

/// Abstraction over the embedded key/value engine backing the store.
///
/// `sled::Db` is the only production implementation (section 10.6); the
/// trait exists so the service layer never names `sled` directly, per the
/// reference workspace's hexagonal ports/adapters split.
pub trait KvEngine: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn remove(&self, key: &[u8]) -> Result<(), StoreError>;
    /// Returns every `(key, value)` pair whose key starts with `prefix`,
    /// in ascending key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
    /// Returns every `(key, value)` pair with `start <= key < end`, in
    /// ascending key order.
    fn scan_range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
    /// Applies every `(key, value)` insert in one atomic batch: either all
    /// of them land or none do. Used for multi-key writes the spec calls
    /// out as a transactional pair (e.g. a miner record and its default
    /// `BalanceConfig`), so a crash mid-write can never leave one without
    /// the other.
    fn apply_batch(&self, writes: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError>;
    fn flush(&self) -> Result<(), StoreError>;
}

/// Clock abstraction so cooldown/settlement sweeps are deterministic in tests.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`TimeSource`] used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
