//! Key namespacing and ordering.
//!
//! Mirrors the reference workspace's block-storage `KeyPrefix` convention:
//! every entity lives under a short namespace prefix, and any key a hot-path
//! query needs to range-scan (by settlement time, by cooldown expiry, by
//! reading timestamp) is additionally indexed under a key whose suffix is a
//! big-endian millisecond timestamp, so lexicographic byte order matches
//! chronological order (section 4.1.1).

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Namespace prefixes for the primary records.
pub enum KeyPrefix {
    Model,
    ModelByName,
    Preset,
    PresetByModelName,
    Miner,
    MinerByMac,
    BalanceConfig,
    Cooldown,
    CooldownByUntil,
    Pending,
    PendingBySettlesAt,
    Reading,
    ChangeLog,
}

impl KeyPrefix {
    fn tag(&self) -> &'static [u8] {
        match self {
            KeyPrefix::Model => b"model/",
            KeyPrefix::ModelByName => b"model_by_name/",
            KeyPrefix::Preset => b"preset/",
            KeyPrefix::PresetByModelName => b"preset_by_model_name/",
            KeyPrefix::Miner => b"miner/",
            KeyPrefix::MinerByMac => b"miner_by_mac/",
            KeyPrefix::BalanceConfig => b"balance_config/",
            KeyPrefix::Cooldown => b"cooldown/",
            KeyPrefix::CooldownByUntil => b"cooldown_by_until/",
            KeyPrefix::Pending => b"pending/",
            KeyPrefix::PendingBySettlesAt => b"pending_by_settles_at/",
            KeyPrefix::Reading => b"reading/",
            KeyPrefix::ChangeLog => b"changelog/",
        }
    }

    pub fn prefix(&self) -> Vec<u8> {
        self.tag().to_vec()
    }
}

pub fn uuid_key(prefix: &KeyPrefix, id: Uuid) -> Vec<u8> {
    let mut k = prefix.prefix();
    k.extend_from_slice(id.as_bytes());
    k
}

pub fn string_key(prefix: &KeyPrefix, s: &str) -> Vec<u8> {
    let mut k = prefix.prefix();
    k.extend_from_slice(s.as_bytes());
    k
}

/// `<model_uuid>/<name>` composite key used for the preset-uniqueness index.
pub fn model_name_key(prefix: &KeyPrefix, model_id: Uuid, name: &str) -> Vec<u8> {
    let mut k = prefix.prefix();
    k.extend_from_slice(model_id.as_bytes());
    k.push(b'/');
    k.extend_from_slice(name.as_bytes());
    k
}

/// Big-endian millisecond timestamp so byte order == chronological order.
pub fn timestamp_millis_be(ts: DateTime<Utc>) -> [u8; 8] {
    ts.timestamp_millis().to_be_bytes()
}

pub fn millis_be_to_timestamp(bytes: &[u8; 8]) -> DateTime<Utc> {
    let millis = i64::from_be_bytes(*bytes);
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// `<timestamp_be><uuid>` composite key for time-ordered indices.
pub fn timestamp_id_key(prefix: &KeyPrefix, ts: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    let mut k = prefix.prefix();
    k.extend_from_slice(&timestamp_millis_be(ts));
    k.extend_from_slice(id.as_bytes());
    k
}
