//! Core domain entities.
//!
//! ## Clusters
//!
//! - **Catalog**: [`Model`], [`Preset`]
//! - **Fleet**: [`Miner`], [`BalanceConfig`], [`FirmwareFamily`]
//! - **Control loop bookkeeping**: [`Cooldown`], [`PendingChange`], [`ChangeLog`]
//! - **Telemetry**: [`EnergyReading`], [`SourceStatus`], [`SystemStatus`]
//! - **Derived (not persisted)**: [`MinerWithContext`], [`PresetChange`]

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId(pub Uuid);

/// Stable identifier for a [`Preset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetId(pub Uuid);

/// Stable identifier for a [`Miner`]; distinct from its (mutable) IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinerId(pub Uuid);

/// A normalized MAC address, the durable key for a [`Miner`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub String);

impl MacAddress {
    /// Normalizes to lowercase colon-separated form so upserts key reliably.
    pub fn normalize(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }
}

/// The firmware family a [`Miner`] was probed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareFamily {
    /// VNish REST firmware: the only family this system can switch presets on.
    VNish,
    /// Stock Bitmain CGI firmware: read-only in this system's model.
    Stock,
}

impl FirmwareFamily {
    /// Only VNish exposes per-miner preset switching in this system's model.
    pub fn is_balanceable(self) -> bool {
        matches!(self, FirmwareFamily::VNish)
    }
}

/// A family of miner hardware, curated with an operator-bounded preset range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    pub min_preset_id: Option<PresetId>,
    pub max_preset_id: Option<PresetId>,
}

impl Model {
    /// A model with either bound unset is not configured; its miners are
    /// excluded from balancing.
    pub fn is_configured(&self) -> bool {
        self.min_preset_id.is_some() && self.max_preset_id.is_some()
    }
}

/// A discrete power/hashrate operating point. Uniqueness is `(model_id, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: PresetId,
    pub model_id: ModelId,
    pub name: String,
    pub label: String,
    pub watts: u32,
    pub hashrate_th: f64,
    pub requires_modded_psu: bool,
    /// Order the firmware reported this preset in; used only for display.
    pub sort_order: i32,
}

/// A managed ASIC miner. Uniquely identified by MAC; IP is mutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Miner {
    pub id: MinerId,
    pub mac: MacAddress,
    pub ip: IpAddr,
    pub firmware_family: FirmwareFamily,
    pub model_id: Option<ModelId>,
    pub current_preset_id: Option<PresetId>,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Per-miner operator policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceConfig {
    pub miner_id: MinerId,
    pub enabled: bool,
    /// 0-100, default 50. Reserved for future priority-weighted selection.
    pub priority: u8,
    pub locked: bool,
}

impl BalanceConfig {
    /// The default row created atomically alongside a new miner (`enabled=false`).
    pub fn default_for(miner_id: MinerId) -> Self {
        Self {
            miner_id,
            enabled: false,
            priority: 50,
            locked: false,
        }
    }
}

/// `(miner, until_timestamp)`, at most one per miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldown {
    pub miner_id: MinerId,
    pub until: DateTime<Utc>,
}

/// Why a preset change was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeReason {
    Reduce,
    Increase,
    Emergency,
}

impl std::fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeReason::Reduce => "reduce",
            ChangeReason::Increase => "increase",
            ChangeReason::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

/// An in-flight power move whose effect the energy meter has not yet observed.
///
/// `expected_delta_w` is signed: positive = reduction (watts removed from the
/// load), negative = increase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: Uuid,
    pub miner_id: MinerId,
    pub from_preset_id: PresetId,
    pub to_preset_id: PresetId,
    pub expected_delta_w: i64,
    pub issued_at: DateTime<Utc>,
    pub settles_at: DateTime<Utc>,
}

impl PendingChange {
    pub fn is_settled(&self, now: DateTime<Utc>) -> bool {
        self.settles_at <= now
    }
}

/// Append-only audit row for every preset change attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLog {
    pub id: Uuid,
    pub miner_id: MinerId,
    pub model_id: Option<ModelId>,
    pub from_preset_name: String,
    pub to_preset_name: String,
    pub expected_delta_w: i64,
    pub reason: ChangeReason,
    pub margin_percent_at_issue: f64,
    pub success: bool,
    pub error: Option<String>,
    pub issued_at: DateTime<Utc>,
}

/// Health tag for one generation/consumption source, forwarded to the status view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub name: String,
    pub status: String,
    pub value_mw: Option<f64>,
}

/// Immutable history row produced by [`pb_shared_types`]'s `ReadingSource` port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyReading {
    pub timestamp: DateTime<Utc>,
    pub generation_mw: f64,
    pub consumption_mw: f64,
    pub margin_mw: f64,
    pub margin_percent: f64,
    pub sources: Vec<SourceStatus>,
}

impl EnergyReading {
    /// Computes margin fields from raw generation/consumption, guarding the divide.
    pub fn new(
        timestamp: DateTime<Utc>,
        generation_mw: f64,
        consumption_mw: f64,
        sources: Vec<SourceStatus>,
    ) -> Self {
        let margin_mw = generation_mw - consumption_mw;
        let margin_percent = if generation_mw > 0.0 {
            100.0 * margin_mw / generation_mw
        } else {
            0.0
        };
        Self {
            timestamp,
            generation_mw,
            consumption_mw,
            margin_mw,
            margin_percent,
            sources,
        }
    }
}

/// The five-state control machine driving the balance loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Idle,
    Reducing,
    Holding,
    Increasing,
    Emergency,
}

impl Default for ControlState {
    fn default() -> Self {
        ControlState::Idle
    }
}

/// Outbound dashboard/API read model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub state: ControlState,
    pub generation_mw: f64,
    pub consumption_mw: f64,
    pub margin_mw: f64,
    pub margin_percent: f64,
    pub pending_delta_w: i64,
    pub effective_margin_percent: f64,
    pub managed_miners_count: usize,
    pub miners_on_cooldown: usize,
    pub per_source_status: Vec<SourceStatus>,
    pub last_updated: DateTime<Utc>,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            state: ControlState::Idle,
            generation_mw: 0.0,
            consumption_mw: 0.0,
            margin_mw: 0.0,
            margin_percent: 0.0,
            pending_delta_w: 0,
            effective_margin_percent: 0.0,
            managed_miners_count: 0,
            miners_on_cooldown: 0,
            per_source_status: Vec::new(),
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Per-tick join of miner + model + current/min/max preset + config + cooldown.
/// Never persisted; assembled fresh by the store on every `GetManageableMiners`.
#[derive(Debug, Clone, PartialEq)]
pub struct MinerWithContext {
    pub miner: Miner,
    pub model: Model,
    pub current: Preset,
    pub min_preset: Preset,
    pub max_preset: Preset,
    pub config: BalanceConfig,
    pub cooldown: Option<Cooldown>,
    /// The model's full discovered preset menu, so strategy can search for
    /// intermediate operating points between `min_preset` and `max_preset`.
    pub presets: Vec<Preset>,
}

impl MinerWithContext {
    /// How much power may still be shed from this miner.
    pub fn headroom_w(&self) -> i64 {
        self.current.watts as i64 - self.min_preset.watts as i64
    }

    /// How much power may still be added to this miner.
    pub fn room_to_increase_w(&self) -> i64 {
        self.max_preset.watts as i64 - self.current.watts as i64
    }

    /// Hashrate per watt at the current preset; zero if either is zero.
    pub fn efficiency(&self) -> f64 {
        if self.current.watts == 0 || self.current.hashrate_th == 0.0 {
            0.0
        } else {
            self.current.hashrate_th / self.current.watts as f64
        }
    }

    pub fn on_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown.map(|c| now < c.until).unwrap_or(false)
    }
}

/// Upsert input for [`crate::ports`]'s store contract: `(model, name)`
/// idempotent preset attributes, as discovered by a driver's `list_presets`.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetSpec {
    pub model_id: ModelId,
    pub name: String,
    pub label: String,
    pub watts: u32,
    pub hashrate_th: f64,
    pub requires_modded_psu: bool,
    pub sort_order: i32,
}

/// Upsert input for a newly- or re-discovered miner.
#[derive(Debug, Clone, PartialEq)]
pub struct MinerSpec {
    pub mac: MacAddress,
    pub ip: IpAddr,
    pub firmware_family: FirmwareFamily,
    pub model_id: Option<ModelId>,
    pub current_preset_id: Option<PresetId>,
}

/// A proposed (and, once applied, executed) preset move.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetChange {
    pub miner_id: MinerId,
    pub ip: IpAddr,
    pub model_id: ModelId,
    pub from_preset: Preset,
    pub to_preset: Preset,
    /// Signed: positive = reduction, negative = increase.
    pub expected_delta_w: i64,
}
