//! Inbound capability traits the core consumes, per `SPEC_FULL.md` section 6.
//!
//! These are the two "external collaborators" named in section 1: the
//! per-firmware `MinerDriver` and the energy `ReadingSource`. Concrete
//! adapters live in `pb-02-drivers` and `pb-03-reading-source`; everything
//! downstream (discovery, controller, balancer) depends only on these trait
//! objects.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::entities::{EnergyReading, FirmwareFamily, MacAddress};
use crate::errors::{DriverError, ReadingSourceError};

/// Information returned by a successful [`MinerDriver::probe`].
#[derive(Debug, Clone, PartialEq)]
pub struct MinerInfo {
    pub model_name: String,
    pub mac: MacAddress,
    pub firmware_version: String,
}

/// One entry of a firmware's discovered preset menu (section 6.2/6.3).
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPreset {
    pub name: String,
    pub label: String,
    pub watts: u32,
    pub hashrate_th: f64,
    pub requires_modded_psu: bool,
}

/// Per-firmware capability: probe, info, list presets, read/set current preset.
///
/// Implementations are assumed re-entrant and safe for concurrent use across
/// hosts (section 4.2). `set_preset` must be idempotent: calling it with the
/// miner's current preset name is a no-op from the firmware's perspective,
/// though the core still issues cooldown/pending bookkeeping (section 6.2).
#[async_trait]
pub trait MinerDriver: Send + Sync {
    /// The firmware family this driver recognizes.
    fn family(&self) -> FirmwareFamily;

    /// Probes a host; fails fast with [`DriverError::NotThisFirmware`] if the
    /// host isn't running this driver's firmware.
    async fn probe(&self, ip: IpAddr) -> Result<MinerInfo, DriverError>;

    /// Returns the full discovered preset menu.
    async fn list_presets(&self, ip: IpAddr) -> Result<Vec<DiscoveredPreset>, DriverError>;

    /// Returns the name of the preset currently active on the host.
    async fn current_preset(&self, ip: IpAddr) -> Result<String, DriverError>;

    /// Requests a preset change. The request is accepted synchronously;
    /// mechanical settling takes minutes (section 4.2).
    async fn set_preset(&self, ip: IpAddr, preset_name: &str) -> Result<(), DriverError>;
}

/// Snapshot provider for generation/consumption, per section 6.1.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn fetch(&self) -> Result<EnergyReading, ReadingSourceError>;
}
