//! # Shared Types Crate
//!
//! Domain entities, error taxonomy, and configuration shared across every
//! balancer subsystem. This is the single source of truth for type
//! definitions described in `SPEC_FULL.md` section 3 (Data Model) and
//! section 6.4 (Configuration).

pub mod config;
pub mod entities;
pub mod errors;
pub mod ports;

pub use config::BalancerConfig;
pub use entities::*;
pub use errors::{ConfigError, DiscoveryError, DriverError, ReadingSourceError, StoreError};
pub use ports::{DiscoveredPreset, MinerDriver, MinerInfo, ReadingSource};
