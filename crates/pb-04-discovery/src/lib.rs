//! The discovery subsystem: CIDR scanning, ordered driver probing, and
//! catalog/fleet upsert (section 4.7).

pub mod config;
pub mod scanner;
pub mod service;

pub use config::DiscoveryRuntimeConfig;
pub use service::{DiscoveryService, DiscoverySummary};
