//! Error taxonomy. One `thiserror` enum per subsystem port boundary, per
//! `SPEC_FULL.md` section 10.3. None of these escape beyond their named
//! boundary: the balancer and discovery loops log-and-continue on all of
//! them except a configuration invariant violation, which is fatal at
//! startup (section 7).

use thiserror::Error;

/// Errors surfaced by the persistence layer (`pb-01-store`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage engine error: {0}")]
    Engine(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("model {0:?} has no presets matching its current/min/max pointers")]
    UnresolvedPreset(super::entities::ModelId),

    #[error("preset {preset_id:?} does not belong to model {model_id:?}")]
    PresetNotInModel {
        model_id: super::entities::ModelId,
        preset_id: super::entities::PresetId,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0} not found")]
    NotFound(String),
}

/// Errors surfaced by a `MinerDriver` implementation (`pb-02-drivers`).
#[derive(Debug, Error)]
pub enum DriverError {
    /// The probed host is not running this driver's firmware family.
    /// Swallowed by discovery; not logged as an error.
    #[error("host is not this firmware family")]
    NotThisFirmware,

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("firmware rejected the request: {0}")]
    Rejected(String),

    #[error("unexpected response shape: {0}")]
    MalformedResponse(String),
}

/// Errors surfaced by a `ReadingSource` implementation (`pb-03-reading-source`).
#[derive(Debug, Error)]
pub enum ReadingSourceError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed reading payload: {0}")]
    MalformedResponse(String),
}

/// Errors surfaced by the discovery subsystem (`pb-04-discovery`).
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("store error during discovery: {0}")]
    Store(#[from] StoreError),

    #[error("no drivers configured")]
    NoDriversConfigured,
}

/// Configuration invariant violations are fatal at startup (section 7);
/// never silently corrected.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("margin thresholds must satisfy emergency < critical < safe < recovery, got {emergency} < {critical} < {safe} < {recovery}")]
    ThresholdsOutOfOrder {
        emergency: f64,
        critical: f64,
        safe: f64,
        recovery: f64,
    },

    #[error("settle_time ({settle_time:?}) must be >= expected_meter_lag ({expected_meter_lag:?})")]
    SettleTimeTooShort {
        settle_time: std::time::Duration,
        expected_meter_lag: std::time::Duration,
    },

    #[error("at least one CIDR must be configured for discovery")]
    NoCidrsConfigured,

    #[error("invalid CIDR {0:?}: {1}")]
    InvalidCidr(String, String),

    #[error("max_parallel_emergency must be at least 1")]
    ZeroParallelEmergency,

    #[error("vnish_password must be set when any discovery CIDR is configured")]
    MissingVNishCredentials,
}
