//! Persistence layer for the power-balancing control plane.
//!
//! A light embedded store, not a general database: every query it serves is
//! one of the fixed set the balance and discovery loops actually issue
//! (section 4.1). Backed by [`sled`] with hand-maintained secondary indices
//! rather than a SQL engine, following the reference workspace's
//! `qc-02-block-storage` KV-plus-index convention.

pub mod domain;
pub mod engine;
pub mod ports;
pub mod service;

pub use engine::SledEngine;
pub use ports::{BalanceStore, KvEngine, SystemClock, TimeSource};
pub use service::Store;
