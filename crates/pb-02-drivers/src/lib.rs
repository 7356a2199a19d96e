//! Per-firmware `MinerDriver` adapters (section 4.2/6.2).
//!
//! Two concrete implementations today: [`VNishDriver`] (balanceable) and
//! [`StockDriver`] (read-only, cataloged but never selected by strategy).
//! Both are consumed only through the `pb_shared_types::MinerDriver` trait
//! object; nothing upstream names these types directly.

pub mod label;
pub mod stock;
pub mod vnish;

pub use label::parse_label;
pub use stock::StockDriver;
pub use vnish::VNishDriver;
