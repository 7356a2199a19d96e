//! The balance loop: periodic tick, five-state control machine, and the
//! shared status snapshot (section 4.6, 9, 10.5).

pub mod balancer;
pub mod config;

pub use balancer::Balancer;
pub use config::BalancerRuntimeConfig;
