pub mod inbound;
pub mod outbound;

pub use inbound::BalanceStore;
pub use outbound::{KvEngine, SystemClock, TimeSource};
