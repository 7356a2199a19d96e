//! `ReadingSource` adapters (section 6.1): the HTTP aggregator poller used
//! in production, and a deterministic in-memory fake for tests.

pub mod fake;
pub mod http;

pub use fake::FakeReadingSource;
pub use http::HttpReadingSource;
