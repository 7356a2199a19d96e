//! Global `tracing` subscriber setup (section 10.1): `EnvFilter` with a
//! default `info` directive, overridable by `RUST_LOG`; `--json-logs`
//! swaps the human formatter for the JSON one.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_logs {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
