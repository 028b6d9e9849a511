//! Tracing setup for the `bintag` binary.
//!
//! Logs go to stderr; stdout carries command output only.

use std::io;
use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Level used when `RUST_LOG` is unset, from the number of `-v` flags.
pub fn default_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the global tracing subscriber. Subsequent calls are ignored.
pub fn init_tracing(verbosity: u8, json: bool) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level(verbosity)));
        let registry = tracing_subscriber::registry().with(env_filter);

        // A subscriber installed elsewhere (e.g. by a test harness) wins.
        let _ = if json {
            registry
                .with(fmt::layer().json().with_writer(io::stderr).with_target(true))
                .try_init()
        } else {
            registry.with(fmt::layer().with_writer(io::stderr).with_target(false)).try_init()
        };
    });
}
