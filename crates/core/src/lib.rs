//! bintag-core
//!
//! Core library for mnemonic-histogram tagging of native binaries.
//!
//! This crate defines the data model, the histogram and similarity logic,
//! the analysis-host abstraction with its capstone backend, the metadata
//! sidecar reader, Python-compatible JSON output, the on-disk tag store,
//! and the per-user configuration.
//!
//! All substantive logic lives here so it is testable without the CLI.

pub mod model;
pub mod analysis;
pub mod services;
pub mod metadata;
pub mod format;
pub mod tags;
pub mod config;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
