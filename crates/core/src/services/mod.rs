//! Services that drive an analysis host: the host abstraction, its backends,
//! and the mnemonic/import exporter built on top of them.

pub mod backends;
pub mod export;
pub mod host;
