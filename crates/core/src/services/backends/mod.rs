#[cfg(feature = "capstone-backend")]
pub mod capstone;

#[cfg(feature = "capstone-backend")]
pub use capstone::{CapstoneBackend, CapstoneHost};
