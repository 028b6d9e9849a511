pub mod backends;
pub mod config;
pub mod export;
pub mod metadata;
pub mod tags;

pub use backends::*;
pub use config::*;
pub use export::*;
pub use metadata::*;
pub use tags::*;
