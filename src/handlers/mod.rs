pub mod config;
pub mod pitches;

pub use config::*;
pub use pitches::*;
