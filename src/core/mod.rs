pub mod config;
pub mod error;
pub mod events;

#[cfg(test)]
mod config_test;

pub use config::*;
pub use error::*;
pub use events::*;
