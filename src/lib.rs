//! Lifecycle and output-stream handling for media players that run as
//! external processes.

pub mod core;
pub mod engine;
pub mod parser;
pub mod player;
pub mod process;
pub mod relay;

pub use crate::core::{EngineConfig, EngineError, EngineResult, PlayerEvent};
pub use engine::{EngineAdapter, EngineKind, MediaRequest, PlayerState};
pub use player::Player;
pub use relay::{FinishReason, StreamRelay};
