use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    NotRunning,
    Ready,
    Buffering,
    Playing,
    Paused,
}

impl PlayerState {
    /// Running above Ready: media is loaded in the engine.
    pub fn is_active(self) -> bool {
        matches!(self, PlayerState::Buffering | PlayerState::Playing | PlayerState::Paused)
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlayerState::NotRunning => "not running",
            PlayerState::Ready => "ready",
            PlayerState::Buffering => "buffering",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub old: PlayerState,
    pub new: PlayerState,
}

/// Player state with deferred delivery.
///
/// `set_state` only records the latest value. `flush`, run once per loop
/// iteration, compares it against the last delivered state, so a burst of
/// changes collapses into one transition and a burst that comes back to
/// where it started delivers nothing.
#[derive(Debug)]
pub struct PlayerStateMachine {
    stable: PlayerState,
    pending: Option<PlayerState>,
}

impl Default for PlayerStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerStateMachine {
    pub fn new() -> Self {
        Self {
            stable: PlayerState::NotRunning,
            pending: None,
        }
    }

    pub fn set_state(&mut self, state: PlayerState) {
        if self.pending.is_some_and(|p| p != state) {
            log::trace!("State {:?} overwritten by {:?} before delivery", self.pending, state);
        }
        self.pending = Some(state);
    }

    /// Latest value, delivered or not.
    pub fn state(&self) -> PlayerState {
        self.pending.unwrap_or(self.stable)
    }

    /// Last state listeners have seen.
    pub fn stable(&self) -> PlayerState {
        self.stable
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some_and(|p| p != self.stable)
    }

    pub fn flush(&mut self) -> Option<Transition> {
        let new = self.pending.take()?;
        if new == self.stable {
            return None;
        }
        let transition = Transition { old: self.stable, new };
        self.stable = new;
        Some(transition)
    }
}
