use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::engine::PlayerState;

/// Notifications delivered to whoever drives the player (a UI, the helper
/// binary, a test).
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged { old: PlayerState, new: PlayerState },
    Dimensions { width: u32, height: u32, aspect: Option<f64> },
    /// Position in deciseconds
    Position(i64),
    /// Length in deciseconds
    Length(i64),
    Loading(u32),
    Languages { audio: Vec<String>, subtitles: Vec<String> },
    ReferenceUrl(String),
    InfoMessage(String),
    Marker { name: String, values: Vec<String> },
    Console(String),
    FrameGrabbed { path: PathBuf, success: bool },
    Error(String),
}

/// Broadcasts [`PlayerEvent`]s to every subscriber.
///
/// Sending never blocks and never holds a lock, so a subscriber that reacts by
/// issuing new commands cannot deadlock the engine.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<PlayerEvent>,
}

impl EventSink {
    const CAPACITY: usize = 256;

    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(Self::CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.sender.subscribe()
    }

    pub fn has_listeners(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    /// Returns false when nobody is listening.
    pub fn send(&self, event: PlayerEvent) -> bool {
        match self.sender.send(event) {
            Ok(_) => true,
            Err(broadcast::error::SendError(event)) => {
                log::trace!("No listener for {:?}", event);
                false
            }
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{}", message);
        self.send(PlayerEvent::Error(message));
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains everything currently queued on a receiver. Lagged notifications are
/// skipped.
pub fn drain_events(receiver: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                log::warn!("Listener lagged, {} events skipped", skipped);
            }
            Err(_) => break,
        }
    }
    events
}
