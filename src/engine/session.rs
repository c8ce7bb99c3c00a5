use tokio::sync::broadcast;

use super::state::{PlayerState, PlayerStateMachine};
use crate::core::events::{EventSink, PlayerEvent};
use crate::parser::TrackKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: i32,
    pub name: String,
}

/// What the engine has told us about the current media.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    /// Deciseconds
    pub position: i64,
    /// Deciseconds, 0 when unknown
    pub length: i64,
    pub width: u32,
    pub height: u32,
    pub aspect: Option<f64>,
    pub audio_tracks: Vec<Track>,
    pub subtitle_tracks: Vec<Track>,
    pub cache_percent: u32,
}

impl MediaInfo {
    pub fn has_length(&self) -> bool {
        self.length > 0
    }

    /// Reported aspect if sane, otherwise derived from the size.
    pub fn effective_aspect(&self) -> Option<f64> {
        match self.aspect {
            Some(aspect) if aspect > 0.001 => Some(aspect),
            _ if self.height > 0 => Some(self.width as f64 / self.height as f64),
            _ => None,
        }
    }

    pub fn tracks(&self, kind: TrackKind) -> &[Track] {
        match kind {
            TrackKind::Audio => &self.audio_tracks,
            TrackKind::Subtitle => &self.subtitle_tracks,
        }
    }

    pub fn add_track(&mut self, kind: TrackKind, id: i32, name: String) {
        let tracks = match kind {
            TrackKind::Audio => &mut self.audio_tracks,
            TrackKind::Subtitle => &mut self.subtitle_tracks,
        };
        match tracks.iter_mut().find(|t| t.id == id) {
            Some(track) => track.name = name,
            None => tracks.push(Track { id, name }),
        }
    }

    pub fn track_names(&self, kind: TrackKind) -> Vec<String> {
        self.tracks(kind).iter().map(|t| t.name.clone()).collect()
    }
}

/// Per-player context shared by every engine variant: the state machine, the
/// media facts, the session epoch and the listeners.
#[derive(Debug, Default)]
pub struct EngineSession {
    state: PlayerStateMachine,
    pub media: MediaInfo,
    epoch: u64,
    events: EventSink,
    dimensions_dirty: bool,
    /// Times the engine went down from an active state with no listener left
    dangling_reports: usize,
}

impl EngineSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlayerState {
        self.state.state()
    }

    pub fn stable_state(&self) -> PlayerState {
        self.state.stable()
    }

    pub fn set_state(&mut self, state: PlayerState) {
        self.state.set_state(state);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Invalidates every job started under the current epoch.
    pub fn bump_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn dangling_reports(&self) -> usize {
        self.dangling_reports
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn emit(&self, event: PlayerEvent) {
        self.events.send(event);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.events.error(message);
    }

    pub fn set_width(&mut self, width: u32) {
        self.media.width = width;
        self.dimensions_dirty = true;
    }

    pub fn set_height(&mut self, height: u32) {
        self.media.height = height;
        self.dimensions_dirty = true;
    }

    pub fn set_aspect(&mut self, aspect: f64) {
        if aspect > 0.001 {
            self.media.aspect = Some(aspect);
            self.dimensions_dirty = true;
        }
    }

    pub fn set_position(&mut self, position: i64) {
        self.media.position = position;
        self.emit(PlayerEvent::Position(position));
    }

    pub fn set_length(&mut self, length: i64) {
        self.media.length = length;
        self.emit(PlayerEvent::Length(length));
    }

    pub fn publish_languages(&self) {
        self.emit(PlayerEvent::Languages {
            audio: self.media.track_names(TrackKind::Audio),
            subtitles: self.media.track_names(TrackKind::Subtitle),
        });
    }

    /// Forgets everything about the previous media.
    pub fn reset_media(&mut self) {
        self.media = MediaInfo::default();
        self.dimensions_dirty = false;
    }

    /// Delivers the deferred state transition and dimension update. Called
    /// once per event loop iteration.
    pub fn tick(&mut self) {
        if let Some(transition) = self.state.flush() {
            if transition.new == PlayerState::NotRunning
                && transition.old.is_active()
                && !self.events.has_listeners()
            {
                self.dangling_reports += 1;
                log::error!(
                    "Engine stopped from {} with nobody listening, its owner is gone",
                    transition.old
                );
            }
            log::debug!("State {} -> {}", transition.old, transition.new);
            self.emit(PlayerEvent::StateChanged {
                old: transition.old,
                new: transition.new,
            });
        }

        if self.dimensions_dirty {
            let media = &self.media;
            let complete = media.width > 0 && media.height > 0;
            if complete || media.aspect.is_some() {
                self.dimensions_dirty = false;
                self.emit(PlayerEvent::Dimensions {
                    width: media.width,
                    height: media.height,
                    aspect: media.effective_aspect(),
                });
            }
        }
    }
}
