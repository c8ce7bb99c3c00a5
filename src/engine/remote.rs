use std::path::Path;

use super::adapter::{ColorKind, EngineAdapter, EngineKind, MediaRequest, SharedAdjustments};
use super::bus::{decode, encode, BusCall, BusNotification, LineDecoder};
use super::session::{EngineSession, Track};
use super::state::PlayerState;
use crate::core::config::EngineConfig;
use crate::core::error::EngineError;
use crate::core::events::PlayerEvent;
use crate::process::{LaunchSpec, OutputStream, ProcessEvent, ProcessEventKind, StopOutcome, Transport};

/// Engine living in a separate helper process that is spoken to with
/// fire-and-forget calls. The helper counts as alive once it has announced
/// itself with a `running` notification.
pub struct RemoteEngine {
    config: EngineConfig,
    session: EngineSession,
    transport: Box<dyn Transport>,
    stdout: LineDecoder,
    stderr: LineDecoder,
    adjustments: SharedAdjustments,
    media: Option<MediaRequest>,
    service: Option<String>,
    play_when_registered: bool,
    seek_pending: bool,
    needs_restart: bool,
    restart_position: Option<i64>,
    reseek_on_playing: Option<i64>,
}

impl RemoteEngine {
    pub fn new(config: EngineConfig, transport: Box<dyn Transport>, adjustments: SharedAdjustments) -> Self {
        Self {
            config,
            session: EngineSession::new(),
            transport,
            stdout: LineDecoder::new(),
            stderr: LineDecoder::new(),
            adjustments,
            media: None,
            service: None,
            play_when_registered: false,
            seek_pending: false,
            needs_restart: false,
            restart_position: None,
            reseek_on_playing: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.service.is_some() && self.transport.is_running()
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    fn call(&mut self, call: BusCall) -> bool {
        if !self.transport.is_running() {
            log::debug!("Dropping {:?}, helper not running", call);
            return false;
        }
        let line = match encode(&call) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to encode {:?}: {}", call, e);
                return false;
            }
        };
        match self.transport.write(&line) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to send {:?}: {}", call, e);
                false
            }
        }
    }

    fn switch_track(&mut self, call: BusCall, available: usize, index: usize) -> bool {
        if index >= available {
            log::warn!("No track at index {}", index);
            return false;
        }
        if !self.transport.is_running() {
            return false;
        }
        if self.is_alive() && self.session.state().is_active() {
            self.needs_restart = true;
            self.restart_position = Some(self.session.media.position);
            self.call(BusCall::Stop);
        }
        self.call(call)
    }

    fn handle_notification(&mut self, notification: BusNotification) {
        log::trace!("Helper notification {:?}", notification);
        match notification {
            BusNotification::Running { service } => {
                log::info!("Helper registered as {}", service);
                self.service = Some(service);
                self.session.set_state(PlayerState::Ready);
                if std::mem::take(&mut self.play_when_registered) {
                    self.play();
                }
            }
            BusNotification::Loading { percent } => self.session.emit(PlayerEvent::Loading(percent)),
            BusNotification::StreamInfo { length, aspect } => {
                self.session.set_length(length);
                self.session.set_aspect(aspect);
            }
            BusNotification::Playing => {
                self.session.set_state(PlayerState::Playing);
                if let Some(position) = self.reseek_on_playing.take() {
                    self.seek(position, true);
                }
            }
            BusNotification::Paused => self.session.set_state(PlayerState::Paused),
            BusNotification::Progress { pos } => {
                self.seek_pending = false;
                self.session.set_position(pos);
            }
            BusNotification::Eof => {
                self.seek_pending = false;
                self.session.set_state(PlayerState::Ready);
                if self.needs_restart {
                    self.needs_restart = false;
                    self.reseek_on_playing = self.restart_position.take().filter(|p| *p > 0);
                    self.play();
                }
            }
            BusNotification::Dimensions { width, height } => {
                self.session.set_width(width);
                self.session.set_height(height);
            }
            BusNotification::Languages { audio, subtitles } => {
                let to_tracks = |names: Vec<String>| {
                    names
                        .into_iter()
                        .enumerate()
                        .map(|(i, name)| Track { id: i as i32, name })
                        .collect::<Vec<_>>()
                };
                self.session.media.audio_tracks = to_tracks(audio);
                self.session.media.subtitle_tracks = to_tracks(subtitles);
                self.session.publish_languages();
            }
            BusNotification::Error { message } => {
                self.session.error(message);
                self.session.set_state(PlayerState::Ready);
            }
        }
    }

    fn handle_exit(&mut self, code: Option<i32>) {
        log::info!("Helper exited with {:?}", code);
        self.service = None;
        self.seek_pending = false;
        self.needs_restart = false;
        self.reseek_on_playing = None;
        self.stdout.reset();
        self.stderr.reset();
        self.session.set_state(PlayerState::NotRunning);
    }
}

impl EngineAdapter for RemoteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Remote
    }

    fn session(&self) -> &EngineSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut EngineSession {
        &mut self.session
    }

    fn set_media(&mut self, media: MediaRequest) {
        if self.media.as_ref().map(|m| &m.url) != Some(&media.url) {
            self.session.reset_media();
        }
        self.media = Some(media);
    }

    fn media(&self) -> Option<&MediaRequest> {
        self.media.as_ref()
    }

    fn ready(&mut self) -> bool {
        if self.transport.is_running() {
            return true;
        }
        let helper = &self.config.helper;
        let mut spec = LaunchSpec::new(&helper.path)
            .args(helper.args.iter().cloned())
            .args(["--cb".to_string(), helper.callback_address.clone()])
            .command_channel(true);
        if let Some(wid) = self.media.as_ref().and_then(|m| m.window_id) {
            spec = spec.args(["--wid".to_string(), wid.to_string()]);
        }
        if let Some(url) = self.media.as_ref().map(|m| m.url.clone()) {
            spec = spec.target_url(url);
        }

        self.stdout.reset();
        self.stderr.reset();
        match self.transport.start(spec) {
            Ok(generation) => {
                log::debug!("Helper launched (generation {}), waiting for registration", generation);
                true
            }
            Err(e) => {
                self.session.error(e.to_string());
                self.session.set_state(PlayerState::NotRunning);
                false
            }
        }
    }

    fn play(&mut self) -> bool {
        if !self.is_alive() {
            self.play_when_registered = true;
            return self.ready();
        }
        match self.session.state() {
            PlayerState::Paused => self.call(BusCall::Pause),
            PlayerState::Buffering | PlayerState::Playing => true,
            PlayerState::NotRunning | PlayerState::Ready => {
                let Some(media) = self.media.clone() else {
                    self.session.error(EngineError::NoMedia.to_string());
                    return false;
                };
                self.session.media.position = 0;
                if self.call(BusCall::NewStream {
                    url: media.url,
                    window_id: media.window_id,
                }) {
                    self.session.set_state(PlayerState::Buffering);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn pause(&mut self) -> bool {
        match self.session.state() {
            PlayerState::Playing if self.is_alive() => self.call(BusCall::Pause),
            PlayerState::Paused => true,
            _ => false,
        }
    }

    fn unpause(&mut self) -> bool {
        match self.session.state() {
            PlayerState::Paused if self.is_alive() => self.call(BusCall::Pause),
            _ => true,
        }
    }

    fn stop(&mut self) {
        self.session.bump_epoch();
        self.play_when_registered = false;
        self.needs_restart = false;
        self.restart_position = None;
        self.reseek_on_playing = None;
        if self.is_alive() {
            if self.session.state().is_active() {
                self.call(BusCall::Stop);
            }
            self.session.set_state(PlayerState::Ready);
        } else {
            self.session.set_state(PlayerState::NotRunning);
        }
    }

    fn quit(&mut self) {
        self.stop();
        if self.transport.is_running() {
            self.call(BusCall::Quit);
            if self.transport.quit(self.config.quit_timeout()) == StopOutcome::Unreaped {
                self.session.error(EngineError::StopTimeout.to_string());
            }
        }
        self.service = None;
        self.session.set_state(PlayerState::NotRunning);
    }

    fn seek(&mut self, pos: i64, absolute: bool) -> bool {
        if !self.is_alive() || self.session.state() != PlayerState::Playing {
            return false;
        }
        if self.seek_pending {
            log::debug!("Seek to {} rejected, previous seek unacknowledged", pos);
            return false;
        }
        if self.call(BusCall::Seek { pos, absolute }) {
            self.seek_pending = true;
            true
        } else {
            false
        }
    }

    fn set_volume(&mut self, delta: i32, absolute: bool) -> bool {
        if !self.is_alive() || self.session.state() != PlayerState::Playing {
            return false;
        }
        let delta = self.adjustments.update(|a| {
            let delta = if absolute { delta - a.volume } else { delta };
            a.volume += delta;
            delta
        });
        if delta == 0 {
            return true;
        }
        self.call(BusCall::Volume { delta })
    }

    fn set_color(&mut self, kind: ColorKind, _value: i32, _absolute: bool) -> bool {
        log::debug!("Helper has no {} control", kind.command());
        false
    }

    fn set_audio_track(&mut self, index: usize) -> bool {
        let available = self.session.media.audio_tracks.len();
        self.switch_track(BusCall::AudioTrack { index }, available, index)
    }

    fn set_subtitle_track(&mut self, index: usize) -> bool {
        let available = self.session.media.subtitle_tracks.len();
        self.switch_track(BusCall::SubtitleTrack { index }, available, index)
    }

    fn grab_frame(&mut self, _path: &Path, _pos: Option<i64>) -> bool {
        false
    }

    fn handle_process_event(&mut self, event: ProcessEvent) {
        if event.generation != self.transport.generation() {
            log::debug!("Discarding helper event of stale generation {}", event.generation);
            return;
        }
        match event.kind {
            ProcessEventKind::Output { stream: OutputStream::Stdout, data } => {
                for line in self.stdout.feed(&data) {
                    match decode::<BusNotification>(&line) {
                        Some(notification) => self.handle_notification(notification),
                        None => log::debug!("helper: {}", line),
                    }
                }
            }
            ProcessEventKind::Output { stream: OutputStream::Stderr, data } => {
                for line in self.stderr.feed(&data) {
                    log::debug!("helper: {}", line);
                }
            }
            ProcessEventKind::Exited { code } => self.handle_exit(code),
            ProcessEventKind::Started | ProcessEventKind::Drained => {}
        }
    }

    fn poll(&mut self) {
        self.transport.poll();
    }
}
