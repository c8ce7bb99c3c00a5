// =============================================================================
// MPLAYER ENGINE - TEXT COMMANDS OVER A PIPE
// =============================================================================
//
// Drives an MPlayer-like engine in slave mode: one process per playback,
// commands written line by line through the CommandQueue, status parsed from
// its output. The engine has no live track switch, so changing the audio or
// subtitle track restarts it and seeks back to where it was.
//
// Frame grabs run a second, one-shot engine process that writes a single jpeg
// into a scratch directory.
//
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::adapter::{ColorKind, EngineAdapter, EngineKind, MediaRequest, SharedAdjustments};
use super::session::EngineSession;
use super::state::PlayerState;
use crate::core::config::EngineConfig;
use crate::core::error::EngineError;
use crate::core::events::PlayerEvent;
use crate::parser::{OutputParser, ParsedEvent, PatternSet, TrackKind};
use crate::process::{CommandQueue, LaunchSpec, ProcessEvent, ProcessEventKind, StopOutcome, Transport};

/// A frame grab in progress
#[derive(Debug)]
struct GrabJob {
    epoch: u64,
    generation: u64,
    dir: PathBuf,
    target: PathBuf,
    deadline: Instant,
}

pub struct MPlayerEngine {
    config: EngineConfig,
    session: EngineSession,
    transport: Box<dyn Transport>,
    grabber: Box<dyn Transport>,
    parser: OutputParser,
    grab_parser: OutputParser,
    queue: CommandQueue,
    adjustments: SharedAdjustments,
    media: Option<MediaRequest>,
    /// Seek sent but not yet confirmed by a position update
    requested_seek: Option<i64>,
    needs_restart: bool,
    restart_position: Option<i64>,
    audio_id: Option<i32>,
    subtitle_id: Option<i32>,
    pending_reference: Option<String>,
    grab: Option<GrabJob>,
}

fn is_device_url(url: &str) -> bool {
    ["dvd://", "dvdnav://", "vcd://", "tv://"]
        .iter()
        .any(|prefix| url.starts_with(prefix))
}

impl MPlayerEngine {
    pub fn new(
        config: EngineConfig,
        transport: Box<dyn Transport>,
        grabber: Box<dyn Transport>,
        patterns: PatternSet,
        adjustments: SharedAdjustments,
    ) -> Self {
        Self {
            config,
            session: EngineSession::new(),
            transport,
            grabber,
            parser: OutputParser::new(patterns.clone()),
            grab_parser: OutputParser::new(patterns),
            queue: CommandQueue::new(),
            adjustments,
            media: None,
            requested_seek: None,
            needs_restart: false,
            restart_position: None,
            audio_id: None,
            subtitle_id: None,
            pending_reference: None,
            grab: None,
        }
    }

    fn send_command(&mut self, command: &str) -> bool {
        self.queue.push(self.transport.as_mut(), command)
    }

    /// Arguments for a playback process, URL last.
    pub fn build_args(&self, media: &MediaRequest) -> Vec<String> {
        let config = &self.config;
        let mut args: Vec<String> = Vec::new();

        if let Some(wid) = media.window_id {
            args.extend(["-wid".to_string(), wid.to_string()]);
        } else if media.root_window {
            args.push("-rootwin".to_string());
        }
        args.push("-slave".to_string());

        if let Some(vo) = config.video_driver.as_deref().filter(|d| !d.is_empty()) {
            args.extend(["-vo".to_string(), vo.to_string()]);
            if vo.starts_with("x11") && config.keep_size_ratio {
                args.push("-zoom".to_string());
            }
        }
        if let Some(ao) = config.audio_driver.as_deref().filter(|d| !d.is_empty()) {
            args.extend(["-ao".to_string(), ao.to_string()]);
        }
        if config.framedrop {
            args.push("-framedrop".to_string());
        }
        args.extend(config.mplayer.additional_args.iter().cloned());
        if let Some(filter) = config.post_processing.as_deref().filter(|f| !f.is_empty()) {
            args.extend(["-vf".to_string(), filter.to_string()]);
        }
        if config.colors.auto_adjust {
            let adjustments = self.adjustments.get();
            for kind in [ColorKind::Contrast, ColorKind::Brightness, ColorKind::Hue, ColorKind::Saturation] {
                args.push(format!("-{}", kind.command()));
                args.push(adjustments.color(kind).to_string());
            }
        }
        if let Some(aid) = self.audio_id {
            args.extend(["-aid".to_string(), aid.to_string()]);
        }
        if let Some(sid) = self.subtitle_id {
            args.extend(["-sid".to_string(), sid.to_string()]);
        }

        let local = media.local_path();
        let cache = config.mplayer.cache_size_kb;
        if local.is_none() && cache > 3 && !is_device_url(&media.url) {
            args.extend(["-cache".to_string(), cache.to_string()]);
        }
        if config.mplayer.always_build_index {
            let indexable = local
                .as_ref()
                .and_then(|p| p.extension())
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("avi") || e.eq_ignore_ascii_case("divx"));
            if indexable {
                args.push("-idx".to_string());
            }
        }
        if media.repeat > 0 {
            args.extend(["-loop".to_string(), (media.repeat + 1).to_string()]);
        } else if config.loop_playback {
            args.extend(["-loop".to_string(), "0".to_string()]);
        }
        args.push("-identify".to_string());
        if let Some(sub) = media.subtitle.as_deref().filter(|s| !s.is_empty()) {
            args.extend(["-sub".to_string(), sub.to_string()]);
        }

        match local {
            Some(path) => args.push(path.to_string_lossy().to_string()),
            None => args.push(media.url.clone()),
        }
        args
    }

    fn launch_spec(&self, media: &MediaRequest) -> LaunchSpec {
        let mut spec = LaunchSpec::new(&self.config.mplayer.path)
            .args(self.build_args(media))
            .target_url(&media.url)
            .command_channel(true);
        if let Some(dir) = media.local_path().and_then(|p| p.parent().map(Path::to_path_buf)) {
            if !dir.as_os_str().is_empty() {
                spec = spec.working_dir(dir);
            }
        }
        spec
    }

    fn flush_reference(&mut self) {
        if let Some(url) = self.pending_reference.take() {
            log::debug!("Reference to {}", url);
            self.session.emit(PlayerEvent::ReferenceUrl(url));
        }
    }

    fn switch_track(&mut self, kind: TrackKind, index: usize) -> bool {
        let Some(id) = self.session.media.tracks(kind).get(index).map(|t| t.id) else {
            log::warn!("No {:?} track at index {}", kind, index);
            return false;
        };
        match kind {
            TrackKind::Audio => self.audio_id = Some(id),
            TrackKind::Subtitle => self.subtitle_id = Some(id),
        }
        if !self.transport.is_running() {
            return true;
        }
        // The engine can't switch live; quit and let the exit restart it
        self.restart_position = Some(self.session.media.position);
        self.needs_restart = true;
        self.send_command("quit")
    }

    fn handle_parsed(&mut self, event: ParsedEvent) {
        match event {
            ParsedEvent::Position { deciseconds } => {
                self.requested_seek = None;
                self.session.set_position(deciseconds);
                if self.session.state() == PlayerState::Paused {
                    self.session.set_state(PlayerState::Playing);
                }
            }
            ParsedEvent::Length { deciseconds } => self.session.set_length(deciseconds),
            ParsedEvent::Cache { percent } => {
                self.session.media.cache_percent = percent;
                self.session.emit(PlayerEvent::Loading(percent));
            }
            ParsedEvent::IndexProgress { percent } => self.session.emit(PlayerEvent::Loading(percent)),
            ParsedEvent::Paused => self.session.set_state(PlayerState::Paused),
            ParsedEvent::Started => {
                self.flush_reference();
                self.session.publish_languages();
                self.session.set_state(PlayerState::Playing);
            }
            ParsedEvent::ReferenceUrl(url) => {
                self.flush_reference();
                let current = self.media.as_ref();
                let is_current = current.is_some_and(|m| {
                    m.url == url || m.local_path().is_some_and(|p| p.to_string_lossy() == url)
                });
                if !is_current {
                    self.pending_reference = Some(url);
                }
            }
            ParsedEvent::ReferenceFile => self.pending_reference = None,
            ParsedEvent::VideoWidth(width) => self.session.set_width(width),
            ParsedEvent::VideoHeight(height) => self.session.set_height(height),
            ParsedEvent::VideoAspect(aspect) => self.session.set_aspect(aspect),
            ParsedEvent::Size { width, height } => {
                self.session.set_width(width);
                self.session.set_height(height);
            }
            ParsedEvent::LanguageTrack { id, name, kind } => self.session.media.add_track(kind, id, name),
            ParsedEvent::StreamTitle(title) => self.session.emit(PlayerEvent::InfoMessage(title)),
            ParsedEvent::Error(message) => self.fail(message),
            ParsedEvent::OpenFailed { target, message } => {
                if self.is_media_target(&target) {
                    self.fail(message);
                } else {
                    log::warn!("mplayer: {}", message);
                    self.session.emit(PlayerEvent::Console(message));
                }
            }
            ParsedEvent::Marker { name, values } => {
                log::debug!("Marker {} {:?}", name, values);
                self.session.emit(PlayerEvent::Marker { name, values });
            }
            ParsedEvent::Text(text) => {
                log::debug!("mplayer: {}", text);
                self.session.emit(PlayerEvent::Console(text));
            }
        }
    }

    /// Fatal engine output: report it, drop to Ready and let the process go.
    fn fail(&mut self, message: String) {
        self.session.error(message);
        self.session.set_state(PlayerState::Ready);
        self.send_command("quit");
    }

    fn is_media_target(&self, target: &str) -> bool {
        let Some(media) = self.media.as_ref() else {
            return false;
        };
        if target.starts_with(&media.url) {
            return true;
        }
        media
            .local_path()
            .is_some_and(|p| target.starts_with(p.to_string_lossy().as_ref()))
    }

    fn handle_exit(&mut self, code: Option<i32>) {
        for event in self.parser.finish() {
            self.handle_parsed(event);
        }
        self.flush_reference();
        let dropped = self.queue.clear();
        if !dropped.is_empty() {
            log::debug!("Engine exited with unsent commands {:?}", dropped);
        }
        self.requested_seek = None;
        log::debug!("mplayer exited with {:?}", code);

        self.session.set_state(PlayerState::Ready);
        if self.needs_restart {
            self.needs_restart = false;
            let position = self.restart_position.take();
            if self.play() {
                if let Some(position) = position {
                    self.seek(position, true);
                }
            }
        }
    }

    fn handle_grab_event(&mut self, kind: ProcessEventKind) {
        match kind {
            ProcessEventKind::Output { data, .. } => {
                for event in self.grab_parser.feed(&data) {
                    if event == ParsedEvent::Started {
                        self.session.set_state(PlayerState::Playing);
                    }
                }
            }
            ProcessEventKind::Exited { .. } => {
                let Some(job) = self.grab.take() else {
                    return;
                };
                if job.epoch != self.session.epoch() {
                    log::debug!("Discarding frame grab from epoch {}", job.epoch);
                    let _ = std::fs::remove_dir_all(&job.dir);
                    return;
                }
                let success = Self::collect_grab(&job);
                self.session.emit(PlayerEvent::FrameGrabbed {
                    path: job.target.clone(),
                    success,
                });
                self.session.set_state(PlayerState::Ready);
            }
            ProcessEventKind::Started | ProcessEventKind::Drained => {}
        }
    }

    /// Moves the first produced frame to the target and removes the scratch
    /// directory.
    fn collect_grab(job: &GrabJob) -> bool {
        let mut frames: Vec<PathBuf> = match std::fs::read_dir(&job.dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(e) => {
                log::warn!("Failed to read grab directory {}: {}", job.dir.display(), e);
                Vec::new()
            }
        };
        frames.sort();

        let success = match frames.first() {
            Some(frame) => match std::fs::rename(frame, &job.target) {
                Ok(()) => true,
                Err(_) => std::fs::copy(frame, &job.target).is_ok(),
            },
            None => false,
        };
        if let Err(e) = std::fs::remove_dir_all(&job.dir) {
            log::debug!("Failed to remove {}: {}", job.dir.display(), e);
        }
        if success {
            log::info!("Grabbed frame to {}", job.target.display());
        } else {
            log::warn!("Frame grab produced no image");
        }
        success
    }

    fn cancel_grab(&mut self) {
        if let Some(job) = self.grab.take() {
            log::debug!("Cancelling frame grab to {}", job.target.display());
            self.grabber.quit(Duration::ZERO);
            let _ = std::fs::remove_dir_all(&job.dir);
        }
    }

    /// Gives up on a grab process that outlived the grab timeout.
    fn expire_grab(&mut self) {
        if !self.grab.as_ref().is_some_and(|job| Instant::now() >= job.deadline) {
            return;
        }
        let Some(job) = self.grab.take() else {
            return;
        };
        log::warn!("Frame grab to {} timed out", job.target.display());
        self.grabber.quit(Duration::ZERO);
        if let Err(e) = std::fs::remove_dir_all(&job.dir) {
            log::debug!("Failed to remove {}: {}", job.dir.display(), e);
        }
        self.session.emit(PlayerEvent::FrameGrabbed {
            path: job.target,
            success: false,
        });
        self.session.set_state(PlayerState::Ready);
    }

    fn terminate(&mut self) {
        self.session.bump_epoch();
        self.cancel_grab();
        self.needs_restart = false;
        self.restart_position = None;

        if self.transport.is_running() {
            // Bypasses the queue so it doesn't wait behind a stuck command
            if let Err(e) = self.transport.write(b"quit\n") {
                log::debug!("Failed to send quit: {}", e);
            }
            let outcome = self.transport.quit(self.config.quit_timeout());
            if outcome == StopOutcome::Unreaped {
                self.session.error(EngineError::StopTimeout.to_string());
            }
        }
        self.queue.clear();
        self.requested_seek = None;
        self.parser.reset();
        self.flush_reference();
        self.session.set_state(PlayerState::NotRunning);
    }
}

impl EngineAdapter for MPlayerEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::MPlayer
    }

    fn session(&self) -> &EngineSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut EngineSession {
        &mut self.session
    }

    fn set_media(&mut self, media: MediaRequest) {
        let same_url = self.media.as_ref().is_some_and(|m| m.url == media.url);
        if !same_url {
            self.audio_id = None;
            self.subtitle_id = None;
            self.session.reset_media();
        }
        self.media = Some(media);
    }

    fn media(&self) -> Option<&MediaRequest> {
        self.media.as_ref()
    }

    fn ready(&mut self) -> bool {
        if self.session.state() == PlayerState::NotRunning {
            self.session.set_state(PlayerState::Ready);
        }
        true
    }

    fn play(&mut self) -> bool {
        if self.transport.is_running() {
            if self.session.state() == PlayerState::Paused {
                return self.unpause();
            }
            return true;
        }
        let Some(media) = self.media.clone() else {
            self.session.error(EngineError::NoMedia.to_string());
            return false;
        };
        if self.grab.is_some() {
            self.cancel_grab();
        }

        let spec = self.launch_spec(&media);
        self.parser.reset();
        self.queue.clear();
        self.requested_seek = None;
        self.session.media.position = 0;

        match self.transport.start(spec) {
            Ok(generation) => {
                log::info!("Playing {} (generation {})", media.url, generation);
                self.session.set_state(PlayerState::Buffering);
                true
            }
            Err(e) => {
                self.session.error(e.to_string());
                self.session.set_state(PlayerState::NotRunning);
                false
            }
        }
    }

    fn pause(&mut self) -> bool {
        if !self.transport.is_running() {
            return false;
        }
        if self.session.state() == PlayerState::Paused || self.queue.has_queued("pause") {
            return true;
        }
        self.send_command("pause")
    }

    fn unpause(&mut self) -> bool {
        if self.queue.remove_queued("pause") {
            return true;
        }
        if self.session.state() == PlayerState::Paused {
            return self.send_command("pause");
        }
        true
    }

    fn stop(&mut self) {
        self.terminate();
    }

    fn quit(&mut self) {
        self.terminate();
    }

    fn seek(&mut self, pos: i64, absolute: bool) -> bool {
        let media = &self.session.media;
        if !media.has_length() || (absolute && media.position == pos) {
            return false;
        }
        if self.requested_seek.is_some() && self.queue.len() > 1 && self.queue.remove_queued("seek") {
            self.requested_seek = None;
        }
        if self.requested_seek.is_some() {
            log::debug!("Seek to {} rejected, previous seek still in flight", pos);
            return false;
        }

        let command = format!("seek {} {}", pos / 10, if absolute { 2 } else { 0 });
        let target = if absolute { pos } else { self.session.media.position + pos };
        if !self.send_command(&command) {
            return false;
        }
        self.requested_seek = Some(target);
        self.session.media.position = target;
        true
    }

    fn set_volume(&mut self, delta: i32, absolute: bool) -> bool {
        let delta = self.adjustments.update(|a| {
            let delta = if absolute { delta - a.volume } else { delta };
            a.volume += delta;
            delta
        });
        if delta == 0 {
            return true;
        }
        self.send_command(&format!("volume {}", delta))
    }

    fn set_color(&mut self, kind: ColorKind, value: i32, absolute: bool) -> bool {
        self.adjustments.update(|a| {
            let slot = a.color_mut(kind);
            *slot = if absolute { value } else { *slot + value };
        });
        let command = match kind {
            ColorKind::Saturation | ColorKind::Hue => {
                format!("{} {} {}", kind.command(), value, if absolute { 1 } else { 0 })
            }
            ColorKind::Contrast | ColorKind::Brightness => format!("{} {} 1", kind.command(), value),
        };
        self.send_command(&command)
    }

    fn set_audio_track(&mut self, index: usize) -> bool {
        self.switch_track(TrackKind::Audio, index)
    }

    fn set_subtitle_track(&mut self, index: usize) -> bool {
        self.switch_track(TrackKind::Subtitle, index)
    }

    fn grab_frame(&mut self, path: &Path, pos: Option<i64>) -> bool {
        if self.session.state().is_active() || self.transport.is_running() || self.grab.is_some() {
            log::debug!("Frame grab refused while the engine is busy");
            return false;
        }
        let Some(media) = self.media.clone() else {
            return false;
        };

        let dir = std::env::temp_dir().join(format!("playback-host-grab-{}", Uuid::new_v4()));
        if let Err(source) = std::fs::create_dir_all(&dir) {
            self.session.error(EngineError::Io { path: dir, source }.to_string());
            return false;
        }

        let mut spec = LaunchSpec::new(&self.config.mplayer.path)
            .arg("-vo")
            .arg(format!("jpeg:outdir={}", dir.display()))
            .args(["-frames", "1", "-nosound", "-quiet"])
            .target_url(&media.url);
        if let Some(pos) = pos {
            spec = spec.arg("-ss").arg((pos / 10).to_string());
        }
        let url = media
            .local_path()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| media.url.clone());
        spec = spec.arg(url);

        self.grab_parser.reset();
        match self.grabber.start(spec) {
            Ok(generation) => {
                self.grab = Some(GrabJob {
                    epoch: self.session.epoch(),
                    generation,
                    dir,
                    target: path.to_path_buf(),
                    deadline: Instant::now() + self.config.grab_timeout(),
                });
                self.session.set_state(PlayerState::Buffering);
                true
            }
            Err(e) => {
                let _ = std::fs::remove_dir_all(&dir);
                self.session.error(e.to_string());
                false
            }
        }
    }

    fn handle_process_event(&mut self, event: ProcessEvent) {
        if event.generation == self.transport.generation() {
            match event.kind {
                ProcessEventKind::Started => {}
                ProcessEventKind::Output { data, .. } => {
                    for parsed in self.parser.feed(&data) {
                        self.handle_parsed(parsed);
                    }
                }
                ProcessEventKind::Drained => {
                    self.queue.pop_acknowledged(self.transport.as_mut());
                }
                ProcessEventKind::Exited { code } => self.handle_exit(code),
            }
        } else if self.grab.as_ref().is_some_and(|job| job.generation == event.generation) {
            self.handle_grab_event(event.kind);
        } else {
            log::debug!("Discarding event of stale generation {}", event.generation);
        }
    }

    fn poll(&mut self) {
        self.transport.poll();
        self.grabber.poll();
        self.expire_grab();
    }
}

#[cfg(test)]
#[path = "mplayer_test.rs"]
mod mplayer_test;
