// =============================================================================
// RECORDER - ONE-SHOT ENGINES THAT WRITE A STREAM TO A FILE
// =============================================================================
//
// Recording reuses the playback process plumbing: a LaunchSpec, a Transport
// and the output parser. The recorder is Playing for as long as its process
// runs and drops to Ready when the process exits, which is when the output
// file is complete.
//
// Stopping differs per tool. mencoder and mplayer -dumpstream are simply
// quit; ffmpeg is asked to finish with "q" on stdin so it can close the
// container properly.
//
// =============================================================================

use std::path::PathBuf;
use std::sync::mpsc;
use tokio::sync::broadcast;

use super::adapter::{MediaRequest, SourceKind};
use super::session::EngineSession;
use super::state::PlayerState;
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, EngineResult};
use crate::core::events::PlayerEvent;
use crate::parser::{OutputParser, ParsedEvent, PatternSet};
use crate::process::{
    ConfigProxyResolver, LaunchSpec, ProcessEvent, ProcessEventKind, ProcessSupervisor, StopOutcome, Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecorderKind {
    /// Re-encodes with mencoder
    MEncoder,
    /// Copies the raw stream with mplayer -dumpstream
    Dumpstream,
    FFMpeg,
}

impl RecorderKind {
    pub const ALL: [RecorderKind; 3] = [RecorderKind::MEncoder, RecorderKind::Dumpstream, RecorderKind::FFMpeg];

    pub fn name(self) -> &'static str {
        match self {
            RecorderKind::MEncoder => "mencoder",
            RecorderKind::Dumpstream => "mplayerdumpstream",
            RecorderKind::FFMpeg => "ffmpeg",
        }
    }

    pub fn supports(self, source: SourceKind) -> bool {
        use SourceKind::*;
        match self {
            RecorderKind::MEncoder | RecorderKind::Dumpstream => {
                matches!(source, Dvd | Pipe | TvScanner | Tv | Url | Vcd | AudioCd)
            }
            RecorderKind::FFMpeg => matches!(source, Tv | Url),
        }
    }
}

/// What to record and where to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordRequest {
    pub url: String,
    pub output: PathBuf,
    /// Extra options the source needs for recording, e.g. tv tuner settings
    pub source_args: Vec<String>,
    pub video_device: Option<String>,
    pub audio_device: Option<String>,
    pub video_norm: Option<String>,
}

impl RecordRequest {
    pub fn new(url: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    /// Local path for file URLs, the URL itself otherwise.
    fn input(&self) -> String {
        MediaRequest::new(self.url.clone())
            .local_path()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| self.url.clone())
    }

    fn has_capture_device(&self) -> bool {
        let set = |d: &Option<String>| d.as_deref().is_some_and(|d| !d.is_empty());
        set(&self.video_device) || set(&self.audio_device)
    }
}

pub struct Recorder {
    kind: RecorderKind,
    config: EngineConfig,
    session: EngineSession,
    transport: Box<dyn Transport>,
    parser: OutputParser,
    request: Option<RecordRequest>,
}

impl Recorder {
    pub fn new(kind: RecorderKind, config: EngineConfig, transport: Box<dyn Transport>, patterns: PatternSet) -> Self {
        Self {
            kind,
            config,
            session: EngineSession::new(),
            transport,
            parser: OutputParser::new(patterns),
            request: None,
        }
    }

    /// Builds a recorder on a real process supervisor.
    pub fn create(
        kind: RecorderKind,
        config: &EngineConfig,
        events: mpsc::Sender<ProcessEvent>,
    ) -> EngineResult<Self> {
        let patterns = PatternSet::compile(&config.mplayer.patterns)?;
        let transport = ProcessSupervisor::new(kind.name(), events)
            .with_proxy_resolver(Box::new(ConfigProxyResolver::new(config.proxy.clone())));
        log::info!("Creating {} recorder", kind.name());
        Ok(Self::new(kind, config.clone(), Box::new(transport), patterns))
    }

    pub fn kind(&self) -> RecorderKind {
        self.kind
    }

    pub fn state(&self) -> PlayerState {
        self.session.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.session.subscribe()
    }

    pub fn session(&self) -> &EngineSession {
        &self.session
    }

    pub fn request(&self) -> Option<&RecordRequest> {
        self.request.as_ref()
    }

    pub fn tick(&mut self) {
        self.session.tick();
    }

    pub fn poll(&mut self) {
        self.transport.poll();
    }

    pub fn build_args(&self, request: &RecordRequest) -> Vec<String> {
        let recorder = &self.config.recorder;
        let output = request.output.to_string_lossy().to_string();
        let mut args: Vec<String> = Vec::new();
        match self.kind {
            RecorderKind::MEncoder => {
                if recorder.record_copy {
                    args.extend(["-oac", "copy", "-ovc", "copy"].map(String::from));
                } else {
                    args.extend(recorder.mencoder_args.iter().cloned());
                }
                args.extend(request.source_args.iter().cloned());
                args.push(request.input());
                args.extend(["-o".to_string(), output]);
            }
            RecorderKind::Dumpstream => {
                args.extend(request.source_args.iter().cloned());
                args.push(request.input());
                args.extend(["-dumpstream".to_string(), "-dumpfile".to_string(), output]);
            }
            RecorderKind::FFMpeg => {
                if request.has_capture_device() {
                    match request.video_device.as_deref().filter(|d| !d.is_empty()) {
                        Some(device) => args.extend(["-vd".to_string(), device.to_string()]),
                        None => args.push("-vn".to_string()),
                    }
                    match request.audio_device.as_deref().filter(|d| !d.is_empty()) {
                        Some(device) => args.extend(["-ad".to_string(), device.to_string()]),
                        None => args.push("-an".to_string()),
                    }
                    if let Some(norm) = request.video_norm.as_deref().filter(|n| !n.is_empty()) {
                        args.extend(["-tvstd".to_string(), norm.to_string()]);
                    }
                } else {
                    args.extend(["-i".to_string(), request.input()]);
                }
                args.extend(recorder.ffmpeg_args.iter().cloned());
                args.push(output);
            }
        }
        args
    }

    fn launch_spec(&self, request: &RecordRequest) -> LaunchSpec {
        let program = match self.kind {
            RecorderKind::MEncoder => &self.config.recorder.mencoder_path,
            RecorderKind::Dumpstream => &self.config.mplayer.path,
            RecorderKind::FFMpeg => &self.config.recorder.ffmpeg_path,
        };
        LaunchSpec::new(program.as_str())
            .args(self.build_args(request))
            .target_url(&request.url)
            .command_channel(self.kind == RecorderKind::FFMpeg)
    }

    /// Starts recording, replacing a recording still in progress.
    pub fn record(&mut self, request: RecordRequest) -> bool {
        if request.url.is_empty() {
            self.session.error(EngineError::NoMedia.to_string());
            return false;
        }
        if self.transport.is_running() {
            self.quit();
        }

        if self.kind == RecorderKind::FFMpeg {
            match std::fs::remove_file(&request.output) {
                Ok(()) => log::debug!("Removed old {}", request.output.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    let error = EngineError::Io {
                        path: request.output.clone(),
                        source,
                    };
                    log::warn!("{}", error);
                }
            }
        }

        let spec = self.launch_spec(&request);
        self.parser.reset();
        match self.transport.start(spec) {
            Ok(generation) => {
                log::info!(
                    "Recording {} to {} with {} (generation {})",
                    request.url,
                    request.output.display(),
                    self.kind.name(),
                    generation
                );
                self.request = Some(request);
                self.session.set_state(PlayerState::Playing);
                true
            }
            Err(e) => {
                self.session.error(e.to_string());
                self.session.set_state(PlayerState::NotRunning);
                false
            }
        }
    }

    /// Ends the recording. ffmpeg finishes on its own after "q" and reports
    /// through its exit; the others are quit right away.
    pub fn stop(&mut self) {
        if !self.transport.is_running() {
            return;
        }
        match self.kind {
            RecorderKind::FFMpeg => {
                if let Err(e) = self.transport.write(b"q") {
                    log::debug!("Failed to ask ffmpeg to finish: {}", e);
                }
            }
            RecorderKind::MEncoder | RecorderKind::Dumpstream => {
                self.end_process();
                self.session.set_state(PlayerState::Ready);
            }
        }
    }

    pub fn quit(&mut self) {
        if self.transport.is_running() {
            if self.kind == RecorderKind::FFMpeg {
                if let Err(e) = self.transport.write(b"q") {
                    log::debug!("Failed to ask ffmpeg to finish: {}", e);
                }
            }
            self.end_process();
        }
        self.parser.reset();
        self.session.set_state(PlayerState::NotRunning);
    }

    fn end_process(&mut self) {
        if self.transport.quit(self.config.quit_timeout()) == StopOutcome::Unreaped {
            self.session.error(EngineError::StopTimeout.to_string());
        }
    }

    fn handle_parsed(&mut self, event: ParsedEvent) {
        match event {
            ParsedEvent::Error(message) => self.session.error(message),
            ParsedEvent::Text(text) => {
                log::debug!("{}: {}", self.kind.name(), text);
                self.session.emit(PlayerEvent::Console(text));
            }
            ParsedEvent::OpenFailed { message, .. } => {
                log::warn!("{}: {}", self.kind.name(), message);
                self.session.emit(PlayerEvent::Console(message));
            }
            other => log::trace!("{}: {:?}", self.kind.name(), other),
        }
    }

    pub fn handle_process_event(&mut self, event: ProcessEvent) {
        if event.generation != self.transport.generation() {
            log::debug!("Discarding event of stale generation {}", event.generation);
            return;
        }
        match event.kind {
            ProcessEventKind::Output { data, .. } => {
                for parsed in self.parser.feed(&data) {
                    self.handle_parsed(parsed);
                }
            }
            ProcessEventKind::Exited { code } => {
                for parsed in self.parser.finish() {
                    self.handle_parsed(parsed);
                }
                if let Some(request) = &self.request {
                    log::info!("Recording to {} ended with {:?}", request.output.display(), code);
                }
                self.session.set_state(PlayerState::Ready);
            }
            ProcessEventKind::Started | ProcessEventKind::Drained => {}
        }
    }
}

#[cfg(test)]
#[path = "recorder_test.rs"]
mod recorder_test;
