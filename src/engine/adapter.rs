use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use super::mplayer::MPlayerEngine;
use super::remote::RemoteEngine;
use super::session::EngineSession;
use super::state::PlayerState;
use crate::core::config::{ColorConfig, EngineConfig};
use crate::core::error::{EngineError, EngineResult};
use crate::core::events::PlayerEvent;
use crate::parser::PatternSet;
use crate::process::{ConfigProxyResolver, ProcessEvent, ProcessSupervisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Dvd,
    Exit,
    Intro,
    Pipe,
    TvScanner,
    Tv,
    Url,
    Vcd,
    AudioCd,
}

impl SourceKind {
    /// Guesses the source from a URL scheme.
    pub fn from_url(url: &str) -> Self {
        let scheme = url.split_once("://").map(|(s, _)| s.to_ascii_lowercase());
        match scheme.as_deref() {
            Some("dvd") | Some("dvdnav") => SourceKind::Dvd,
            Some("vcd") => SourceKind::Vcd,
            Some("cdda") => SourceKind::AudioCd,
            Some("tv") => SourceKind::Tv,
            _ => SourceKind::Url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Text commands over the engine's stdin
    MPlayer,
    /// Calls and notifications exchanged with a helper process
    Remote,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::MPlayer, EngineKind::Remote];

    pub fn supports(self, source: SourceKind) -> bool {
        use SourceKind::*;
        match self {
            EngineKind::MPlayer => matches!(
                source,
                Dvd | Exit | Intro | Pipe | TvScanner | Tv | Url | Vcd | AudioCd
            ),
            EngineKind::Remote => matches!(source, Url | Dvd | Vcd | AudioCd),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EngineKind::MPlayer => "mplayer",
            EngineKind::Remote => "remote",
        }
    }
}

/// Picks the preferred engine when it handles the source, otherwise the first
/// one that does.
pub fn select_engine(source: SourceKind, preferred: Option<EngineKind>) -> Option<EngineKind> {
    if let Some(kind) = preferred.filter(|k| k.supports(source)) {
        return Some(kind);
    }
    EngineKind::ALL.into_iter().find(|k| k.supports(source))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorKind {
    Saturation,
    Hue,
    Contrast,
    Brightness,
}

impl ColorKind {
    pub fn command(self) -> &'static str {
        match self {
            ColorKind::Saturation => "saturation",
            ColorKind::Hue => "hue",
            ColorKind::Contrast => "contrast",
            ColorKind::Brightness => "brightness",
        }
    }
}

/// Volume and picture adjustments, also touched by the windowing thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Adjustments {
    pub volume: i32,
    pub contrast: i32,
    pub brightness: i32,
    pub hue: i32,
    pub saturation: i32,
}

impl Adjustments {
    pub fn color(&self, kind: ColorKind) -> i32 {
        match kind {
            ColorKind::Saturation => self.saturation,
            ColorKind::Hue => self.hue,
            ColorKind::Contrast => self.contrast,
            ColorKind::Brightness => self.brightness,
        }
    }

    pub fn color_mut(&mut self, kind: ColorKind) -> &mut i32 {
        match kind {
            ColorKind::Saturation => &mut self.saturation,
            ColorKind::Hue => &mut self.hue,
            ColorKind::Contrast => &mut self.contrast,
            ColorKind::Brightness => &mut self.brightness,
        }
    }
}

/// The one lock in the player. Held only for the read or write itself.
#[derive(Debug, Clone, Default)]
pub struct SharedAdjustments {
    inner: Arc<Mutex<Adjustments>>,
}

impl SharedAdjustments {
    pub fn from_colors(colors: &ColorConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Adjustments {
                volume: 0,
                contrast: colors.contrast,
                brightness: colors.brightness,
                hue: colors.hue,
                saturation: colors.saturation,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Adjustments> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> Adjustments {
        *self.lock()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Adjustments) -> R) -> R {
        f(&mut self.lock())
    }
}

/// What to play next.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaRequest {
    pub url: String,
    pub subtitle: Option<String>,
    pub window_id: Option<u64>,
    pub root_window: bool,
    /// Extra plays after the first one
    pub repeat: u32,
}

impl MediaRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn source(&self) -> SourceKind {
        SourceKind::from_url(&self.url)
    }

    /// Filesystem path for local media.
    pub fn local_path(&self) -> Option<PathBuf> {
        if let Some(path) = self.url.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if self.url.contains("://") {
            None
        } else {
            Some(PathBuf::from(&self.url))
        }
    }
}

/// Domain operations every engine variant understands.
pub trait EngineAdapter: Send {
    fn kind(&self) -> EngineKind;
    fn session(&self) -> &EngineSession;
    fn session_mut(&mut self) -> &mut EngineSession;

    fn set_media(&mut self, media: MediaRequest);
    fn media(&self) -> Option<&MediaRequest>;

    /// Gets the engine ready to accept media.
    fn ready(&mut self) -> bool;
    fn play(&mut self) -> bool;
    fn pause(&mut self) -> bool;
    fn unpause(&mut self) -> bool;
    fn stop(&mut self);
    fn quit(&mut self);

    /// `pos` in deciseconds
    fn seek(&mut self, pos: i64, absolute: bool) -> bool;
    fn set_volume(&mut self, delta: i32, absolute: bool) -> bool;
    fn set_color(&mut self, kind: ColorKind, value: i32, absolute: bool) -> bool;
    fn set_audio_track(&mut self, index: usize) -> bool;
    fn set_subtitle_track(&mut self, index: usize) -> bool;
    fn grab_frame(&mut self, path: &Path, pos: Option<i64>) -> bool;

    fn handle_process_event(&mut self, event: ProcessEvent);
    fn poll(&mut self);

    fn tick(&mut self) {
        self.session_mut().tick();
    }

    fn state(&self) -> PlayerState {
        self.session().state()
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.session().subscribe()
    }
}

/// Builds an engine wired to real processes that report on `events`.
pub fn create_engine(
    kind: EngineKind,
    config: &EngineConfig,
    events: mpsc::Sender<ProcessEvent>,
    adjustments: SharedAdjustments,
) -> EngineResult<Box<dyn EngineAdapter>> {
    let resolver = || Box::new(ConfigProxyResolver::new(config.proxy.clone()));
    log::info!("Creating {} engine", kind.name());
    match kind {
        EngineKind::MPlayer if config.mplayer.path.trim().is_empty() => {
            Err(EngineError::Config("mplayer path is empty".to_string()))
        }
        EngineKind::Remote if config.helper.path.trim().is_empty() => {
            Err(EngineError::Config("helper path is empty".to_string()))
        }
        EngineKind::MPlayer => {
            let patterns = PatternSet::compile(&config.mplayer.patterns)?;
            let transport = ProcessSupervisor::new("mplayer", events.clone()).with_proxy_resolver(resolver());
            let grabber = ProcessSupervisor::new("mplayer-grab", events).with_proxy_resolver(resolver());
            Ok(Box::new(MPlayerEngine::new(
                config.clone(),
                Box::new(transport),
                Box::new(grabber),
                patterns,
                adjustments,
            )))
        }
        EngineKind::Remote => {
            let transport = ProcessSupervisor::new("helper", events).with_proxy_resolver(resolver());
            Ok(Box::new(RemoteEngine::new(config.clone(), Box::new(transport), adjustments)))
        }
    }
}
