use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, TryRecvError};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use playback_host::core::{drain_events, EngineConfig, PlayerEvent};
use playback_host::engine::bus::{self, BusCall, BusNotification};
use playback_host::engine::{EngineKind, MediaRequest, PlayerState};
use playback_host::player::Player;

/// Plays one media URL with mplayer and reports to the caller over stdout
#[derive(Parser, Debug)]
#[command(name = "playback-host")]
#[command(version)]
#[command(about = "Drives an mplayer process, controlled by JSON lines on stdin")]
struct Cli {
    /// Audio output driver
    #[arg(short, long)]
    audio_driver: Option<String>,

    /// Video output driver
    #[arg(short, long)]
    video_driver: Option<String>,

    /// Audio CD device
    #[arg(long)]
    audio_device: Option<String>,

    /// DVD/VCD device
    #[arg(long)]
    video_device: Option<String>,

    /// Window to render into
    #[arg(short, long)]
    wid: Option<u64>,

    /// Render into the root window
    #[arg(short, long)]
    root: bool,

    /// Debug logging
    #[arg(long)]
    verbose: bool,

    /// Print the configuration as JSON and exit
    #[arg(short = 'c', long)]
    config_wants: bool,

    /// Address the caller knows this helper by
    #[arg(long)]
    cb: Option<String>,

    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Media to play right away
    url: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(driver) = &self.audio_driver {
            config.audio_driver = Some(driver.clone());
        }
        if let Some(driver) = &self.video_driver {
            config.video_driver = Some(driver.clone());
        }
        if let Some(device) = &self.audio_device {
            config.mplayer.additional_args.extend(["-cdrom-device".to_string(), device.clone()]);
        }
        if let Some(device) = &self.video_device {
            config.mplayer.additional_args.extend(["-dvd-device".to_string(), device.clone()]);
        }
    }

    fn request(&self, url: &str) -> MediaRequest {
        MediaRequest {
            window_id: self.wid,
            root_window: self.root,
            ..MediaRequest::new(url)
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    run(cli)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    cli.apply(&mut config);

    if cli.config_wants {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut player = Player::new(EngineKind::MPlayer, &config).context("Failed to set up mplayer engine")?;
    let mut events = player.subscribe();
    let mut stdout = io::stdout();

    let service = cli.cb.clone().unwrap_or_else(|| config.helper.callback_address.clone());
    notify(&mut stdout, &BusNotification::Running { service })?;

    let calls = spawn_call_reader();
    if let Some(url) = &cli.url {
        player.engine_mut().set_media(cli.request(url));
        player.engine_mut().play();
    }

    loop {
        player.run_once(Duration::from_millis(50));

        let mut quit = false;
        loop {
            match calls.try_recv() {
                Ok(call) => {
                    if !handle_call(&cli, &mut player, call) {
                        quit = true;
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::info!("Caller closed stdin");
                    quit = true;
                    break;
                }
            }
        }

        if quit {
            player.engine_mut().quit();
            player.run_once(Duration::ZERO);
        }
        for event in drain_events(&mut events) {
            if let Some(notification) = notification_for(&player, event) {
                notify(&mut stdout, &notification)?;
            }
        }
        if quit {
            break;
        }
    }

    log::info!("Shutting down");
    Ok(())
}

/// Returns false once the caller asked to quit.
fn handle_call(cli: &Cli, player: &mut Player, call: BusCall) -> bool {
    log::debug!("Call {:?}", call);
    let engine = player.engine_mut();
    match call {
        BusCall::Play { url } => {
            engine.set_media(cli.request(&url));
            engine.play();
        }
        BusCall::NewStream { url, window_id } => {
            engine.stop();
            let mut request = cli.request(&url);
            if window_id.is_some() {
                request.window_id = window_id;
            }
            engine.set_media(request);
            engine.play();
        }
        BusCall::Pause => {
            if engine.state() == PlayerState::Paused {
                engine.unpause();
            } else {
                engine.pause();
            }
        }
        BusCall::Seek { pos, absolute } => {
            engine.seek(pos, absolute);
        }
        BusCall::Volume { delta } => {
            engine.set_volume(delta, false);
        }
        BusCall::Stop => engine.stop(),
        BusCall::AudioTrack { index } => {
            engine.set_audio_track(index);
        }
        BusCall::SubtitleTrack { index } => {
            engine.set_subtitle_track(index);
        }
        BusCall::Quit => return false,
    }
    true
}

fn notification_for(player: &Player, event: PlayerEvent) -> Option<BusNotification> {
    match event {
        PlayerEvent::StateChanged { old, new } => match new {
            PlayerState::Playing => Some(BusNotification::Playing),
            PlayerState::Paused => Some(BusNotification::Paused),
            PlayerState::Ready | PlayerState::NotRunning if old.is_active() => Some(BusNotification::Eof),
            _ => None,
        },
        PlayerEvent::Position(pos) => Some(BusNotification::Progress { pos }),
        PlayerEvent::Length(length) => Some(BusNotification::StreamInfo {
            length,
            aspect: player.engine().session().media.effective_aspect().unwrap_or(0.0),
        }),
        PlayerEvent::Dimensions { width, height, .. } => Some(BusNotification::Dimensions { width, height }),
        PlayerEvent::Loading(percent) => Some(BusNotification::Loading { percent }),
        PlayerEvent::Languages { audio, subtitles } => Some(BusNotification::Languages { audio, subtitles }),
        PlayerEvent::Error(message) => Some(BusNotification::Error { message }),
        _ => None,
    }
}

fn notify(out: &mut impl Write, notification: &BusNotification) -> anyhow::Result<()> {
    out.write_all(&bus::encode(notification)?)?;
    out.flush()?;
    Ok(())
}

/// Reads calls from stdin on its own thread. The channel disconnects when
/// stdin closes.
fn spawn_call_reader() -> mpsc::Receiver<BusCall> {
    let (sender, receiver) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("Failed to read stdin: {}", e);
                    break;
                }
            };
            match bus::decode::<BusCall>(&line) {
                Some(call) => {
                    if sender.send(call).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => log::warn!("Ignoring unknown call: {}", line),
            }
        }
    });
    receiver
}
