use super::*;
use crate::core::events::drain_events;
use crate::parser::PatternConfig;
use crate::process::testing::FakeTransport;

fn recorder_with(kind: RecorderKind, config: EngineConfig) -> (Recorder, FakeTransport) {
    let transport = FakeTransport::new();
    let patterns = PatternSet::compile(&PatternConfig::default()).unwrap();
    let recorder = Recorder::new(kind, config, Box::new(transport.clone()), patterns);
    (recorder, transport)
}

fn recorder(kind: RecorderKind) -> (Recorder, FakeTransport) {
    recorder_with(kind, EngineConfig::default())
}

fn transitions(events: &[PlayerEvent]) -> Vec<(PlayerState, PlayerState)> {
    events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::StateChanged { old, new } => Some((*old, *new)),
            _ => None,
        })
        .collect()
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_mencoder_copies_by_default() {
    let (recorder, _) = recorder(RecorderKind::MEncoder);
    let mut request = RecordRequest::new("file:///media/in.avi", "/tmp/out.avi");
    request.source_args = strings(&["-tv", "driver=v4l2"]);

    assert_eq!(
        recorder.build_args(&request),
        strings(&["-oac", "copy", "-ovc", "copy", "-tv", "driver=v4l2", "/media/in.avi", "-o", "/tmp/out.avi"])
    );
}

#[test]
fn test_mencoder_uses_configured_codecs() {
    let mut config = EngineConfig::default();
    config.recorder.record_copy = false;
    let (recorder, _) = recorder_with(RecorderKind::MEncoder, config);

    let args = recorder.build_args(&RecordRequest::new("http://radio.example/live", "/tmp/out.avi"));
    assert_eq!(
        args,
        strings(&["-oac", "mp3lame", "-ovc", "lavc", "http://radio.example/live", "-o", "/tmp/out.avi"])
    );
}

#[test]
fn test_dumpstream_args_and_spec() {
    let (mut recorder, transport) = recorder(RecorderKind::Dumpstream);
    assert!(recorder.record(RecordRequest::new("mms://host/stream", "/tmp/dump.asf")));

    let spec = transport.starts().pop().unwrap();
    assert_eq!(spec.program, "mplayer");
    assert!(!spec.command_channel);
    assert_eq!(spec.target_url.as_deref(), Some("mms://host/stream"));
    assert_eq!(
        spec.args,
        strings(&["mms://host/stream", "-dumpstream", "-dumpfile", "/tmp/dump.asf"])
    );
}

#[test]
fn test_ffmpeg_args_for_url_and_devices() {
    let (recorder, _) = recorder(RecorderKind::FFMpeg);

    let args = recorder.build_args(&RecordRequest::new("http://host/a.ogg", "/tmp/a.avi"));
    assert_eq!(
        args,
        strings(&["-i", "http://host/a.ogg", "-f", "avi", "-acodec", "mp3", "-vcodec", "mpeg4", "/tmp/a.avi"])
    );

    let mut request = RecordRequest::new("tv://", "/tmp/tv.avi");
    request.video_device = Some("/dev/video0".to_string());
    request.video_norm = Some("PAL".to_string());
    let args = recorder.build_args(&request);
    assert_eq!(&args[..6], strings(&["-vd", "/dev/video0", "-an", "-tvstd", "PAL", "-f"]).as_slice());
    assert!(!args.contains(&"-i".to_string()));
}

#[test]
fn test_ffmpeg_replaces_existing_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.avi");
    std::fs::write(&output, b"old recording").unwrap();
    let (mut recorder, transport) = recorder(RecorderKind::FFMpeg);

    assert!(recorder.record(RecordRequest::new("http://host/a.ogg", output.clone())));
    assert!(!output.exists());
    assert!(transport.starts()[0].command_channel);
    assert_eq!(transport.starts()[0].program, "ffmpeg");
}

#[test]
fn test_record_plays_until_exit() {
    let (mut recorder, transport) = recorder(RecorderKind::MEncoder);
    let mut rx = recorder.subscribe();

    assert!(recorder.record(RecordRequest::new("dvd://1", "/tmp/dvd.avi")));
    recorder.tick();
    assert_eq!(recorder.state(), PlayerState::Playing);

    recorder.handle_process_event(transport.output("MEncoder 1.0\nPos:   1.0s     25f ( 0%)\r"));
    recorder.handle_process_event(transport.exit());
    recorder.tick();

    let events = drain_events(&mut rx);
    assert!(events.contains(&PlayerEvent::Console("MEncoder 1.0".to_string())));
    assert_eq!(
        transitions(&events),
        vec![
            (PlayerState::NotRunning, PlayerState::Playing),
            (PlayerState::Playing, PlayerState::Ready)
        ]
    );
}

#[test]
fn test_output_errors_are_reported() {
    let (mut recorder, transport) = recorder(RecorderKind::Dumpstream);
    let mut rx = recorder.subscribe();
    recorder.record(RecordRequest::new("http://host/missing", "/tmp/x"));

    recorder.handle_process_event(transport.output("No stream found to handle url http://host/missing\n"));

    let events = drain_events(&mut rx);
    assert!(events.contains(&PlayerEvent::Error(
        "No stream found to handle url http://host/missing".to_string()
    )));
}

#[test]
fn test_stop_quits_mencoder() {
    let (mut recorder, transport) = recorder(RecorderKind::MEncoder);
    recorder.record(RecordRequest::new("tv://", "/tmp/tv.avi"));
    recorder.tick();

    recorder.stop();
    recorder.tick();

    assert!(transport.commands().is_empty());
    assert_eq!(transport.quit_count(), 1);
    assert_eq!(recorder.state(), PlayerState::Ready);
}

#[test]
fn test_stop_asks_ffmpeg_to_finish() {
    let (mut recorder, transport) = recorder(RecorderKind::FFMpeg);
    recorder.record(RecordRequest::new("http://host/a.ogg", "/tmp/playback-host-stop.avi"));
    recorder.tick();

    recorder.stop();
    recorder.tick();
    assert_eq!(transport.commands(), vec!["q"]);
    assert_eq!(transport.quit_count(), 0);
    assert_eq!(recorder.state(), PlayerState::Playing);

    recorder.handle_process_event(transport.exit());
    recorder.tick();
    assert_eq!(recorder.state(), PlayerState::Ready);
}

#[test]
fn test_quit_ends_process_and_ignores_late_exit() {
    let (mut recorder, transport) = recorder(RecorderKind::FFMpeg);
    recorder.record(RecordRequest::new("http://host/a.ogg", "/tmp/playback-host-quit.avi"));
    let old_generation = transport.current_generation();
    recorder.tick();

    recorder.quit();
    recorder.handle_process_event(ProcessEvent::new(old_generation, ProcessEventKind::Exited { code: Some(0) }));
    recorder.tick();

    assert_eq!(transport.commands(), vec!["q"]);
    assert_eq!(transport.quit_count(), 1);
    assert_eq!(recorder.state(), PlayerState::NotRunning);
}

#[test]
fn test_unreaped_quit_is_reported() {
    let (mut recorder, transport) = recorder(RecorderKind::Dumpstream);
    recorder.record(RecordRequest::new("http://host/a", "/tmp/a"));
    transport.set_quit_outcome(StopOutcome::Unreaped);
    let mut rx = recorder.subscribe();

    recorder.quit();

    assert!(drain_events(&mut rx).contains(&PlayerEvent::Error(EngineError::StopTimeout.to_string())));
}

#[test]
fn test_new_recording_replaces_running_one() {
    let (mut recorder, transport) = recorder(RecorderKind::MEncoder);
    assert!(recorder.record(RecordRequest::new("http://host/a", "/tmp/a.avi")));
    assert!(recorder.record(RecordRequest::new("http://host/b", "/tmp/b.avi")));

    assert_eq!(transport.quit_count(), 1);
    assert_eq!(transport.starts().len(), 2);
    assert_eq!(recorder.request().map(|r| r.url.as_str()), Some("http://host/b"));
    assert_eq!(recorder.state(), PlayerState::Playing);
}

#[test]
fn test_record_without_url_or_with_spawn_failure() {
    let (mut recorder, transport) = recorder(RecorderKind::MEncoder);
    let mut rx = recorder.subscribe();

    assert!(!recorder.record(RecordRequest::new("", "/tmp/a.avi")));
    transport.fail_next_spawn();
    assert!(!recorder.record(RecordRequest::new("http://host/a", "/tmp/a.avi")));
    recorder.tick();

    let events = drain_events(&mut rx);
    assert!(events.contains(&PlayerEvent::Error(EngineError::NoMedia.to_string())));
    assert!(events.iter().any(|e| matches!(e, PlayerEvent::Error(m) if m.contains("Failed to spawn mencoder"))));
    assert_eq!(recorder.state(), PlayerState::NotRunning);
}

#[test]
fn test_supported_sources() {
    assert!(RecorderKind::Dumpstream.supports(SourceKind::AudioCd));
    assert!(RecorderKind::MEncoder.supports(SourceKind::Dvd));
    assert!(!RecorderKind::MEncoder.supports(SourceKind::Intro));
    assert!(RecorderKind::FFMpeg.supports(SourceKind::Tv));
    assert!(!RecorderKind::FFMpeg.supports(SourceKind::Dvd));
}
