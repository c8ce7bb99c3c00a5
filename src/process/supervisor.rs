use chrono::{DateTime, Local};
use std::io::{Read, Write};
use std::process::{Child, Stdio};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::environment::{build_command, NoProxy, ProxyResolver};
use super::{next_generation, LaunchSpec, OutputStream, ProcessEvent, ProcessEventKind, ProcessState, StopOutcome, Transport};
use crate::core::error::{EngineError, EngineResult};

/// How long the kill is given to take effect before giving up.
const KILL_WAIT: Duration = Duration::from_secs(1);
/// How long an exited child's readers may still deliver output.
const OUTPUT_LINGER: Duration = Duration::from_secs(1);

/// Owns at most one child process and reports everything it does as
/// [`ProcessEvent`]s on a channel.
///
/// stdout and stderr are read on two threads, commands are written on a third.
/// Exit is detected by [`Transport::poll`].
pub struct ProcessSupervisor {
    name: String,
    events: mpsc::Sender<ProcessEvent>,
    resolver: Box<dyn ProxyResolver>,
    child: Option<Child>,
    stdin: Option<mpsc::Sender<Vec<u8>>>,
    readers: Vec<JoinHandle<()>>,
    generation: u64,
    state: ProcessState,
    started_at: Option<DateTime<Local>>,
    exit_seen: Option<(Instant, Option<i32>)>,
}

impl ProcessSupervisor {
    pub fn new(name: &str, events: mpsc::Sender<ProcessEvent>) -> Self {
        Self {
            name: name.to_string(),
            events,
            resolver: Box::new(NoProxy),
            child: None,
            stdin: None,
            readers: Vec::new(),
            generation: next_generation(),
            state: ProcessState::NotRunning,
            started_at: None,
            exit_seen: None,
        }
    }

    pub fn with_proxy_resolver(mut self, resolver: Box<dyn ProxyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    fn uptime(&self) -> String {
        match self.started_at {
            Some(started) => {
                let elapsed = Local::now().signed_duration_since(started);
                format!("{}.{:03}s", elapsed.num_seconds(), elapsed.num_milliseconds().rem_euclid(1000))
            }
            None => "unknown".to_string(),
        }
    }

    fn spawn_reader<R: Read + Send + 'static>(
        &self,
        mut source: R,
        stream: OutputStream,
    ) -> JoinHandle<()> {
        let events = self.events.clone();
        let generation = self.generation;
        std::thread::spawn(move || {
            let mut buffer = [0u8; 4096];
            loop {
                match source.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let event = ProcessEvent::new(
                            generation,
                            ProcessEventKind::Output {
                                stream,
                                data: buffer[..n].to_vec(),
                            },
                        );
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::debug!("Reading {:?} of generation {} failed: {}", stream, generation, e);
                        break;
                    }
                }
            }
        })
    }

    fn spawn_writer<W: Write + Send + 'static>(&self, mut sink: W) -> mpsc::Sender<Vec<u8>> {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let events = self.events.clone();
        let generation = self.generation;
        std::thread::spawn(move || {
            for data in rx {
                if let Err(e) = sink.write_all(&data).and_then(|_| sink.flush()) {
                    log::warn!("Write to generation {} failed: {}", generation, e);
                    break;
                }
                if events.send(ProcessEvent::new(generation, ProcessEventKind::Drained)).is_err() {
                    break;
                }
            }
            // Dropping the sink closes the child's stdin
        });
        tx
    }

    fn wait_for_exit(child: &mut Child, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) if Instant::now() >= deadline => return false,
                Ok(None) => std::thread::sleep(Duration::from_millis(20)),
                Err(e) => {
                    log::warn!("Failed to wait for child: {}", e);
                    return false;
                }
            }
        }
    }

    fn finish_exit(&mut self, code: Option<i32>) {
        for reader in self.readers.drain(..) {
            if reader.is_finished() {
                let _ = reader.join();
            }
        }
        self.child = None;
        self.stdin = None;
        self.exit_seen = None;
        self.state = ProcessState::NotRunning;
        log::info!(
            "{} exited with {:?} after {} (generation {})",
            self.name,
            code,
            self.uptime(),
            self.generation
        );
        let _ = self
            .events
            .send(ProcessEvent::new(self.generation, ProcessEventKind::Exited { code }));
    }
}

impl Transport for ProcessSupervisor {
    fn start(&mut self, spec: LaunchSpec) -> EngineResult<u64> {
        if self.child.is_some() {
            return Err(EngineError::AlreadyRunning(self.generation));
        }

        self.state = ProcessState::Starting;
        self.generation = next_generation();
        self.exit_seen = None;

        let mut command = build_command(&spec, self.resolver.as_ref());
        command
            .stdin(if spec.command_channel { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        log::debug!("Launching {} {}", spec.program, spec.args.join(" "));

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.state = ProcessState::NotRunning;
                return Err(EngineError::Spawn {
                    program: spec.program,
                    source,
                });
            }
        };

        if let Some(stdout) = child.stdout.take() {
            let reader = self.spawn_reader(stdout, OutputStream::Stdout);
            self.readers.push(reader);
        }
        if let Some(stderr) = child.stderr.take() {
            let reader = self.spawn_reader(stderr, OutputStream::Stderr);
            self.readers.push(reader);
        }
        if let Some(stdin) = child.stdin.take() {
            self.stdin = Some(self.spawn_writer(stdin));
        }

        log::info!(
            "Started {} (PID: {}, generation {})",
            self.name,
            child.id(),
            self.generation
        );
        self.child = Some(child);
        self.state = ProcessState::Running;
        self.started_at = Some(Local::now());
        let _ = self
            .events
            .send(ProcessEvent::new(self.generation, ProcessEventKind::Started));
        Ok(self.generation)
    }

    fn write(&mut self, data: &[u8]) -> EngineResult<()> {
        let stdin = self.stdin.as_ref().ok_or(EngineError::NotRunning)?;
        stdin
            .send(data.to_vec())
            .map_err(|_| EngineError::Write(format!("{} no longer accepts input", self.name)))
    }

    fn quit(&mut self, grace: Duration) -> StopOutcome {
        let Some(mut child) = self.child.take() else {
            return StopOutcome::Exited;
        };

        // Anything the dying process still reports carries the old generation
        let old_generation = self.generation;
        self.generation = next_generation();
        self.stdin = None;
        self.readers.clear();
        self.exit_seen = None;
        self.state = ProcessState::NotRunning;

        log::debug!("Stopping {} (generation {})", self.name, old_generation);

        if Self::wait_for_exit(&mut child, grace) {
            log::info!("{} exited after {}", self.name, self.uptime());
            return StopOutcome::Exited;
        }

        log::debug!("{} ignored the quit request, killing PID {}", self.name, child.id());
        if let Err(e) = child.kill() {
            log::warn!("Failed to kill {}: {}", self.name, e);
        }
        if Self::wait_for_exit(&mut child, KILL_WAIT) {
            StopOutcome::Killed
        } else {
            log::error!("Failed to end player process {} (PID: {})", self.name, child.id());
            StopOutcome::Unreaped
        }
    }

    fn poll(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if self.exit_seen.is_none() {
            match child.try_wait() {
                Ok(Some(status)) => self.exit_seen = Some((Instant::now(), status.code())),
                Ok(None) => return,
                Err(e) => {
                    log::warn!("Failed to poll {}: {}", self.name, e);
                    return;
                }
            }
        }
        if let Some((seen, code)) = self.exit_seen {
            let drained = self.readers.iter().all(|r| r.is_finished());
            if drained || seen.elapsed() >= OUTPUT_LINGER {
                self.finish_exit(code);
            }
        }
    }

    fn state(&self) -> ProcessState {
        self.state
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            log::debug!("Killing {} on drop (PID: {})", self.name, child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn collect_until<F>(rx: &mpsc::Receiver<ProcessEvent>, supervisor: &mut ProcessSupervisor, mut done: F) -> Vec<ProcessEvent>
    where
        F: FnMut(&ProcessEvent) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            supervisor.poll();
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(20)) {
                let finished = done(&event);
                events.push(event);
                if finished {
                    break;
                }
            }
        }
        events
    }

    fn output_of(events: &[ProcessEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match &e.kind {
                ProcessEventKind::Output { data, .. } => Some(String::from_utf8_lossy(data).to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_write_is_echoed_and_drained() {
        let (tx, rx) = mpsc::channel();
        let mut supervisor = ProcessSupervisor::new("cat", tx);
        let generation = supervisor
            .start(LaunchSpec::new("cat").command_channel(true))
            .unwrap();
        assert!(supervisor.is_running());

        supervisor.write(b"hello\n").unwrap();
        let mut drained = false;
        let mut echoed = String::new();
        let events = collect_until(&rx, &mut supervisor, |e| {
            match &e.kind {
                ProcessEventKind::Drained => drained = true,
                ProcessEventKind::Output { data, .. } => echoed.push_str(&String::from_utf8_lossy(data)),
                _ => {}
            }
            drained && echoed == "hello\n"
        });

        assert!(events.iter().all(|e| e.generation == generation));
        assert_eq!(events[0].kind, ProcessEventKind::Started);
        assert!(events.iter().any(|e| e.kind == ProcessEventKind::Drained));
        assert_eq!(output_of(&events), "hello\n");

        // cat exits once stdin is closed
        assert_eq!(supervisor.quit(Duration::from_secs(2)), StopOutcome::Exited);
        assert_ne!(supervisor.generation(), generation);
        assert_eq!(supervisor.state(), ProcessState::NotRunning);
    }

    #[test]
    fn test_exit_is_reported_after_output() {
        let (tx, rx) = mpsc::channel();
        let mut supervisor = ProcessSupervisor::new("sh", tx);
        supervisor
            .start(LaunchSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();

        let events = collect_until(&rx, &mut supervisor, |e| {
            matches!(e.kind, ProcessEventKind::Exited { .. })
        });

        let last = events.last().unwrap();
        assert_eq!(last.kind, ProcessEventKind::Exited { code: Some(3) });
        let output = output_of(&events);
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
        assert!(!supervisor.is_running());
    }

    #[test]
    fn test_spawn_failure() {
        let (tx, _rx) = mpsc::channel();
        let mut supervisor = ProcessSupervisor::new("missing", tx);
        let result = supervisor.start(LaunchSpec::new("/nonexistent/engine-binary"));
        assert!(matches!(result, Err(EngineError::Spawn { .. })));
        assert_eq!(supervisor.state(), ProcessState::NotRunning);
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let (tx, _rx) = mpsc::channel();
        let mut supervisor = ProcessSupervisor::new("cat", tx);
        supervisor.start(LaunchSpec::new("cat").command_channel(true)).unwrap();
        let second = supervisor.start(LaunchSpec::new("cat"));
        assert!(matches!(second, Err(EngineError::AlreadyRunning(_))));
        supervisor.quit(Duration::from_secs(2));
    }

    #[test]
    fn test_quit_kills_stubborn_process() {
        let (tx, _rx) = mpsc::channel();
        let mut supervisor = ProcessSupervisor::new("sleep", tx);
        supervisor.start(LaunchSpec::new("sleep").arg("30")).unwrap();
        assert_eq!(supervisor.quit(Duration::from_millis(100)), StopOutcome::Killed);
        assert!(supervisor.write(b"x").is_err());
    }
}
