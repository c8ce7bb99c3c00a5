//! Recording transport used by the adapter and queue tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{next_generation, LaunchSpec, ProcessEvent, ProcessEventKind, ProcessState, StopOutcome, Transport};
use crate::core::error::{EngineError, EngineResult};

#[derive(Debug)]
struct FakeState {
    state: ProcessState,
    generation: u64,
    writes: Vec<Vec<u8>>,
    starts: Vec<LaunchSpec>,
    quits: usize,
    quit_outcome: StopOutcome,
    fail_spawn: bool,
    fail_writes: bool,
}

/// Clones share the same recording, so a test keeps one handle while the
/// adapter owns the other.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                state: ProcessState::NotRunning,
                generation: next_generation(),
                writes: Vec::new(),
                starts: Vec::new(),
                quits: 0,
                quit_outcome: StopOutcome::Exited,
                fail_spawn: false,
                fail_writes: false,
            })),
        }
    }

    pub fn running() -> Self {
        let transport = Self::new();
        {
            let mut inner = transport.inner.lock().unwrap();
            inner.state = ProcessState::Running;
        }
        transport
    }

    /// Written commands without their trailing newline.
    pub fn commands(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|w| String::from_utf8_lossy(w).trim_end_matches('\n').to_string())
            .collect()
    }

    pub fn clear_commands(&self) {
        self.inner.lock().unwrap().writes.clear();
    }

    pub fn starts(&self) -> Vec<LaunchSpec> {
        self.inner.lock().unwrap().starts.clone()
    }

    pub fn quit_count(&self) -> usize {
        self.inner.lock().unwrap().quits
    }

    pub fn set_quit_outcome(&self, outcome: StopOutcome) {
        self.inner.lock().unwrap().quit_outcome = outcome;
    }

    pub fn fail_next_spawn(&self) {
        self.inner.lock().unwrap().fail_spawn = true;
    }

    /// Makes every later write fail as if the pipe broke.
    pub fn fail_writes(&self) {
        self.inner.lock().unwrap().fail_writes = true;
    }

    pub fn current_generation(&self) -> u64 {
        self.inner.lock().unwrap().generation
    }

    /// Simulates the process exiting by itself.
    pub fn exit(&self) -> ProcessEvent {
        let mut inner = self.inner.lock().unwrap();
        inner.state = ProcessState::NotRunning;
        ProcessEvent::new(inner.generation, ProcessEventKind::Exited { code: Some(0) })
    }

    pub fn output(&self, text: &str) -> ProcessEvent {
        let inner = self.inner.lock().unwrap();
        ProcessEvent::new(
            inner.generation,
            ProcessEventKind::Output {
                stream: super::OutputStream::Stdout,
                data: text.as_bytes().to_vec(),
            },
        )
    }

    pub fn drained(&self) -> ProcessEvent {
        ProcessEvent::new(self.current_generation(), ProcessEventKind::Drained)
    }
}

impl Transport for FakeTransport {
    fn start(&mut self, spec: LaunchSpec) -> EngineResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ProcessState::NotRunning {
            return Err(EngineError::AlreadyRunning(inner.generation));
        }
        if inner.fail_spawn {
            inner.fail_spawn = false;
            return Err(EngineError::Spawn {
                program: spec.program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        inner.generation = next_generation();
        inner.state = ProcessState::Running;
        inner.starts.push(spec);
        Ok(inner.generation)
    }

    fn write(&mut self, data: &[u8]) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ProcessState::Running {
            return Err(EngineError::NotRunning);
        }
        if inner.fail_writes {
            return Err(EngineError::Write("broken pipe".to_string()));
        }
        inner.writes.push(data.to_vec());
        Ok(())
    }

    fn quit(&mut self, _grace: Duration) -> StopOutcome {
        let mut inner = self.inner.lock().unwrap();
        inner.quits += 1;
        if inner.state == ProcessState::NotRunning {
            return StopOutcome::Exited;
        }
        inner.generation = next_generation();
        inner.state = ProcessState::NotRunning;
        inner.quit_outcome
    }

    fn poll(&mut self) {}

    fn state(&self) -> ProcessState {
        self.inner.lock().unwrap().state
    }

    fn generation(&self) -> u64 {
        self.inner.lock().unwrap().generation
    }
}
