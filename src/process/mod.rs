pub mod command_queue;
pub mod environment;
pub mod supervisor;

pub use command_queue::*;
pub use environment::*;
pub use supervisor::*;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::core::error::EngineResult;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Hands out process generations. They are unique across all supervisors, so
/// one event channel can serve several processes without mixing them up.
pub fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::SeqCst)
}

/// OS-level lifecycle of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotRunning,
    Starting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEventKind {
    Started,
    Output { stream: OutputStream, data: Vec<u8> },
    /// The last written command has been fully flushed
    Drained,
    Exited { code: Option<i32> },
}

/// Everything a supervised process reports, stamped with the generation of
/// the handle it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessEvent {
    pub generation: u64,
    pub kind: ProcessEventKind,
}

impl ProcessEvent {
    pub fn new(generation: u64, kind: ProcessEventKind) -> Self {
        Self { generation, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited on its own within the grace period
    Exited,
    Killed,
    /// Still around after the kill
    Unreaped,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// URL the process will fetch, consulted for proxy settings
    pub target_url: Option<String>,
    /// Whether stdin is kept open as a command channel
    pub command_channel: bool,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn command_channel(mut self, enabled: bool) -> Self {
        self.command_channel = enabled;
        self
    }
}

/// The byte pipe an adapter drives. Implemented by [`ProcessSupervisor`] for
/// real children and by recording fakes in tests.
pub trait Transport: Send {
    fn start(&mut self, spec: LaunchSpec) -> EngineResult<u64>;
    fn write(&mut self, data: &[u8]) -> EngineResult<()>;
    /// Stops the current process: unregisters it, closes stdin, waits `grace`
    /// and kills it if needed.
    fn quit(&mut self, grace: Duration) -> StopOutcome;
    /// Reaps an exited child and reports it on the event channel.
    fn poll(&mut self);
    fn state(&self) -> ProcessState;
    fn generation(&self) -> u64;

    fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }
}

#[cfg(test)]
pub mod testing;
