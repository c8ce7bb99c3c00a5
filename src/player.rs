use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::core::{EngineConfig, EngineResult, PlayerEvent};
use crate::engine::{create_engine, EngineAdapter, EngineKind, SharedAdjustments};
use crate::process::ProcessEvent;

/// One engine plus the channel its processes report on. Everything runs on
/// the thread that owns the player.
pub struct Player {
    engine: Box<dyn EngineAdapter>,
    events: mpsc::Receiver<ProcessEvent>,
}

impl Player {
    const WAIT_STEP: Duration = Duration::from_millis(50);

    pub fn new(kind: EngineKind, config: &EngineConfig) -> EngineResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let adjustments = SharedAdjustments::from_colors(&config.colors);
        let engine = create_engine(kind, config, sender, adjustments)?;
        Ok(Self::with_engine(engine, receiver))
    }

    pub fn with_engine(engine: Box<dyn EngineAdapter>, events: mpsc::Receiver<ProcessEvent>) -> Self {
        Self { engine, events }
    }

    pub fn engine(&self) -> &dyn EngineAdapter {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut dyn EngineAdapter {
        self.engine.as_mut()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.engine.subscribe()
    }

    /// Waits up to `timeout` for process events, handles everything that is
    /// ready and delivers deferred updates.
    pub fn run_once(&mut self, timeout: Duration) {
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.engine.handle_process_event(event);
                self.drain();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(timeout),
        }
        self.engine.poll();
        self.drain();
        self.engine.tick();
    }

    /// Runs the loop until `done` holds or `timeout` passes. Returns whether
    /// the condition was met.
    pub fn wait_until(&mut self, timeout: Duration, mut done: impl FnMut(&dyn EngineAdapter) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(self.engine.as_ref()) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                log::debug!("Gave up waiting after {:?}", timeout);
                return false;
            }
            self.run_once(Self::WAIT_STEP.min(deadline - now));
        }
    }

    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.engine.handle_process_event(event);
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if self.engine.state().is_active() {
            self.engine.quit();
        }
    }
}
