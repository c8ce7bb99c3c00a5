use std::collections::VecDeque;

use super::Transport;

/// FIFO of text commands for an engine that takes one write at a time.
///
/// The head is the command in flight: written, but not yet reported drained.
/// Everything behind it waits its turn.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: VecDeque<String>,
}

fn encode(command: &str) -> Vec<u8> {
    let mut bytes = command.as_bytes().to_vec();
    bytes.push(b'\n');
    bytes
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command, writing it right away when nothing is in flight.
    /// Returns false when the transport is down; nothing is buffered then.
    pub fn push(&mut self, transport: &mut dyn Transport, command: &str) -> bool {
        if !transport.is_running() {
            log::debug!("Dropping command '{}', engine not running", command);
            return false;
        }
        self.commands.push_back(command.to_string());
        if self.commands.len() == 1 {
            if let Err(e) = transport.write(&encode(command)) {
                log::error!("Failed to write command '{}': {}", command, e);
                self.commands.clear();
                return false;
            }
        }
        true
    }

    /// Handles a drain signal: retires the head and writes the next command.
    pub fn pop_acknowledged(&mut self, transport: &mut dyn Transport) -> Option<String> {
        let done = self.commands.pop_front();
        if let Some(next) = self.commands.front() {
            if let Err(e) = transport.write(&encode(next)) {
                log::error!("Failed to write command '{}': {}", next, e);
                self.commands.clear();
            }
        }
        done
    }

    /// Removes the first queued, not yet written command starting with
    /// `prefix`. The head is never touched.
    pub fn remove_queued(&mut self, prefix: &str) -> bool {
        let position = self
            .commands
            .iter()
            .skip(1)
            .position(|command| command.starts_with(prefix));
        match position {
            Some(index) => {
                let removed = self.commands.remove(index + 1);
                log::debug!("Removed queued command {:?}", removed);
                true
            }
            None => false,
        }
    }

    /// Whether an unsent command with this prefix is waiting.
    pub fn has_queued(&self, prefix: &str) -> bool {
        self.commands.iter().skip(1).any(|command| command.starts_with(prefix))
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.commands.front().map(String::as_str)
    }

    pub fn clear(&mut self) -> Vec<String> {
        self.commands.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
