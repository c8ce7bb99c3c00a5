//! Message shapes exchanged with a helper process, one JSON object per line.
//!
//! Calls flow from the player to the helper, notifications flow back. Neither
//! side waits for a reply; the player reconciles its state from the
//! notifications alone.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum BusCall {
    Play { url: String },
    Pause,
    Seek { pos: i64, absolute: bool },
    Volume { delta: i32 },
    Stop,
    NewStream { url: String, window_id: Option<u64> },
    AudioTrack { index: usize },
    SubtitleTrack { index: usize },
    Quit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notify", rename_all = "snake_case")]
pub enum BusNotification {
    Running { service: String },
    Loading { percent: u32 },
    StreamInfo { length: i64, aspect: f64 },
    Playing,
    Paused,
    Progress { pos: i64 },
    Eof,
    Dimensions { width: u32, height: u32 },
    Languages { audio: Vec<String>, subtitles: Vec<String> },
    Error { message: String },
}

/// Serializes a message followed by a newline.
pub fn encode<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

/// Parses one line, None when it isn't a message of this kind.
pub fn decode<T: DeserializeOwned>(line: &str) -> Option<T> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(message) => Some(message),
        Err(e) => {
            log::debug!("Not a bus message ({}): {}", e, line);
            None
        }
    }
}

/// Reassembles newline terminated lines from arbitrary chunks.
#[derive(Debug, Default)]
pub struct LineDecoder {
    partial: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.partial);
                let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
                if !line.is_empty() {
                    lines.push(line);
                }
            } else {
                self.partial.push(byte);
            }
        }
        lines
    }

    pub fn reset(&mut self) {
        self.partial.clear();
    }
}
