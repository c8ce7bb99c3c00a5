use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, EngineResult};

/// A named engine-specific marker, e.g. the DVD title count line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerPattern {
    pub name: String,
    pub pattern: String,
}

impl MarkerPattern {
    pub fn new(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

/// Output patterns as stored in the config file. An empty string disables
/// that pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub size: String,
    pub cache: String,
    pub position: String,
    pub index: String,
    pub reference_url: String,
    pub reference: String,
    pub start: String,
    pub error: String,
    /// "Failed to open <target>". Only fatal when the target is the media
    /// being played; the engine decides.
    pub open_failed: String,
    pub markers: Vec<MarkerPattern>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            size: r"VO:.*[^0-9]([0-9]+)x([0-9]+)".to_string(),
            cache: r"Cache fill:[^0-9]*([0-9\.]+)%".to_string(),
            position: r"V:\s*([0-9\.]+)".to_string(),
            index: r"Generating Index: +([0-9]+)%".to_string(),
            reference_url: r"Playing\s+(.*[^\.])\.?\s*$".to_string(),
            reference: r"Reference Media file".to_string(),
            start: r"Start[^ ]* play".to_string(),
            error: r"^(?:Cannot open file .*|No stream found.*|Cannot find codec .*)$".to_string(),
            open_failed: r"^Failed to open (.+)$".to_string(),
            markers: vec![
                MarkerPattern::new("dvd_titles", r"There are ([0-9]+) titles"),
                MarkerPattern::new("dvd_chapters", r"There are ([0-9]+) chapters"),
                MarkerPattern::new("vcd_track", r"track ([0-9]+):"),
                MarkerPattern::new("audio_cd_tracks", r"[Aa]udio CD[^0-9]+([0-9]+)[^0-9]tracks"),
            ],
        }
    }
}

/// Compiled, immutable form of a [`PatternConfig`]. Built once per engine and
/// handed to the parser.
#[derive(Debug, Clone)]
pub struct PatternSet {
    pub size: Option<Regex>,
    pub cache: Option<Regex>,
    pub position: Option<Regex>,
    pub index: Option<Regex>,
    pub reference_url: Option<Regex>,
    pub reference: Option<Regex>,
    pub start: Option<Regex>,
    pub error: Option<Regex>,
    pub open_failed: Option<Regex>,
    pub markers: Vec<(String, Regex)>,
    pub(crate) stream_title: Regex,
}

fn compile(name: &str, pattern: &str) -> EngineResult<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|source| EngineError::Pattern {
            name: name.to_string(),
            source,
        })
}

impl PatternSet {
    pub fn compile(config: &PatternConfig) -> EngineResult<Self> {
        let mut markers = Vec::with_capacity(config.markers.len());
        for marker in &config.markers {
            if let Some(regex) = compile(&marker.name, &marker.pattern)? {
                markers.push((marker.name.clone(), regex));
            }
        }

        Ok(Self {
            size: compile("size", &config.size)?,
            cache: compile("cache", &config.cache)?,
            position: compile("position", &config.position)?,
            index: compile("index", &config.index)?,
            reference_url: compile("reference_url", &config.reference_url)?,
            reference: compile("reference", &config.reference)?,
            start: compile("start", &config.start)?,
            error: compile("error", &config.error)?,
            open_failed: compile("open_failed", &config.open_failed)?,
            markers,
            stream_title: Regex::new(r"StreamTitle='(.*?)';").map_err(|source| EngineError::Pattern {
                name: "stream_title".to_string(),
                source,
            })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns_compile() {
        let set = PatternSet::compile(&PatternConfig::default()).unwrap();
        assert!(set.size.is_some());
        assert_eq!(set.markers.len(), 4);
    }

    #[test]
    fn test_default_error_skips_open_warnings() {
        let set = PatternSet::compile(&PatternConfig::default()).unwrap();
        let error = set.error.unwrap();
        assert!(error.is_match("Cannot find codec for audio format 0x55."));
        assert!(error.is_match("No stream found to handle url mms://example"));
        assert!(!error.is_match("Failed to open /dev/rtc: Permission denied (it should be readable by the user.)"));
        assert!(!error.is_match("Failed to open VDPAU backend libvdpau_nvidia.so"));

        let caps = set.open_failed.unwrap().captures("Failed to open /dev/rtc: Permission denied").unwrap();
        assert_eq!(&caps[1], "/dev/rtc: Permission denied");
    }

    #[test]
    fn test_empty_pattern_disables() {
        let config = PatternConfig {
            index: String::new(),
            ..PatternConfig::default()
        };
        let set = PatternSet::compile(&config).unwrap();
        assert!(set.index.is_none());
        assert!(set.cache.is_some());
    }

    #[test]
    fn test_invalid_pattern_names_the_field() {
        let config = PatternConfig {
            cache: "([0-9".to_string(),
            ..PatternConfig::default()
        };
        match PatternSet::compile(&config) {
            Err(EngineError::Pattern { name, .. }) => assert_eq!(name, "cache"),
            other => panic!("expected pattern error, got {:?}", other.map(|_| ())),
        }
    }
}
