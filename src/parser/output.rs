// =============================================================================
// OUTPUT PARSER - ENGINE STDOUT/STDERR TO STRUCTURED EVENTS
// =============================================================================
//
// Engines print human readable status text, partly as normal lines and partly
// as progress lines that end in a bare '\r' to overwrite the terminal. The
// parser splits the raw byte stream into records and matches every record
// against a fixed priority table. Records that match nothing in the table are
// forwarded as Text, followed by whatever the catch-all patterns (markers,
// video size, playback start) make of them.
//
// A '\r' at the very end of a chunk is held back: only the next byte can tell
// a progress record apart from the first half of "\r\n". This keeps the output
// identical no matter how the bytes were chunked.
//
// =============================================================================

use super::patterns::PatternSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Subtitle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    Position { deciseconds: i64 },
    Length { deciseconds: i64 },
    Cache { percent: u32 },
    IndexProgress { percent: u32 },
    Paused,
    Started,
    ReferenceUrl(String),
    ReferenceFile,
    VideoWidth(u32),
    VideoHeight(u32),
    VideoAspect(f64),
    Size { width: u32, height: u32 },
    LanguageTrack { id: i32, name: String, kind: TrackKind },
    StreamTitle(String),
    Error(String),
    /// "Failed to open ..." with the rest of the line as the target
    OpenFailed { target: String, message: String },
    Marker { name: String, values: Vec<String> },
    Text(String),
}

pub struct OutputParser {
    patterns: PatternSet,
    partial: Vec<u8>,
    held_cr: bool,
}

/// Parses a number that may use ',' as the decimal separator.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.replace(',', ".").parse::<f64>().ok().filter(|v| v.is_finite())
}

fn to_deciseconds(seconds: f64) -> i64 {
    (seconds * 10.0).round() as i64
}

impl OutputParser {
    pub fn new(patterns: PatternSet) -> Self {
        Self {
            patterns,
            partial: Vec::new(),
            held_cr: false,
        }
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// Feeds a raw chunk and returns the events of every record it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        for &byte in bytes {
            if self.held_cr {
                self.held_cr = false;
                if byte == b'\n' {
                    self.complete_record(false, &mut events);
                    continue;
                }
                self.complete_record(true, &mut events);
            }
            match byte {
                b'\n' => self.complete_record(false, &mut events),
                b'\r' => self.held_cr = true,
                _ => self.partial.push(byte),
            }
        }
        events
    }

    /// Flushes whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        if self.held_cr {
            self.held_cr = false;
            self.complete_record(true, &mut events);
        } else if !self.partial.is_empty() {
            self.complete_record(false, &mut events);
        }
        events
    }

    /// Drops a partial record, used when a new process replaces the old one.
    pub fn reset(&mut self) {
        self.partial.clear();
        self.held_cr = false;
    }

    fn complete_record(&mut self, progress: bool, events: &mut Vec<ParsedEvent>) {
        let raw = std::mem::take(&mut self.partial);
        let text = String::from_utf8_lossy(&raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }
        if progress {
            events.extend(self.parse_progress(line));
            return;
        }
        match self.parse_line(line) {
            Some(event) => events.push(event),
            None => {
                events.push(ParsedEvent::Text(line.to_string()));
                events.extend(self.parse_catch_all(line));
            }
        }
    }

    fn parse_progress(&self, line: &str) -> Option<ParsedEvent> {
        if let Some(caps) = self.patterns.position.as_ref().and_then(|re| re.captures(line)) {
            return caps
                .get(1)
                .and_then(|m| parse_decimal(m.as_str()))
                .map(|secs| ParsedEvent::Position { deciseconds: to_deciseconds(secs) });
        }
        if let Some(caps) = self.patterns.cache.as_ref().and_then(|re| re.captures(line)) {
            return caps
                .get(1)
                .and_then(|m| parse_decimal(m.as_str()))
                .map(|percent| ParsedEvent::Cache { percent: percent.max(0.0) as u32 });
        }
        if let Some(caps) = self.patterns.index.as_ref().and_then(|re| re.captures(line)) {
            return caps
                .get(1)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .map(|percent| ParsedEvent::IndexProgress { percent });
        }
        None
    }

    fn parse_line(&self, line: &str) -> Option<ParsedEvent> {
        let patterns = &self.patterns;

        if line.starts_with("ID_PAUSED") {
            return Some(ParsedEvent::Paused);
        }
        if let Some(value) = line.strip_prefix("ID_LENGTH=") {
            return Some(match parse_decimal(value) {
                Some(secs) if secs >= 0.0 => ParsedEvent::Length { deciseconds: to_deciseconds(secs) },
                _ => ParsedEvent::Text(line.to_string()),
            });
        }
        if let Some(caps) = patterns.reference_url.as_ref().and_then(|re| re.captures(line)) {
            if let Some(url) = caps.get(1) {
                return Some(ParsedEvent::ReferenceUrl(url.as_str().to_string()));
            }
        }
        if patterns.reference.as_ref().is_some_and(|re| re.is_match(line)) {
            return Some(ParsedEvent::ReferenceFile);
        }
        if let Some(value) = line.strip_prefix("ID_VIDEO_WIDTH=") {
            return Some(match value.trim().parse::<u32>() {
                Ok(width) => ParsedEvent::VideoWidth(width),
                Err(_) => ParsedEvent::Text(line.to_string()),
            });
        }
        if let Some(value) = line.strip_prefix("ID_VIDEO_HEIGHT=") {
            return Some(match value.trim().parse::<u32>() {
                Ok(height) => ParsedEvent::VideoHeight(height),
                Err(_) => ParsedEvent::Text(line.to_string()),
            });
        }
        if let Some(value) = line.strip_prefix("ID_VIDEO_ASPECT=") {
            return Some(match parse_decimal(value) {
                Some(aspect) => ParsedEvent::VideoAspect(aspect),
                None => ParsedEvent::Text(line.to_string()),
            });
        }
        if let Some(rest) = line.strip_prefix("ID_AID_") {
            if let Some(event) = parse_track(rest, TrackKind::Audio) {
                return Some(event);
            }
        }
        if let Some(rest) = line.strip_prefix("ID_SID_") {
            if let Some(event) = parse_track(rest, TrackKind::Subtitle) {
                return Some(event);
            }
        }
        if line.starts_with("ICY Info:") {
            if let Some(title) = patterns.stream_title.captures(line).and_then(|c| c.get(1)) {
                return Some(ParsedEvent::StreamTitle(title.as_str().to_string()));
            }
        }
        if patterns.error.as_ref().is_some_and(|re| re.is_match(line)) {
            return Some(ParsedEvent::Error(line.to_string()));
        }
        if let Some(caps) = patterns.open_failed.as_ref().and_then(|re| re.captures(line)) {
            if let Some(target) = caps.get(1) {
                return Some(ParsedEvent::OpenFailed {
                    target: target.as_str().to_string(),
                    message: line.to_string(),
                });
            }
        }
        None
    }

    /// Runs after the record was forwarded as Text.
    fn parse_catch_all(&self, line: &str) -> Option<ParsedEvent> {
        let patterns = &self.patterns;

        for (name, regex) in &patterns.markers {
            if let Some(caps) = regex.captures(line) {
                let values = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str().to_string())
                    .collect();
                return Some(ParsedEvent::Marker {
                    name: name.clone(),
                    values,
                });
            }
        }
        if let Some(caps) = patterns.size.as_ref().and_then(|re| re.captures(line)) {
            let width = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(0);
            let height = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(0);
            if width > 0 && height > 0 {
                return Some(ParsedEvent::Size { width, height });
            }
            return None;
        }
        if patterns.start.as_ref().is_some_and(|re| re.is_match(line)) {
            return Some(ParsedEvent::Started);
        }
        None
    }
}

/// `<n>=<name>` or `<n>_<FIELD>=<name>`
fn parse_track(rest: &str, kind: TrackKind) -> Option<ParsedEvent> {
    let (key, name) = rest.split_once('=')?;
    let id_text = key.split('_').next()?;
    let id = id_text.parse::<i32>().ok()?;
    Some(ParsedEvent::LanguageTrack {
        id,
        name: name.trim().to_string(),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PatternConfig;

    fn parser() -> OutputParser {
        OutputParser::new(PatternSet::compile(&PatternConfig::default()).unwrap())
    }

    const TRANSCRIPT: &[u8] = b"MPlayer 1.0 (C) 2000-2009 MPlayer Team\n\
Playing /tmp/movie.avi.\r\n\
ID_VIDEO_WIDTH=1280\n\
ID_VIDEO_HEIGHT=720\n\
ID_VIDEO_ASPECT=1,777778\n\
ID_LENGTH=95.40\n\
ID_AID_0_LANG=eng\n\
ID_AID_1_LANG=deu\n\
ID_SID_0_LANG=fra\n\
VO: [xv] 1280x720 => 1280x720 Planar YV12\n\
Starting playback...\n\
Cache fill:  4.50% (6789 bytes)\r\
A:   0.1 V:   0.1 A-V:  0.000 ct:  0.000\r\
A:   0.2 V:   0.2 A-V:  0.000 ct:  0.000\r\
ID_PAUSED\n\
ICY Info: StreamTitle='Band - Song';StreamUrl='';\n\
There are 7 titles on this DVD.\n\
Failed to open /dev/dvd.\n\
Exiting... (End of file)\n";

    #[test]
    fn test_transcript_events() {
        let mut p = parser();
        let mut events = p.feed(TRANSCRIPT);
        events.extend(p.finish());

        assert_eq!(
            events,
            vec![
                ParsedEvent::Text("MPlayer 1.0 (C) 2000-2009 MPlayer Team".to_string()),
                ParsedEvent::ReferenceUrl("/tmp/movie.avi".to_string()),
                ParsedEvent::VideoWidth(1280),
                ParsedEvent::VideoHeight(720),
                ParsedEvent::VideoAspect(1.777778),
                ParsedEvent::Length { deciseconds: 954 },
                ParsedEvent::LanguageTrack { id: 0, name: "eng".to_string(), kind: TrackKind::Audio },
                ParsedEvent::LanguageTrack { id: 1, name: "deu".to_string(), kind: TrackKind::Audio },
                ParsedEvent::LanguageTrack { id: 0, name: "fra".to_string(), kind: TrackKind::Subtitle },
                ParsedEvent::Text("VO: [xv] 1280x720 => 1280x720 Planar YV12".to_string()),
                ParsedEvent::Size { width: 1280, height: 720 },
                ParsedEvent::Text("Starting playback...".to_string()),
                ParsedEvent::Started,
                ParsedEvent::Cache { percent: 4 },
                ParsedEvent::Position { deciseconds: 1 },
                ParsedEvent::Position { deciseconds: 2 },
                ParsedEvent::Paused,
                ParsedEvent::StreamTitle("Band - Song".to_string()),
                ParsedEvent::Text("There are 7 titles on this DVD.".to_string()),
                ParsedEvent::Marker { name: "dvd_titles".to_string(), values: vec!["7".to_string()] },
                ParsedEvent::OpenFailed {
                    target: "/dev/dvd.".to_string(),
                    message: "Failed to open /dev/dvd.".to_string(),
                },
                ParsedEvent::Text("Exiting... (End of file)".to_string()),
            ]
        );
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let mut whole = parser();
        let mut expected = whole.feed(TRANSCRIPT);
        expected.extend(whole.finish());

        for split in 0..=TRANSCRIPT.len() {
            let mut p = parser();
            let mut events = p.feed(&TRANSCRIPT[..split]);
            events.extend(p.feed(&TRANSCRIPT[split..]));
            events.extend(p.finish());
            assert_eq!(events, expected, "split at byte {}", split);
        }

        let mut p = parser();
        let mut events = Vec::new();
        for byte in TRANSCRIPT {
            events.extend(p.feed(std::slice::from_ref(byte)));
        }
        events.extend(p.finish());
        assert_eq!(events, expected);
    }

    #[test]
    fn test_split_crlf_is_not_a_progress_record() {
        let mut p = parser();
        // A progress record never yields Text, so the line must survive the split
        assert!(p.feed(b"hello\r").is_empty());
        assert_eq!(p.feed(b"\n"), vec![ParsedEvent::Text("hello".to_string())]);
    }

    #[test]
    fn test_trailing_progress_record_on_finish() {
        let mut p = parser();
        assert!(p.feed(b"A:  1.0 V:  12.5 \r").is_empty());
        assert_eq!(p.finish(), vec![ParsedEvent::Position { deciseconds: 125 }]);
    }

    #[test]
    fn test_dimensions_arrive_in_separate_chunks() {
        let mut p = parser();
        assert_eq!(p.feed(b"ID_VIDEO_WIDTH=1280\n"), vec![ParsedEvent::VideoWidth(1280)]);
        assert_eq!(p.feed(b"ID_VIDEO_HEIGHT=720\n"), vec![ParsedEvent::VideoHeight(720)]);
        assert_eq!(p.feed(b"ID_VIDEO_ASPECT=1.777778\n"), vec![ParsedEvent::VideoAspect(1.777778)]);
    }

    #[test]
    fn test_bad_numbers_skip_only_that_field() {
        let mut p = parser();
        let events = p.feed(b"ID_LENGTH=abc\nID_VIDEO_WIDTH=12x\nID_LENGTH=3,5\n");
        assert_eq!(
            events,
            vec![
                ParsedEvent::Text("ID_LENGTH=abc".to_string()),
                ParsedEvent::Text("ID_VIDEO_WIDTH=12x".to_string()),
                ParsedEvent::Length { deciseconds: 35 },
            ]
        );
    }

    #[test]
    fn test_zero_size_is_not_reported() {
        let mut p = parser();
        assert_eq!(
            p.feed(b"VO: [null] 0x0 => 0x0\n"),
            vec![ParsedEvent::Text("VO: [null] 0x0 => 0x0".to_string())]
        );
    }

    #[test]
    fn test_catch_all_lines_reach_the_console_first() {
        let mut p = parser();
        assert_eq!(
            p.feed(b"Starting playback...\nAudio CD: 12 tracks\nCannot find codec for audio format 0x55.\n"),
            vec![
                ParsedEvent::Text("Starting playback...".to_string()),
                ParsedEvent::Started,
                ParsedEvent::Text("Audio CD: 12 tracks".to_string()),
                ParsedEvent::Marker { name: "audio_cd_tracks".to_string(), values: vec!["12".to_string()] },
                ParsedEvent::Error("Cannot find codec for audio format 0x55.".to_string()),
            ]
        );
    }

    #[test]
    fn test_open_failure_names_its_target() {
        let mut p = parser();
        assert_eq!(
            p.feed(b"Failed to open /dev/rtc: Permission denied (it should be readable by the user.)\n"),
            vec![ParsedEvent::OpenFailed {
                target: "/dev/rtc: Permission denied (it should be readable by the user.)".to_string(),
                message: "Failed to open /dev/rtc: Permission denied (it should be readable by the user.)".to_string(),
            }]
        );
    }

    #[test]
    fn test_unmatched_progress_record_is_dropped() {
        let mut p = parser();
        assert_eq!(p.feed(b"some spinner\rnext\n"), vec![ParsedEvent::Text("next".to_string())]);
    }

    #[test]
    fn test_index_progress() {
        let mut p = parser();
        assert_eq!(
            p.feed(b"Generating Index:  42%\rGenerating Index:  43%\r\n"),
            vec![
                ParsedEvent::IndexProgress { percent: 42 },
                ParsedEvent::Text("Generating Index:  43%".to_string()),
            ]
        );
    }
}
