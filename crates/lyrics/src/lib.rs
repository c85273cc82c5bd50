//! Streaming parser for LRC sidecar files.
//!
//! The input is consumed one character at a time. Every `[` closes the
//! segment collected since the previous `[` and classifies it:
//!
//! * `[key:value]` where the bracket content starts with a letter is a header
//!   tag and lands in [`ParsedLyrics::meta`] (last value wins),
//! * `[mm:ss.xx]text` is a timed line appended to [`ParsedLyrics::lines`],
//! * anything else is dropped.
//!
//! Because only a following `[` closes a segment, the last segment of a file
//! is dropped unless [`ParserOptions::flush_trailing`] is set.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;

pub const SIDECAR_EXTENSION: &str = "lrc";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LyricLine {
    #[serde(rename = "time")]
    pub timestamp_seconds: f64,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ParsedLyrics {
    pub meta: BTreeMap<String, String>,
    #[serde(rename = "lyrics")]
    pub lines: Vec<LyricLine>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// Also classify the segment still pending at end of input.
    pub flush_trailing: bool,
    /// Strip `\r`/`\n` from the end of each line's text. Off keeps the
    /// text exactly as written up to the next `[`.
    pub trim_line_endings: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Before the first `[`; characters are ignored.
    Idle,
    /// Inside the bracketed part of a segment.
    Tag,
    /// After the closing `]`, collecting line text.
    Text,
}

#[derive(Debug)]
pub struct LrcParser {
    options: ParserOptions,
    state: State,
    tag: String,
    text: String,
    closings: usize,
    out: ParsedLyrics,
}

impl LrcParser {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            options,
            state: State::Idle,
            tag: String::new(),
            text: String::new(),
            closings: 0,
            out: ParsedLyrics::default(),
        }
    }

    pub fn feed(&mut self, ch: char) {
        match ch {
            '[' => {
                self.finalize_segment();
                self.state = State::Tag;
            }
            ']' => match self.state {
                State::Idle => {}
                State::Tag => {
                    self.closings += 1;
                    self.state = State::Text;
                }
                State::Text => self.closings += 1,
            },
            _ => match self.state {
                State::Idle => {}
                State::Tag => self.tag.push(ch),
                State::Text => self.text.push(ch),
            },
        }
    }

    pub fn feed_str(&mut self, chunk: &str) {
        for ch in chunk.chars() {
            self.feed(ch);
        }
    }

    pub fn finish(mut self) -> ParsedLyrics {
        if self.options.flush_trailing {
            self.finalize_segment();
        }
        self.out
    }

    fn finalize_segment(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Idle);
        let tag = std::mem::take(&mut self.tag);
        let text = std::mem::take(&mut self.text);
        let closings = std::mem::replace(&mut self.closings, 0);

        if state == State::Idle || closings != 1 {
            return;
        }

        let starts_alpha = tag.chars().next().map(char::is_alphabetic);
        match starts_alpha {
            None => {}
            Some(true) => {
                if let Some((key, value)) = tag.split_once(':') {
                    self.out.meta.insert(key.to_string(), value.to_string());
                }
            }
            Some(false) => {
                if let Some(timestamp_seconds) = parse_timestamp(&tag) {
                    let text = if self.options.trim_line_endings {
                        text.trim_end_matches(['\r', '\n']).to_string()
                    } else {
                        text
                    };
                    self.out.lines.push(LyricLine {
                        timestamp_seconds,
                        text,
                    });
                }
            }
        }
    }
}

/// `minutes:seconds` with optional fractional seconds.
fn parse_timestamp(value: &str) -> Option<f64> {
    let (minutes, seconds) = value.split_once(':')?;
    let minutes: i64 = minutes.trim().parse().ok()?;
    let seconds: f64 = seconds.trim().parse().ok()?;
    let total = minutes as f64 * 60.0 + seconds;
    if total.is_finite() {
        Some(total)
    } else {
        None
    }
}

pub fn parse_str(input: &str, options: ParserOptions) -> ParsedLyrics {
    let mut parser = LrcParser::new(options);
    parser.feed_str(input);
    parser.finish()
}

/// Parses line by line without holding the whole input; invalid UTF-8 is
/// replaced rather than rejected.
pub fn parse_reader<R: BufRead>(mut reader: R, options: ParserOptions) -> io::Result<ParsedLyrics> {
    let mut parser = LrcParser::new(options);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        parser.feed_str(&String::from_utf8_lossy(&buf));
    }
    Ok(parser.finish())
}

pub fn parse_file(path: &Path, options: ParserOptions) -> io::Result<ParsedLyrics> {
    let file = File::open(path)?;
    parse_reader(BufReader::new(file), options)
}

/// `song.flac` -> `song.lrc` in the same directory.
pub fn sidecar_path(audio_path: &Path) -> PathBuf {
    audio_path.with_extension(SIDECAR_EXTENSION)
}

pub fn has_sidecar(audio_path: &Path) -> bool {
    sidecar_path(audio_path).is_file()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::Path;

    use super::{parse_reader, parse_str, sidecar_path, LyricLine, ParserOptions};

    fn line(timestamp_seconds: f64, text: &str) -> LyricLine {
        LyricLine {
            timestamp_seconds,
            text: text.to_string(),
        }
    }

    #[test]
    fn drops_trailing_segment_by_default() {
        let parsed = parse_str(
            "[ar:Artist][00:12.50]Hello[00:15.00]World[00:20.00]",
            ParserOptions::default(),
        );
        assert_eq!(parsed.meta.len(), 1);
        assert_eq!(parsed.meta.get("ar").map(String::as_str), Some("Artist"));
        assert_eq!(parsed.lines, vec![line(12.5, "Hello"), line(15.0, "World")]);
    }

    #[test]
    fn flushes_trailing_segment_when_asked() {
        let parsed = parse_str(
            "[00:01.00]One[00:02.50]Two",
            ParserOptions {
                flush_trailing: true,
                ..ParserOptions::default()
            },
        );
        assert_eq!(parsed.lines, vec![line(1.0, "One"), line(2.5, "Two")]);
    }

    #[test]
    fn multiline_file_keeps_line_endings_by_default() {
        let input = "[ar:Someone]\n[01:02.25]First line\r\n[01:10]Second line\n[02:00]\n";
        let parsed = parse_str(input, ParserOptions::default());
        assert_eq!(parsed.meta.get("ar").map(String::as_str), Some("Someone"));
        assert_eq!(
            parsed.lines,
            vec![line(62.25, "First line\r\n"), line(70.0, "Second line\n")]
        );
    }

    #[test]
    fn multiline_file_strips_line_endings_when_asked() {
        let input = "[ti:Song]\r\n[ar:Someone]\n[01:02.25]First line\r\n[01:10]Second line\n[02:00]\n";
        let parsed = parse_str(
            input,
            ParserOptions {
                trim_line_endings: true,
                ..ParserOptions::default()
            },
        );
        assert_eq!(parsed.meta.get("ti").map(String::as_str), Some("Song"));
        assert_eq!(parsed.meta.get("ar").map(String::as_str), Some("Someone"));
        assert_eq!(
            parsed.lines,
            vec![line(62.25, "First line"), line(70.0, "Second line")]
        );
    }

    #[test]
    fn meta_value_keeps_everything_after_first_colon() {
        let parsed = parse_str("[by:a:b:c][x", ParserOptions::default());
        assert_eq!(parsed.meta.get("by").map(String::as_str), Some("a:b:c"));
    }

    #[test]
    fn duplicate_meta_keys_keep_last_value() {
        let parsed = parse_str("[ar:First][ar:Second][", ParserOptions::default());
        assert_eq!(parsed.meta.get("ar").map(String::as_str), Some("Second"));
    }

    #[test]
    fn malformed_segments_are_skipped() {
        let input = "preamble [][]x[nokey][00:xx]bad[00:01]a]b[00:02]ok[";
        let parsed = parse_str(input, ParserOptions::default());
        assert!(parsed.meta.is_empty());
        assert_eq!(parsed.lines, vec![line(2.0, "ok")]);
    }

    #[test]
    fn empty_input_is_empty() {
        let parsed = parse_str(
            "",
            ParserOptions {
                flush_trailing: true,
                ..ParserOptions::default()
            },
        );
        assert!(parsed.meta.is_empty());
        assert!(parsed.lines.is_empty());
    }

    #[test]
    fn reader_matches_string_parser() {
        let input = "[ar:Artist]\n[00:12.50]Hello\n[00:15.00]World\n[00:20.00]\n";
        let from_reader = parse_reader(Cursor::new(input.as_bytes()), ParserOptions::default()).unwrap();
        assert_eq!(from_reader, parse_str(input, ParserOptions::default()));
    }

    #[test]
    fn reader_tolerates_invalid_utf8() {
        let bytes: &[u8] = b"[00:01.00]caf\xe9\n[00:02.00]";
        let parsed = parse_reader(Cursor::new(bytes), ParserOptions::default()).unwrap();
        assert_eq!(parsed.lines.len(), 1);
        assert!(parsed.lines[0].text.starts_with("caf"));
    }

    #[test]
    fn sidecar_shares_the_base_name() {
        assert_eq!(
            sidecar_path(Path::new("/music/a/01 Song.flac")),
            Path::new("/music/a/01 Song.lrc")
        );
    }
}
