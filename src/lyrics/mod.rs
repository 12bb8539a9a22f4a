//! Canonical lyric model, secondary-track alignment and rendering.
//!
//! Source clients hand their raw per-source timing structures to the
//! parsers in [`krc`] and [`qrc`]; everything downstream works on the
//! absolute-millisecond [`LyricsDocument`] built here.

pub mod krc;
pub mod qrc;

use crate::config::DisplayMode;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Smallest unit: one timed word (or syllable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricsWord {
    /// Absolute start time in milliseconds.
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// One lyric line; words are sorted ascending by start and non-overlapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricsLine {
    pub start_ms: u64,
    pub end_ms: u64,
    pub words: Vec<LyricsWord>,
}

impl LyricsLine {
    /// The full line text, words concatenated without extra separators.
    pub fn text(&self) -> String {
        self.words.iter().map(|w| w.text.as_str()).collect()
    }
}

/// A parsed lyric document: primary track plus optional translation and
/// romanization tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricsDocument {
    /// Free-form metadata tags (`ar`, `ti`, `al`, ...).
    pub tags: HashMap<String, String>,
    pub original: Vec<LyricsLine>,
    pub translated: Option<Vec<LyricsLine>>,
    pub romanization: Option<Vec<LyricsLine>>,
}

/// A secondary line farther than this from the primary line's start has no
/// counterpart.
pub const ALIGN_TOLERANCE_MS: u64 = 500;

/// Format an absolute millisecond offset as `mm:ss.mmm`.
pub fn format_timestamp(ms: u64) -> String {
    let total_seconds = ms / 1000;
    format!(
        "{:02}:{:02}.{:03}",
        total_seconds / 60,
        total_seconds % 60,
        ms % 1000
    )
}

/// Find the secondary line belonging to `primary`: an identical start
/// timestamp wins, otherwise the nearest start within the tolerance.
/// `None` is normal — many lines simply have no translation.
pub fn align<'a>(primary: &LyricsLine, secondary: &'a [LyricsLine]) -> Option<&'a LyricsLine> {
    if let Some(exact) = secondary.iter().find(|l| l.start_ms == primary.start_ms) {
        return Some(exact);
    }
    secondary
        .iter()
        .map(|l| (l.start_ms.abs_diff(primary.start_ms), l))
        .filter(|(diff, _)| *diff < ALIGN_TOLERANCE_MS)
        .min_by_key(|(diff, _)| *diff)
        .map(|(_, l)| l)
}

/// Render a document as timed text.
///
/// Word-synced mode tags every word and closes the final word with its end
/// timestamp; line-synced mode wraps the whole line in start and end tags.
/// Matched romanization (when enabled) and translation lines follow each
/// primary line, tagged with their own start timestamps.
pub fn render(doc: &LyricsDocument, mode: DisplayMode, romanization: bool) -> String {
    let mut out = String::new();

    for line in &doc.original {
        match mode {
            DisplayMode::LineByLine => {
                let _ = write!(out, "[{}]{}", format_timestamp(line.start_ms), line.text());
                if let Some(last) = line.words.last() {
                    let _ = write!(out, "[{}]", format_timestamp(last.end_ms));
                }
            }
            DisplayMode::WordByWord => {
                for (i, word) in line.words.iter().enumerate() {
                    let _ = write!(out, "[{}]{}", format_timestamp(word.start_ms), word.text);
                    if i + 1 == line.words.len() {
                        let _ = write!(out, "[{}]", format_timestamp(word.end_ms));
                    }
                }
            }
        }
        out.push('\n');

        if romanization
            && let Some(roma) = &doc.romanization
            && let Some(matched) = align(line, roma)
        {
            push_secondary(&mut out, matched);
        }
        if let Some(translated) = &doc.translated
            && let Some(matched) = align(line, translated)
        {
            push_secondary(&mut out, matched);
        }
    }

    out.trim_end().to_string()
}

fn push_secondary(out: &mut String, line: &LyricsLine) {
    let text = line
        .words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let _ = writeln!(out, "[{}]{}", format_timestamp(line.start_ms), text);
}

/// Parse an LRC-style timestamp (`mm:ss`, `mm:ss.xx`, `mm:ss.xxx` or the
/// colon variant) into milliseconds.
pub(crate) fn parse_timestamp(s: &str) -> Option<u64> {
    let parts: Vec<&str> = s.split([':', '.']).collect();
    match parts.len() {
        2 => {
            let min: u64 = parts[0].parse().ok()?;
            let sec: u64 = parts[1].parse().ok()?;
            Some(min * 60 * 1000 + sec * 1000)
        }
        3 => {
            let min: u64 = parts[0].parse().ok()?;
            let sec: u64 = parts[1].parse().ok()?;
            let frac = parts[2];
            // Two digits are centiseconds, three are milliseconds.
            let ms: u64 = match frac.len() {
                1 => frac.parse::<u64>().ok()? * 100,
                2 => frac.parse::<u64>().ok()? * 10,
                3 => frac.parse().ok()?,
                _ => return None,
            };
            Some(min * 60 * 1000 + sec * 1000 + ms)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(start: u64, end: u64, words: &[(u64, u64, &str)]) -> LyricsLine {
        LyricsLine {
            start_ms: start,
            end_ms: end,
            words: words
                .iter()
                .map(|&(s, e, t)| LyricsWord {
                    start_ms: s,
                    end_ms: e,
                    text: t.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn timestamp_formats_with_milliseconds() {
        assert_eq!(format_timestamp(0), "00:00.000");
        assert_eq!(format_timestamp(1000), "00:01.000");
        assert_eq!(format_timestamp(90_345), "01:30.345");
    }

    #[test]
    fn parse_timestamp_variants() {
        assert_eq!(parse_timestamp("00:12"), Some(12_000));
        assert_eq!(parse_timestamp("00:12.34"), Some(12_340));
        assert_eq!(parse_timestamp("00:12.340"), Some(12_340));
        assert_eq!(parse_timestamp("01:30.5"), Some(90_500));
        assert_eq!(parse_timestamp("bogus"), None);
    }

    #[test]
    fn align_prefers_exact_start() {
        let primary = line(1000, 2000, &[]);
        let secondary = vec![line(900, 1500, &[]), line(1000, 1800, &[])];
        assert_eq!(align(&primary, &secondary).unwrap().start_ms, 1000);
    }

    #[test]
    fn align_tolerance_boundary() {
        let primary = line(1000, 2000, &[]);

        let near = vec![line(1400, 2400, &[])];
        assert!(align(&primary, &near).is_some());

        let far = vec![line(1600, 2600, &[])];
        assert!(align(&primary, &far).is_none());
    }

    #[test]
    fn align_picks_nearest_within_tolerance() {
        let primary = line(1000, 2000, &[]);
        let secondary = vec![line(1400, 2400, &[]), line(1100, 2100, &[])];
        assert_eq!(align(&primary, &secondary).unwrap().start_ms, 1100);
    }

    #[test]
    fn render_word_synced_closes_last_word() {
        let doc = LyricsDocument {
            original: vec![line(0, 1200, &[(0, 500, "Hello"), (500, 1200, " world")])],
            ..Default::default()
        };
        let out = render(&doc, DisplayMode::WordByWord, false);
        assert_eq!(out, "[00:00.000]Hello[00:00.500] world[00:01.200]");
    }

    #[test]
    fn render_line_synced_wraps_line() {
        let doc = LyricsDocument {
            original: vec![line(0, 1200, &[(0, 500, "Hello"), (500, 1200, " world")])],
            ..Default::default()
        };
        let out = render(&doc, DisplayMode::LineByLine, false);
        assert_eq!(out, "[00:00.000]Hello world[00:01.200]");
    }

    #[test]
    fn render_appends_matched_translation() {
        let doc = LyricsDocument {
            original: vec![line(1000, 2000, &[(1000, 2000, "hello")])],
            translated: Some(vec![line(1000, 2000, &[(1000, 2000, "你好")])]),
            ..Default::default()
        };
        let out = render(&doc, DisplayMode::LineByLine, false);
        assert_eq!(out, "[00:01.000]hello[00:02.000]\n[00:01.000]你好");
    }

    #[test]
    fn render_skips_romanization_unless_enabled() {
        let doc = LyricsDocument {
            original: vec![line(0, 1000, &[(0, 1000, "歌")])],
            romanization: Some(vec![line(0, 1000, &[(0, 1000, "uta")])]),
            ..Default::default()
        };
        assert!(!render(&doc, DisplayMode::LineByLine, false).contains("uta"));
        assert!(render(&doc, DisplayMode::LineByLine, true).contains("uta"));
    }
}
