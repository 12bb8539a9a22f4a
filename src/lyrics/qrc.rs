//! Parser for decrypted QRC lyric payloads.
//!
//! The primary track arrives as XML whose `LyricContent` attribute holds
//! `[start,duration]word(start,dur)...` lines with absolute word
//! timestamps. The translation track is plain line-synced LRC, the
//! romanization track a second QRC document.

use super::{LyricsDocument, LyricsLine, LyricsWord, parse_timestamp};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static CONTENT_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"LyricContent="([^"]*)""#).unwrap());
static LINE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[(\d+),(\d+)\]").unwrap());
static WORD_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^()]*)\((\d+),(\d+)\)").unwrap());
static META_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([A-Za-z#]+):(.*)\]$").unwrap());
static LRC_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[(\d{1,3}:\d{2}(?:[.:]\d{1,3})?)\]").unwrap());

/// Assemble a document from the decrypted primary payload plus optional
/// translation (LRC) and romanization (QRC) payloads.
pub fn parse(lyric: &str, trans: Option<&str>, roma: Option<&str>) -> Option<LyricsDocument> {
    let content = extract_content(lyric)?;
    let (tags, original) = parse_timed(&content);
    if original.is_empty() {
        return None;
    }

    let translated = trans.map(parse_lrc_lines).filter(|lines| !lines.is_empty());
    let romanization = roma
        .and_then(extract_content)
        .map(|content| parse_timed(&content).1)
        .filter(|lines| !lines.is_empty());

    Some(LyricsDocument {
        tags,
        original,
        translated,
        romanization,
    })
}

/// Build a document from a plain line-synced LRC body (the backend's
/// unencrypted fallback format).
pub fn parse_plain(lyric: &str, trans: Option<&str>) -> Option<LyricsDocument> {
    let mut tags = HashMap::new();
    for raw in lyric.lines() {
        let line = raw.trim();
        if LRC_TAG.is_match(line) {
            continue;
        }
        if let Some(caps) = META_TAG.captures(line) {
            tags.insert(caps[1].to_string(), caps[2].trim().to_string());
        }
    }

    let original = parse_lrc_lines(lyric);
    if original.is_empty() {
        return None;
    }
    let translated = trans.map(parse_lrc_lines).filter(|lines| !lines.is_empty());

    Some(LyricsDocument {
        tags,
        original,
        translated,
        romanization: None,
    })
}

/// Pull the lyric body out of the QRC XML wrapper. Payloads that are not
/// XML are already bare bodies and pass through unchanged.
fn extract_content(payload: &str) -> Option<String> {
    if payload.contains("LyricContent=") {
        return CONTENT_ATTR
            .captures(payload)
            .map(|caps| unescape_xml(&caps[1]));
    }
    if payload.contains("<QrcInfos") {
        return None;
    }
    Some(payload.to_string())
}

fn unescape_xml(text: &str) -> String {
    text.replace("&#10;", "\n")
        .replace("&#13;", "\r")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn parse_timed(text: &str) -> (HashMap<String, String>, Vec<LyricsLine>) {
    let mut tags = HashMap::new();
    let mut lines = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = LINE_TAG.captures(line) {
            let (Ok(start), Ok(duration)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>())
            else {
                continue;
            };
            lines.push(parse_body_line(start, duration, &line[caps[0].len()..]));
            continue;
        }

        if let Some(caps) = META_TAG.captures(line) {
            tags.insert(caps[1].to_string(), caps[2].trim().to_string());
        }
    }

    lines.sort_by_key(|l| l.start_ms);
    (tags, lines)
}

fn parse_body_line(start: u64, duration: u64, body: &str) -> LyricsLine {
    let mut words: Vec<LyricsWord> = WORD_TAG
        .captures_iter(body)
        .filter_map(|caps| {
            let word_start: u64 = caps[2].parse().ok()?;
            let word_duration: u64 = caps[3].parse().ok()?;
            Some(LyricsWord {
                start_ms: word_start,
                end_ms: word_start + word_duration,
                text: caps[1].to_string(),
            })
        })
        .collect();

    if words.is_empty() && !body.is_empty() {
        words.push(LyricsWord {
            start_ms: start,
            end_ms: start + duration,
            text: body.to_string(),
        });
    }
    words.sort_by_key(|w| w.start_ms);

    LyricsLine {
        start_ms: start,
        end_ms: start + duration,
        words,
    }
}

/// Parse line-synced LRC into canonical lines; each line becomes a single
/// word, and line ends are taken from the following line's start.
fn parse_lrc_lines(text: &str) -> Vec<LyricsLine> {
    let mut lines: Vec<LyricsLine> = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        let Some(caps) = LRC_TAG.captures(line) else {
            continue;
        };
        let Some(start) = parse_timestamp(&caps[1]) else {
            continue;
        };
        let body = line[caps[0].len()..].trim().to_string();
        if body.is_empty() {
            continue;
        }
        lines.push(LyricsLine {
            start_ms: start,
            end_ms: start,
            words: vec![LyricsWord {
                start_ms: start,
                end_ms: start,
                text: body,
            }],
        });
    }

    lines.sort_by_key(|l| l.start_ms);
    for i in 0..lines.len().saturating_sub(1) {
        let next_start = lines[i + 1].start_ms;
        let line = &mut lines[i];
        line.end_ms = next_start.max(line.start_ms);
        if let Some(word) = line.words.last_mut() {
            word.end_ms = line.end_ms;
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const QRC_XML: &str = concat!(
        r#"<?xml version="1.0" encoding="utf-8"?><QrcInfos>"#,
        r#"<QrcHeadInfo SaveTime="0" Version="100"/>"#,
        r#"<LyricInfo LyricCount="1">"#,
        r#"<Lyric_1 LyricType="1" LyricContent="[ti:Song]&#10;[1000,2000]Hel(1000,500)lo(1500,1500)"/>"#,
        r#"</LyricInfo></QrcInfos>"#,
    );

    #[test]
    fn parses_xml_wrapped_payload() {
        let doc = parse(QRC_XML, None, None).unwrap();
        assert_eq!(doc.tags.get("ti").map(String::as_str), Some("Song"));

        let line = &doc.original[0];
        assert_eq!((line.start_ms, line.end_ms), (1000, 3000));
        assert_eq!(line.words.len(), 2);
        assert_eq!((line.words[0].start_ms, line.words[0].end_ms), (1000, 1500));
        assert_eq!((line.words[1].start_ms, line.words[1].end_ms), (1500, 3000));
        assert_eq!(line.text(), "Hello");
    }

    #[test]
    fn attaches_lrc_translation() {
        let doc = parse(QRC_XML, Some("[00:01.00]你好\n"), None).unwrap();
        let translated = doc.translated.unwrap();
        assert_eq!(translated.len(), 1);
        assert_eq!(translated[0].start_ms, 1000);
        assert_eq!(translated[0].words[0].text, "你好");
    }

    #[test]
    fn bare_body_passes_without_xml() {
        let doc = parse("[0,1000]hi(0,1000)", None, None).unwrap();
        assert_eq!(doc.original[0].words[0].text, "hi");
    }

    #[test]
    fn xml_without_content_is_none() {
        assert!(parse("<QrcInfos></QrcInfos>", None, None).is_none());
    }

    #[test]
    fn plain_lrc_document() {
        let text = "[ti:Song]\n[00:01.000]hello\n[00:03.000]world";
        let doc = parse_plain(text, None).unwrap();
        assert_eq!(doc.tags.get("ti").map(String::as_str), Some("Song"));
        assert_eq!(doc.original.len(), 2);
        assert_eq!(doc.original[0].start_ms, 1000);
        // Line end borrowed from the next line's start.
        assert_eq!(doc.original[0].end_ms, 3000);
        assert_eq!(doc.original[1].end_ms, doc.original[1].start_ms);
    }

    #[test]
    fn lrc_lines_sorted_by_start() {
        let lines = parse_lrc_lines("[00:05.000]later\n[00:01.000]sooner");
        assert_eq!(lines[0].words[0].text, "sooner");
        assert_eq!(lines[0].end_ms, 5000);
    }
}
