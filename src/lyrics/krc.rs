//! Parser for decrypted KRC lyric text.
//!
//! KRC is word-synced: every body line carries a `[start,duration]` header
//! and `<offset,duration,0>word` groups whose offsets are relative to the
//! line start. An optional `[language:...]` tag holds base64 JSON with a
//! line-by-line translation track (type 1) and a per-syllable romanization
//! track (type 0), both aligned to the primary lines by index.

use super::{LyricsDocument, LyricsLine, LyricsWord};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

static LINE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[(\d+),(\d+)\]").unwrap());
static WORD_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(\d+),(\d+),(-?\d+)>([^<]*)").unwrap());
static META_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([A-Za-z#]+):(.*)\]$").unwrap());

const TRACK_ROMANIZATION: u8 = 0;
const TRACK_TRANSLATION: u8 = 1;

#[derive(Debug, Deserialize)]
struct LanguageRoot {
    #[serde(default)]
    content: Vec<LanguageTrack>,
}

#[derive(Debug, Deserialize)]
struct LanguageTrack {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(rename = "lyricContent", default)]
    lyric_content: Vec<Vec<String>>,
}

/// Parse decrypted KRC text into the canonical model. Returns `None` when
/// the text contains no timed lines.
pub fn parse(text: &str) -> Option<LyricsDocument> {
    let mut tags = HashMap::new();
    let mut original = Vec::new();
    let mut language: Option<String> = None;

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
            let body = &line[caps[0].len()..];
            original.push(parse_body_line(start, duration, body));
            continue;
        }

        if let Some(caps) = META_TAG.captures(line) {
            let key = caps[1].to_string();
            let value = caps[2].trim().to_string();
            if key.eq_ignore_ascii_case("language") {
                language = Some(value);
            } else {
                tags.insert(key, value);
            }
        }
    }

    if original.is_empty() {
        return None;
    }
    original.sort_by_key(|l| l.start_ms);

    let mut doc = LyricsDocument {
        tags,
        original,
        translated: None,
        romanization: None,
    };
    if let Some(encoded) = language {
        apply_language_tracks(&mut doc, &encoded);
    }
    Some(doc)
}

fn parse_body_line(start: u64, duration: u64, body: &str) -> LyricsLine {
    let mut words: Vec<LyricsWord> = WORD_TAG
        .captures_iter(body)
        .filter_map(|caps| {
            let offset: u64 = caps[1].parse().ok()?;
            let word_duration: u64 = caps[2].parse().ok()?;
            Some(LyricsWord {
                start_ms: start + offset,
                end_ms: start + offset + word_duration,
                text: caps[4].to_string(),
            })
        })
        .collect();

    // Plain lines without word tags still become one full-line word.
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

/// Decode the `[language:]` payload and attach the translation and
/// romanization tracks it carries. A malformed payload is ignored: the
/// primary track is still usable without it.
fn apply_language_tracks(doc: &mut LyricsDocument, encoded: &str) {
    let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let root: LanguageRoot = match BASE64
        .decode(cleaned.as_bytes())
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    {
        Some(root) => root,
        None => {
            debug!("unusable language tag, skipping secondary tracks");
            return;
        }
    };

    for track in root.content {
        match track.kind {
            TRACK_TRANSLATION => {
                doc.translated = Some(lines_by_index(&doc.original, &track.lyric_content));
            }
            TRACK_ROMANIZATION => {
                doc.romanization = Some(syllables_by_index(&doc.original, &track.lyric_content));
            }
            _ => {}
        }
    }
}

/// Translation: entry `i` is the full text for primary line `i` and takes
/// that line's timing.
fn lines_by_index(original: &[LyricsLine], content: &[Vec<String>]) -> Vec<LyricsLine> {
    original
        .iter()
        .zip(content.iter())
        .filter(|(_, entry)| !entry.is_empty())
        .map(|(line, entry)| {
            let text = entry.concat();
            LyricsLine {
                start_ms: line.start_ms,
                end_ms: line.end_ms,
                words: vec![LyricsWord {
                    start_ms: line.start_ms,
                    end_ms: line.end_ms,
                    text,
                }],
            }
        })
        .collect()
}

/// Romanization: entry `i` holds one syllable per primary word of line `i`;
/// each syllable borrows the matching word's timing.
fn syllables_by_index(original: &[LyricsLine], content: &[Vec<String>]) -> Vec<LyricsLine> {
    original
        .iter()
        .zip(content.iter())
        .map(|(line, syllables)| LyricsLine {
            start_ms: line.start_ms,
            end_ms: line.end_ms,
            words: line
                .words
                .iter()
                .zip(syllables.iter())
                .map(|(word, syllable)| LyricsWord {
                    start_ms: word.start_ms,
                    end_ms: word.end_ms,
                    text: syllable.clone(),
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_words_with_absolute_times() {
        let text = "[ar:Somebody]\n[ti:Something]\n[1000,2000]<0,500,0>Hel<500,1500,0>lo";
        let doc = parse(text).unwrap();

        assert_eq!(doc.tags.get("ar").map(String::as_str), Some("Somebody"));
        assert_eq!(doc.original.len(), 1);

        let line = &doc.original[0];
        assert_eq!((line.start_ms, line.end_ms), (1000, 3000));
        assert_eq!(line.words.len(), 2);
        assert_eq!((line.words[0].start_ms, line.words[0].end_ms), (1000, 1500));
        assert_eq!((line.words[1].start_ms, line.words[1].end_ms), (1500, 3000));
        assert_eq!(line.text(), "Hello");
    }

    #[test]
    fn no_timed_lines_is_none() {
        assert!(parse("[ar:Somebody]\njust text").is_none());
    }

    #[test]
    fn language_tag_yields_translation_and_romanization() {
        let language = json!({
            "content": [
                { "type": 1, "lyricContent": [["你好"]] },
                { "type": 0, "lyricContent": [["ni", "hao"]] },
            ]
        });
        let encoded = BASE64.encode(serde_json::to_vec(&language).unwrap());
        let text = format!("[language:{encoded}]\n[0,1000]<0,400,0>ni<400,600,0>hao");

        let doc = parse(&text).unwrap();

        let translated = doc.translated.unwrap();
        assert_eq!(translated.len(), 1);
        assert_eq!(translated[0].start_ms, 0);
        assert_eq!(translated[0].words[0].text, "你好");

        let roma = doc.romanization.unwrap();
        assert_eq!(roma[0].words.len(), 2);
        assert_eq!(roma[0].words[0].text, "ni");
        assert_eq!(roma[0].words[1].start_ms, 400);
    }

    #[test]
    fn garbage_language_tag_keeps_primary_track() {
        let text = "[language:!!not base64!!]\n[0,1000]<0,1000,0>hi";
        let doc = parse(text).unwrap();
        assert!(doc.translated.is_none());
        assert_eq!(doc.original.len(), 1);
    }

    #[test]
    fn line_without_word_tags_becomes_single_word() {
        let doc = parse("[500,1500]plain words").unwrap();
        let line = &doc.original[0];
        assert_eq!(line.words.len(), 1);
        assert_eq!((line.words[0].start_ms, line.words[0].end_ms), (500, 2000));
    }
}
