//! Fuzzy matching of weakly-labeled local files to remote candidates.
//!
//! Builds up to three search queries from tags or the file name, scores
//! every candidate on title/artist/duration/album similarity, early-exits
//! past a confidence ceiling and refuses anything under the floor rather
//! than corrupting local metadata with a bad guess.

use crate::config::Settings;
use crate::lyrics;
use crate::source::{SourceClient, TrackCandidate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const WEIGHT_TITLE: f64 = 0.40;
const WEIGHT_ARTIST: f64 = 0.25;
const WEIGHT_DURATION: f64 = 0.20;
const WEIGHT_ALBUM: f64 = 0.15;

/// Similarity assumed when the target field is unknown.
const NEUTRAL_SIMILARITY: f64 = 0.5;
const CONTAINMENT_BONUS: f64 = 0.15;
const TOKEN_OVERLAP_BONUS: f64 = 0.10;

const MAX_QUERIES: usize = 3;

/// Field separators commonly found in `Artist - Title` file names.
const FILE_NAME_SEPARATORS: [&str; 5] = [" - ", " – ", "－", "_-_", " _ "];

static BRACKETS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[()（）\[\]【】《》<>「」『』"']"#).unwrap());
static FEAT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:feat|ft|featuring)\b\.?").unwrap());
static DASH_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*-\s*").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static COUNTER_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[(\[]\d+[)\]]$").unwrap());

/// A local file as handed over by the embedding application's scanner.
/// Tag values containing the "unknown" placeholder count as absent.
#[derive(Debug, Clone, Default)]
pub struct LocalTrackDescriptor {
    pub path: PathBuf,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: u64,
    pub file_name: String,
}

impl LocalTrackDescriptor {
    pub fn tagged_title(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !is_placeholder(t))
    }

    pub fn tagged_artist(&self) -> Option<&str> {
        self.artist.as_deref().filter(|a| !is_placeholder(a))
    }

    pub fn tagged_album(&self) -> Option<&str> {
        self.album.as_deref().filter(|a| !is_placeholder(a))
    }

    fn file_stem(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.file_name)
    }
}

fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.to_lowercase().contains("unknown") || trimmed.contains("未知")
}

/// A candidate with its match score in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: TrackCandidate,
    pub score: f64,
}

/// Result of one matching pass over a single local file.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched(ScoredCandidate),
    /// A best candidate existed but stayed under the acceptance floor.
    LowConfidence(ScoredCandidate),
    /// Every query against every source came back empty.
    NoCandidate,
}

/// Lowercase, strip brackets/quotes and feat-markers, collapse whitespace.
/// Idempotent.
pub fn normalize_string(s: &str) -> String {
    let lowered = s.to_lowercase();
    let stripped = BRACKETS.replace_all(&lowered, "");
    let stripped = FEAT_MARKER.replace_all(&stripped, "");
    let dashed = DASH_RUN.replace_all(&stripped, " ");
    WHITESPACE.replace_all(&dashed, " ").trim().to_string()
}

/// Similarity in `[0, 1]`: normalized edit distance plus a containment
/// bonus and a token-overlap bonus, capped at 1. Equal strings are always
/// 1, an empty side against a non-empty one is always 0.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let na = normalize_string(a);
    let nb = normalize_string(b);
    if na == nb {
        return 1.0;
    }
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }

    let edit = strsim::normalized_levenshtein(&na, &nb).max(0.0);
    let containment = if na.contains(&nb) || nb.contains(&na) {
        CONTAINMENT_BONUS
    } else {
        0.0
    };
    let overlap = token_overlap(&na, &nb) * TOKEN_OVERLAP_BONUS;
    (edit + containment + overlap).min(1.0)
}

/// Jaccard overlap of the whitespace token sets.
fn token_overlap(a: &str, b: &str) -> f64 {
    let tokens_a: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: std::collections::HashSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

/// Split a file name into `(title, artist)`. The extension and a trailing
/// `(n)`/`[n]` duplicate counter are stripped first; by convention the
/// shorter side of the separator is the artist.
pub fn parse_file_name(file_name: &str) -> (Option<String>, Option<String>) {
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    let cleaned = COUNTER_SUFFIX.replace(stem.trim(), "").trim().to_string();

    for separator in FILE_NAME_SEPARATORS {
        if let Some((first, second)) = cleaned.split_once(separator) {
            let first = first.trim();
            let second = second.trim();
            if first.is_empty() || second.is_empty() {
                continue;
            }
            return if first.len() <= second.len() {
                (Some(second.to_string()), Some(first.to_string()))
            } else {
                (Some(first.to_string()), Some(second.to_string()))
            };
        }
    }

    if cleaned.is_empty() {
        (None, None)
    } else {
        (Some(cleaned), None)
    }
}

/// Up to three distinct queries, most specific first.
pub fn build_queries(track: &LocalTrackDescriptor) -> Vec<String> {
    let mut queries = Vec::new();

    if let (Some(title), Some(artist)) = (track.tagged_title(), track.tagged_artist()) {
        queries.push(format!("{title} {artist}"));
    } else {
        let (parsed_title, parsed_artist) = parse_file_name(&track.file_name);
        if let Some(title) = parsed_title {
            if let Some(artist) = &parsed_artist {
                queries.push(format!("{title} {artist}"));
            }
            queries.push(title);
        }
    }

    queries.dedup();
    queries.truncate(MAX_QUERIES);
    queries
}

/// The query title/artist actually used for scoring: tags when usable,
/// file-name parse otherwise.
fn score_targets(track: &LocalTrackDescriptor) -> (Option<String>, Option<String>) {
    let (parsed_title, parsed_artist) = parse_file_name(&track.file_name);
    let title = track.tagged_title().map(str::to_string).or(parsed_title);
    let artist = track.tagged_artist().map(str::to_string).or(parsed_artist);
    (title, artist)
}

/// Weighted candidate score. Title dominates; unknown target artist or
/// album contributes a neutral mid-value instead of punishing the
/// candidate for the local file's missing tags.
pub fn match_score(
    candidate: &TrackCandidate,
    track: &LocalTrackDescriptor,
    query_title: Option<&str>,
    query_artist: Option<&str>,
) -> f64 {
    let target_title = query_title
        .map(str::to_string)
        .or_else(|| track.tagged_title().map(str::to_string))
        .unwrap_or_else(|| track.file_stem().to_string());
    let title = string_similarity(&target_title, &candidate.title);

    let artist = match query_artist.or_else(|| track.tagged_artist()) {
        Some(target) => string_similarity(target, &candidate.artist),
        None => NEUTRAL_SIMILARITY,
    };

    let duration = duration_closeness(candidate.duration_ms.abs_diff(track.duration_ms));

    let album = match track.tagged_album() {
        Some(target) => string_similarity(target, &candidate.album),
        None => NEUTRAL_SIMILARITY,
    };

    WEIGHT_TITLE * title + WEIGHT_ARTIST * artist + WEIGHT_DURATION * duration + WEIGHT_ALBUM * album
}

/// Full credit within a second, degrading in tiers to zero past 30 s.
fn duration_closeness(diff_ms: u64) -> f64 {
    match diff_ms {
        0..=1_000 => 1.0,
        1_001..=2_000 => 0.9,
        2_001..=5_000 => 0.6,
        5_001..=10_000 => 0.35,
        10_001..=30_000 => 0.1,
        _ => 0.0,
    }
}

fn select_best(
    scored: Vec<ScoredCandidate>,
    thresholds: &crate::config::MatchThresholds,
) -> MatchOutcome {
    let best = scored
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score));
    match best {
        None => MatchOutcome::NoCandidate,
        Some(best) if best.score < thresholds.floor => MatchOutcome::LowConfidence(best),
        Some(best) => MatchOutcome::Matched(best),
    }
}

/// Match one local file against the sources, in the caller's priority
/// order. Queries and sources are tried in order until a candidate clears
/// the early-exit ceiling; otherwise the global best decides.
pub async fn match_track(
    track: &LocalTrackDescriptor,
    sources: &[SourceClient],
    settings: &Settings,
) -> MatchOutcome {
    let queries = build_queries(track);
    let (query_title, query_artist) = score_targets(track);

    let mut scored: Vec<ScoredCandidate> = Vec::new();
    'queries: for query in &queries {
        for client in sources {
            let results = client
                .search(query, 1, &settings.separator, settings.page_size)
                .await;
            for candidate in results {
                let score = match_score(
                    &candidate,
                    track,
                    query_title.as_deref(),
                    query_artist.as_deref(),
                );
                scored.push(ScoredCandidate { candidate, score });
            }
            if scored.iter().any(|s| s.score > settings.thresholds.ceiling) {
                debug!(query, "early exit on high-confidence candidate");
                break 'queries;
            }
        }
    }

    select_best(scored, &settings.thresholds)
}

/// Match a file and fetch its lyrics in one go. `None` when no candidate
/// clears the floor or the matched track has no retrievable lyrics.
pub async fn match_and_fetch_lyrics(
    track: &LocalTrackDescriptor,
    sources: &[SourceClient],
    settings: &Settings,
) -> Option<(TrackCandidate, String)> {
    let scored = match match_track(track, sources, settings).await {
        MatchOutcome::Matched(scored) => scored,
        MatchOutcome::LowConfidence(scored) => {
            debug!(
                file = %track.file_name,
                score = scored.score,
                "best candidate under acceptance floor"
            );
            return None;
        }
        MatchOutcome::NoCandidate => return None,
    };

    let client = sources
        .iter()
        .find(|s| s.kind() == scored.candidate.source)?;
    let doc = client.get_lyrics(&scored.candidate).await?;
    let text = lyrics::render(&doc, settings.display_mode, settings.romanization);
    if text.is_empty() {
        return None;
    }
    Some((scored.candidate, text))
}

/// Progress of a running batch, reported before each item is processed.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress<'a> {
    /// 1-based position of the current item.
    pub index: usize,
    pub total: usize,
    pub file_name: &'a str,
}

/// Cumulative result of a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Sequentially match a selection of files, with a fixed delay between
/// items to respect source rate limits. Matched lyrics are handed to the
/// caller's persistence sink; whatever was persisted before a cancellation
/// stays persisted. Parallelizing this would defeat the pacing, so it is
/// deliberately one item at a time.
pub async fn batch_match<P, S>(
    tracks: &[LocalTrackDescriptor],
    sources: &[SourceClient],
    settings: &Settings,
    cancel: &CancellationToken,
    mut on_progress: P,
    mut persist: S,
) -> BatchOutcome
where
    P: FnMut(BatchProgress<'_>),
    S: FnMut(&LocalTrackDescriptor, &TrackCandidate, &str) -> anyhow::Result<()>,
{
    let mut outcome = BatchOutcome::default();
    let total = tracks.len();

    for (i, track) in tracks.iter().enumerate() {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        on_progress(BatchProgress {
            index: i + 1,
            total,
            file_name: &track.file_name,
        });

        let matched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                outcome.cancelled = true;
                break;
            }
            matched = match_and_fetch_lyrics(track, sources, settings) => matched,
        };

        match matched {
            Some((candidate, text)) => match persist(track, &candidate, &text) {
                Ok(()) => outcome.succeeded += 1,
                Err(err) => {
                    warn!(error = %err, file = %track.file_name, "persistence sink failed");
                    outcome.failed += 1;
                }
            },
            None => outcome.failed += 1,
        }

        if i + 1 < total {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                _ = tokio::time::sleep(settings.batch_delay()) => {}
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchThresholds;
    use crate::source::SourceKind;

    fn candidate(title: &str, artist: &str, duration_ms: u64) -> TrackCandidate {
        TrackCandidate {
            id: "1".to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            album: String::new(),
            duration_ms,
            source: SourceKind::Kugou,
            release_date: String::new(),
            track_number: String::new(),
            cover_url: String::new(),
            extras: Default::default(),
        }
    }

    fn descriptor(title: Option<&str>, artist: Option<&str>, file_name: &str) -> LocalTrackDescriptor {
        LocalTrackDescriptor {
            path: PathBuf::from(format!("/music/{file_name}")),
            title: title.map(str::to_string),
            artist: artist.map(str::to_string),
            album: None,
            duration_ms: 200_000,
            file_name: file_name.to_string(),
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in [
            "Song Title (feat. Somebody)",
            "  A  -  B  ",
            "《歌名》 ft. X",
            "plain",
        ] {
            let once = normalize_string(s);
            assert_eq!(normalize_string(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn normalize_strips_markers() {
        assert_eq!(normalize_string("Title (feat. Guest)"), "title guest");
        assert_eq!(normalize_string("A - B"), "a b");
    }

    #[test]
    fn similarity_identity_and_empty() {
        assert_eq!(string_similarity("Some Song", "Some Song"), 1.0);
        assert_eq!(string_similarity("Some Song", ""), 0.0);
        assert_eq!(string_similarity("", "Some Song"), 0.0);
        assert_eq!(string_similarity("", ""), 1.0);
    }

    #[test]
    fn similarity_rewards_containment() {
        let contained = string_similarity("Song Title", "Song Title Live Version");
        let unrelated = string_similarity("Song Title", "Completely Different");
        assert!(contained > unrelated);
        assert!(contained <= 1.0);
    }

    #[test]
    fn file_name_shorter_side_is_artist() {
        let (title, artist) = parse_file_name("Artist - Song Title.mp3");
        assert_eq!(title.as_deref(), Some("Song Title"));
        assert_eq!(artist.as_deref(), Some("Artist"));
    }

    #[test]
    fn file_name_counter_suffix_stripped() {
        let (title, artist) = parse_file_name("Artist - Song (1).mp3");
        assert_eq!(title.as_deref(), Some("Artist"));
        assert_eq!(artist.as_deref(), Some("Song"));

        let (title, _) = parse_file_name("Song [2].flac");
        assert_eq!(title.as_deref(), Some("Song"));
    }

    #[test]
    fn file_name_without_separator_is_title_only() {
        let (title, artist) = parse_file_name("Bohemian Rhapsody.flac");
        assert_eq!(title.as_deref(), Some("Bohemian Rhapsody"));
        assert_eq!(artist, None);
    }

    #[test]
    fn queries_prefer_tags_over_file_name() {
        let track = descriptor(Some("Title"), Some("Artist"), "whatever.mp3");
        assert_eq!(build_queries(&track), vec!["Title Artist".to_string()]);
    }

    #[test]
    fn queries_fall_back_to_file_name() {
        let track = descriptor(None, None, "Artist - Song Title.mp3");
        assert_eq!(
            build_queries(&track),
            vec!["Song Title Artist".to_string(), "Song Title".to_string()]
        );
    }

    #[test]
    fn placeholder_tags_count_as_absent() {
        let track = descriptor(Some("Unknown Title"), Some("未知艺术家"), "Artist - Song.mp3");
        assert!(track.tagged_title().is_none());
        assert!(track.tagged_artist().is_none());
        assert!(!build_queries(&track).is_empty());
    }

    #[test]
    fn score_monotone_in_duration_difference() {
        let track = descriptor(Some("Song"), Some("Artist"), "x.mp3");
        let mut last = f64::INFINITY;
        for diff in [0u64, 500, 1_500, 3_000, 8_000, 20_000, 60_000] {
            let score = match_score(
                &candidate("Song", "Artist", track.duration_ms + diff),
                &track,
                Some("Song"),
                Some("Artist"),
            );
            assert!(
                score <= last,
                "score increased at diff {diff}: {score} > {last}"
            );
            last = score;
        }
    }

    #[test]
    fn perfect_candidate_scores_high() {
        let track = descriptor(Some("Song"), Some("Artist"), "x.mp3");
        let score = match_score(
            &candidate("Song", "Artist", track.duration_ms),
            &track,
            Some("Song"),
            Some("Artist"),
        );
        assert!(score > 0.9, "got {score}");
    }

    #[test]
    fn empty_candidate_set_is_no_candidate() {
        let outcome = select_best(Vec::new(), &MatchThresholds::default());
        assert!(matches!(outcome, MatchOutcome::NoCandidate));
    }

    #[test]
    fn best_below_floor_is_rejected() {
        let thresholds = MatchThresholds {
            floor: 0.30,
            ceiling: 0.75,
        };
        let scored = vec![
            ScoredCandidate {
                candidate: candidate("a", "b", 0),
                score: 0.28,
            },
            ScoredCandidate {
                candidate: candidate("c", "d", 0),
                score: 0.11,
            },
        ];
        match select_best(scored, &thresholds) {
            MatchOutcome::LowConfidence(best) => assert!((best.score - 0.28).abs() < 1e-9),
            other => panic!("expected LowConfidence, got {other:?}"),
        }
    }

    #[test]
    fn best_above_floor_is_accepted() {
        let scored = vec![ScoredCandidate {
            candidate: candidate("a", "b", 0),
            score: 0.5,
        }];
        assert!(matches!(
            select_best(scored, &MatchThresholds::default()),
            MatchOutcome::Matched(_)
        ));
    }

    #[tokio::test]
    async fn batch_with_no_sources_counts_failures() {
        let tracks = vec![
            descriptor(None, None, "Artist - One.mp3"),
            descriptor(None, None, "Artist - Two.mp3"),
        ];
        let settings = Settings {
            batch_delay_ms: 0,
            ..Settings::default()
        };
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();

        let outcome = batch_match(
            &tracks,
            &[],
            &settings,
            &cancel,
            |progress| seen.push((progress.index, progress.total)),
            |_, _, _| Ok(()),
        )
        .await;

        assert_eq!(outcome, BatchOutcome {
            succeeded: 0,
            failed: 2,
            cancelled: false,
        });
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn cancelled_batch_stops_early() {
        let tracks = vec![
            descriptor(None, None, "Artist - One.mp3"),
            descriptor(None, None, "Artist - Two.mp3"),
        ];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = batch_match(
            &tracks,
            &[],
            &Settings::default(),
            &cancel,
            |_| {},
            |_, _, _| Ok(()),
        )
        .await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.succeeded + outcome.failed, 0);
    }
}
