//! Caller-supplied settings.
//!
//! The crate never reads or writes these from disk; persistence belongs to
//! the embedding application. The structs derive serde so a settings layer
//! can store them however it likes.

use crate::source::SourceKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How rendered lyrics are timestamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// `[mm:ss.mmm]word` per word, final word closed with an end tag.
    WordByWord,
    /// `[start]whole line[end]`.
    LineByLine,
}

/// Acceptance floor and early-exit ceiling for match scores.
///
/// Near-duplicate implementations of this matcher disagreed on the exact
/// values (0.3 vs 0.35, 0.7 vs 0.75), so they are configuration rather than
/// constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
    /// Best candidate below this is reported as no match.
    pub floor: f64,
    /// Any candidate above this stops further queries and sources.
    pub ceiling: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            floor: 0.35,
            ceiling: 0.75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Enabled sources, highest priority first.
    pub source_order: Vec<SourceKind>,
    /// Results requested per search query.
    pub page_size: u32,
    /// Separator used when joining multiple artists.
    pub separator: String,
    pub display_mode: DisplayMode,
    /// Include the romanization track in rendered output when present.
    pub romanization: bool,
    pub thresholds: MatchThresholds,
    /// Pause between batch items, to respect source rate limits.
    pub batch_delay_ms: u64,
}

impl Settings {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_order: vec![SourceKind::Kugou, SourceKind::QqMusic],
            page_size: 10,
            separator: "/".to_string(),
            display_mode: DisplayMode::WordByWord,
            romanization: false,
            thresholds: MatchThresholds::default(),
            batch_delay_ms: 600,
        }
    }
}
