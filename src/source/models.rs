use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Which backend produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Kugou,
    QqMusic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Kugou => "kugou",
            SourceKind::QqMusic => "qq_music",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remote track returned by a search. Produced only by a source client;
/// the artist field is already joined with the caller's separator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackCandidate {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: u64,
    pub source: SourceKind,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub track_number: String,
    #[serde(default)]
    pub cover_url: String,
    /// Source-specific opaque values the lyric lookup needs later
    /// (e.g. the Kugou file hash or the QQ song mid).
    #[serde(default)]
    pub extras: HashMap<String, String>,
}
