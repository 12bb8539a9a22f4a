//! Backend source clients.
//!
//! Each backend exposes the same two capabilities: keyword search producing
//! [`TrackCandidate`] records and lyric retrieval for one candidate.
//! Failures never escape a client; they are logged and collapsed into an
//! empty result, so the caller's only recovery is trying another source.

pub mod kugou;
pub mod models;
pub mod qq;

pub use models::{SourceKind, TrackCandidate};

use crate::lyrics::LyricsDocument;
use serde::{Deserialize, Deserializer};

/// Uniform handle over the configured backends.
#[derive(Debug, Clone)]
pub enum SourceClient {
    Kugou(kugou::KugouClient),
    QqMusic(qq::QqMusicClient),
}

impl SourceClient {
    pub fn new(kind: SourceKind) -> anyhow::Result<Self> {
        Ok(match kind {
            SourceKind::Kugou => SourceClient::Kugou(kugou::KugouClient::new()?),
            SourceKind::QqMusic => SourceClient::QqMusic(qq::QqMusicClient::new()?),
        })
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceClient::Kugou(_) => SourceKind::Kugou,
            SourceClient::QqMusic(_) => SourceKind::QqMusic,
        }
    }

    /// Search the backend. Errors degrade to an empty list.
    pub async fn search(
        &self,
        keyword: &str,
        page: u32,
        separator: &str,
        page_size: u32,
    ) -> Vec<TrackCandidate> {
        match self {
            SourceClient::Kugou(client) => client.search(keyword, page, separator, page_size).await,
            SourceClient::QqMusic(client) => {
                client.search(keyword, page, separator, page_size).await
            }
        }
    }

    /// Fetch and decode lyrics for a candidate this crate produced earlier.
    /// Errors degrade to `None`.
    pub async fn get_lyrics(&self, candidate: &TrackCandidate) -> Option<LyricsDocument> {
        match self {
            SourceClient::Kugou(client) => client.get_lyrics(candidate).await,
            SourceClient::QqMusic(client) => client.get_lyrics(candidate).await,
        }
    }
}

/// Build one client per configured source, in the caller's priority order.
pub fn from_kinds(order: &[SourceKind]) -> anyhow::Result<Vec<SourceClient>> {
    order.iter().map(|&kind| SourceClient::new(kind)).collect()
}

/// Milliseconds since the Unix epoch, for request timestamps and device ids.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Accept a JSON string or number as a string; the backends are not
/// consistent about which one they send for ids.
pub(crate) fn flex_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}
