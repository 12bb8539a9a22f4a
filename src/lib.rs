//! Synchronized-lyrics retrieval and fuzzy track matching.
//!
//! The crate talks to two unofficial music-platform backends, decodes
//! their proprietary lyric encodings (KRC, QRC) and matches weakly-labeled
//! local files to the right remote track:
//!
//! - [`crypto`] — the digest, XOR and DES/3DES primitives the wire formats
//!   need, plus best-effort DEFLATE decompression.
//! - [`source`] — the backend clients behind a uniform
//!   `search`/`get_lyrics` surface. Failures degrade to empty results.
//! - [`lyrics`] — the canonical line/word model, translation and
//!   romanization alignment, and timed-text rendering.
//! - [`matcher`] — query building, similarity scoring with confidence
//!   thresholds, and the sequential cancellable batch runner.
//!
//! UI, media scanning, tag writing and settings persistence live in the
//! embedding application; this crate only consumes and produces plain data
//! ([`matcher::LocalTrackDescriptor`] in, rendered lyric text out).
//!
//! ```no_run
//! use lyrebird::config::Settings;
//! use lyrebird::matcher::{self, LocalTrackDescriptor};
//! use lyrebird::source;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = Settings::default();
//! let sources = source::from_kinds(&settings.source_order)?;
//!
//! let track = LocalTrackDescriptor {
//!     file_name: "Queen - Bohemian Rhapsody.flac".to_string(),
//!     duration_ms: 354_000,
//!     ..Default::default()
//! };
//!
//! if let Some((candidate, text)) =
//!     matcher::match_and_fetch_lyrics(&track, &sources, &settings).await
//! {
//!     println!("{} - {}\n{text}", candidate.artist, candidate.title);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod lyrics;
pub mod matcher;
pub mod source;

pub use config::{DisplayMode, MatchThresholds, Settings};
pub use lyrics::{LyricsDocument, LyricsLine, LyricsWord};
pub use matcher::{BatchOutcome, LocalTrackDescriptor, MatchOutcome, ScoredCandidate};
pub use source::{SourceClient, SourceKind, TrackCandidate};
