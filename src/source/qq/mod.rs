//! Backend B: QQ-Music-style unified JSON API.
//!
//! Everything goes through one endpoint as `{ comm, req_0: { method,
//! module, param } }` envelopes. Search responses are navigated with JSON
//! pointers (the shape drifts too much for typed models); lyric payloads
//! are hex-encoded 3DES ciphertext over a zlib stream, with a plain base64
//! LRC fallback signalled by the response's `qrc` flag.

use crate::crypto::{self, TripleDes, Wrap};
use crate::error::SourceError;
use crate::lyrics::{self, LyricsDocument};
use crate::source::models::{SourceKind, TrackCandidate};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const ENDPOINT: &str = "https://u.y.qq.com/cgi-bin/musicu.fcg";
const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const SEARCH_MODULE: &str = "music.search.SearchCgiService";
const SEARCH_METHOD: &str = "DoSearchForQQMusicDesktop";
const LYRIC_MODULE: &str = "music.musichallSong.PlayLyricInfo";
const LYRIC_METHOD: &str = "GetPlayLyricInfo";

/// Fixed key the backend uses for every QRC payload.
const QRC_KEY: &[u8; 24] = b"!@#)(*$%123ZXC!@!@#)(NHL";

/// The decrypt schedule never changes, so build it once.
static QRC_CIPHER: Lazy<TripleDes> = Lazy::new(|| TripleDes::decrypt_key(QRC_KEY));

#[derive(Debug)]
struct Inner {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Clone)]
pub struct QqMusicClient {
    inner: Arc<Inner>,
}

impl QqMusicClient {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_endpoint(ENDPOINT.to_string())
    }

    fn with_endpoint(endpoint: String) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
        headers.insert(REFERER, HeaderValue::from_static("https://y.qq.com/"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("build reqwest client")?;

        Ok(Self {
            inner: Arc::new(Inner { http, endpoint }),
        })
    }

    /// Send one `req_0` envelope and return its `data` object.
    async fn request(&self, module: &str, method: &str, param: Value) -> Result<Value, SourceError> {
        let body = json!({
            "comm": { "ct": "19", "cv": "1873" },
            "req_0": { "method": method, "module": module, "param": param },
        });

        let value: Value = self
            .inner
            .http
            .post(&self.inner.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let code = value.get("code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            return Err(SourceError::Protocol(code));
        }
        let module_code = value
            .pointer("/req_0/code")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        if module_code != 0 {
            return Err(SourceError::Protocol(module_code));
        }
        Ok(value.pointer("/req_0/data").cloned().unwrap_or(Value::Null))
    }

    pub async fn search(
        &self,
        keyword: &str,
        page: u32,
        separator: &str,
        page_size: u32,
    ) -> Vec<TrackCandidate> {
        match self.try_search(keyword, page, separator, page_size).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, keyword, "qq search failed");
                Vec::new()
            }
        }
    }

    async fn try_search(
        &self,
        keyword: &str,
        page: u32,
        separator: &str,
        page_size: u32,
    ) -> Result<Vec<TrackCandidate>, SourceError> {
        let param = json!({
            "query": keyword,
            "page_num": page,
            "num_per_page": page_size,
            "search_type": 0,
        });
        let data = self.request(SEARCH_MODULE, SEARCH_METHOD, param).await?;

        let list = data
            .pointer("/body/song/list")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(list
            .iter()
            .filter_map(|item| candidate_from_item(item, separator))
            .collect())
    }

    pub async fn get_lyrics(&self, candidate: &TrackCandidate) -> Option<LyricsDocument> {
        match self.try_get_lyrics(candidate).await {
            Ok(doc) => doc,
            Err(err) => {
                warn!(error = %err, title = %candidate.title, "qq lyric fetch failed");
                None
            }
        }
    }

    async fn try_get_lyrics(
        &self,
        candidate: &TrackCandidate,
    ) -> Result<Option<LyricsDocument>, SourceError> {
        let song_id: i64 = candidate.id.parse().unwrap_or_default();
        let param = json!({
            "albumName": BASE64.encode(&candidate.album),
            "crypt": 1,
            "ct": 19,
            "cv": 1873,
            "interval": candidate.duration_ms / 1000,
            "lrc_t": 0,
            "qrc": 1,
            "qrc_t": 0,
            "roma": 1,
            "roma_t": 0,
            "singerName": BASE64.encode(&candidate.artist),
            "songID": song_id,
            "songName": BASE64.encode(&candidate.title),
            "trans": 1,
            "trans_t": 0,
            "type": 0,
        });
        let data = self.request(LYRIC_MODULE, LYRIC_METHOD, param).await?;

        let lyric = data.get("lyric").and_then(Value::as_str).unwrap_or("");
        if lyric.is_empty() {
            debug!(title = %candidate.title, "no lyric payload");
            return Ok(None);
        }
        let trans = data.get("trans").and_then(Value::as_str).unwrap_or("");
        let roma = data.get("roma").and_then(Value::as_str).unwrap_or("");

        // `qrc == 0` marks an unencrypted base64 LRC payload.
        if data.get("qrc").and_then(Value::as_i64).unwrap_or(1) == 0 {
            let text = String::from_utf8(BASE64.decode(lyric)?)?;
            let trans_text = decode_optional(trans, |s| {
                Ok(String::from_utf8(BASE64.decode(s)?)?)
            });
            return Ok(lyrics::qrc::parse_plain(&text, trans_text.as_deref()));
        }

        let text = decrypt_qrc(lyric)?;
        let trans_text = decode_optional(trans, decrypt_qrc);
        let roma_text = decode_optional(roma, decrypt_qrc);
        Ok(lyrics::qrc::parse(
            &text,
            trans_text.as_deref(),
            roma_text.as_deref(),
        ))
    }
}

/// Secondary tracks are optional; a broken one must not take the primary
/// track down with it.
fn decode_optional(
    payload: &str,
    decode: impl Fn(&str) -> Result<String, SourceError>,
) -> Option<String> {
    if payload.is_empty() {
        return None;
    }
    match decode(payload) {
        Ok(text) => Some(text),
        Err(err) => {
            debug!(error = %err, "skipping undecodable secondary track");
            None
        }
    }
}

/// Hex ciphertext -> 3DES (fixed key) -> zlib inflate.
fn decrypt_qrc(payload: &str) -> Result<String, SourceError> {
    let cleaned: String = payload.chars().filter(char::is_ascii_hexdigit).collect();
    if cleaned.is_empty() {
        return Err(SourceError::Decode("empty hex payload".to_string()));
    }
    let bytes = hex::decode(&cleaned)?;
    let plain = QRC_CIPHER.apply(&bytes)?;
    Ok(crypto::inflate(&plain, Wrap::Zlib)?)
}

fn candidate_from_item(item: &Value, separator: &str) -> Option<TrackCandidate> {
    let title = item
        .get("name")
        .or_else(|| item.get("title"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())?;

    let id = match item.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };

    let artist = item
        .get("singer")
        .and_then(Value::as_array)
        .map(|singers| {
            singers
                .iter()
                .filter_map(|s| s.get("name").and_then(Value::as_str))
                .filter(|name| !name.is_empty())
                .collect::<Vec<_>>()
                .join(separator)
        })
        .unwrap_or_default();

    let album = item
        .pointer("/album/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let cover_url = item
        .pointer("/album/mid")
        .or_else(|| item.pointer("/album/pmid"))
        .and_then(Value::as_str)
        .filter(|mid| !mid.is_empty())
        .map(|mid| format!("https://y.qq.com/music/photo_new/T002R500x500M000{mid}.jpg"))
        .unwrap_or_default();

    let duration_ms = item.get("interval").and_then(Value::as_u64).unwrap_or(0) * 1000;
    let release_date = item
        .get("time_public")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let track_number = item
        .get("index_album")
        .and_then(Value::as_u64)
        .map(|n| n.to_string())
        .unwrap_or_default();

    let mut extras = HashMap::new();
    if let Some(mid) = item.get("mid").and_then(Value::as_str) {
        extras.insert("mid".to_string(), mid.to_string());
    }

    Some(TrackCandidate {
        id,
        title: title.to_string(),
        artist,
        album,
        duration_ms,
        source: SourceKind::QqMusic,
        release_date,
        track_number,
        cover_url,
        extras,
    })
}
