//! Backend A: Kugou-style signed-parameter API.
//!
//! Every request carries templated device headers and an MD5 signature over
//! the canonical parameter map. Lyric retrieval is a two-step flow (lyric
//! search for an access key, then download) and the payload is either plain
//! base64 or the KRC pipeline (base64 -> XOR unwrap -> zlib inflate).

use crate::crypto::{self, Wrap};
use crate::error::SourceError;
use crate::lyrics::{self, LyricsDocument};
use crate::source::models::{SourceKind, TrackCandidate};
use crate::source::{flex_string, now_millis};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const APP_ID: &str = "3116";
const CLIENT_VER: &str = "11070";
const SIGNATURE_SALT: &str = "LnT6xpN3khm36zse0QzvmgTZ3waWdRSA";
/// App id of the device-registration endpoint; it both appears as a
/// parameter and brackets the value-only bootstrap signature.
const REGISTER_APP_ID: &str = "1014";
/// Session token used after a failed registration; requests still go out
/// and fail on the server side instead of crashing here.
const DFID_UNAVAILABLE: &str = "-";
/// Plain (already-readable) lyric payload marker.
const CONTENT_TYPE_PLAIN: i64 = 2;

/// Ephemeral per-process device identity: a fabricated `mid` and the
/// lazily-registered `dfid` session token. Never persisted.
#[derive(Debug)]
pub struct DeviceIdentity {
    mid: String,
    dfid: OnceCell<String>,
}

impl DeviceIdentity {
    fn new() -> Self {
        Self {
            mid: crypto::md5_hex(now_millis().to_string()),
            dfid: OnceCell::new(),
        }
    }
}

#[derive(Debug)]
struct Endpoints {
    register: String,
    search: String,
    lyric_search: String,
    lyric_download: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            register: "https://userservice.kugou.com/risk/v1/r_register_dev".to_string(),
            search: "http://complexsearch.kugou.com/v2/search/song".to_string(),
            lyric_search: "https://lyrics.kugou.com/v1/search".to_string(),
            lyric_download: "http://lyrics.kugou.com/download".to_string(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    http: reqwest::Client,
    device: DeviceIdentity,
    endpoints: Endpoints,
}

#[derive(Debug, Clone)]
pub struct KugouClient {
    inner: Arc<Inner>,
}

/// Which request family is being signed; they use different parameter
/// bases and user-agent templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Module {
    Search,
    Lyric,
}

impl Module {
    fn ua_tag(self) -> &'static str {
        match self {
            Module::Search => "SearchSong",
            Module::Lyric => "Lyric",
        }
    }
}

impl KugouClient {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_endpoints(Endpoints::default())
    }

    fn with_endpoints(endpoints: Endpoints) -> anyhow::Result<Self> {
        use anyhow::Context;

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("build reqwest client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                device: DeviceIdentity::new(),
                endpoints,
            }),
        })
    }

    fn request(&self, method: reqwest::Method, url: &str, module: Module) -> reqwest::RequestBuilder {
        self.inner
            .http
            .request(method, url)
            .header(
                "User-Agent",
                format!("Android14-1070-11070-201-0-{}-wifi", module.ua_tag()),
            )
            .header("KG-Rec", "1")
            .header("KG-RC", "1")
            .header("KG-CLIENTTIMEMS", now_millis().to_string())
            .header("mid", self.inner.device.mid.as_str())
    }

    /// The device session token. The first caller registers; concurrent
    /// callers wait on that flight and share its result. A failed
    /// registration caches the unavailable sentinel for the client's
    /// lifetime.
    async fn dfid(&self) -> &str {
        self.inner
            .device
            .dfid
            .get_or_init(|| self.register_device())
            .await
    }

    async fn register_device(&self) -> String {
        match self.try_register().await {
            Ok(dfid) => {
                debug!(%dfid, "device registered");
                dfid
            }
            Err(err) => {
                warn!(error = %err, "device registration failed, continuing unauthenticated");
                DFID_UNAVAILABLE.to_string()
            }
        }
    }

    async fn try_register(&self) -> Result<String, SourceError> {
        let mut params = BTreeMap::new();
        params.insert("appid".to_string(), REGISTER_APP_ID.to_string());
        params.insert("platid".to_string(), "4".to_string());
        params.insert("mid".to_string(), self.inner.device.mid.clone());
        let signature = bootstrap_signature(params.values());
        params.insert("signature".to_string(), signature);

        let body = BASE64.encode(br#"{"uuid":""}"#);
        let response: KgResponse<RegisterData> = self
            .request(reqwest::Method::POST, &self.inner.endpoints.register, Module::Lyric)
            .query(&params)
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.error_code != 0 {
            return Err(SourceError::Protocol(response.error_code));
        }
        response
            .data
            .map(|d| d.dfid)
            .filter(|dfid| !dfid.is_empty())
            .ok_or(SourceError::Protocol(-1))
    }

    /// Canonical parameter map plus its signature:
    /// md5(salt + sorted "key=value" concatenation + body + salt).
    fn signed_params(
        &self,
        custom: &[(&str, String)],
        body: &str,
        module: Module,
        dfid: &str,
    ) -> Vec<(String, String)> {
        let mut params: BTreeMap<String, String> = BTreeMap::new();
        match module {
            Module::Lyric => {
                params.insert("appid".to_string(), APP_ID.to_string());
                params.insert("clientver".to_string(), CLIENT_VER.to_string());
            }
            Module::Search => {
                params.insert("userid".to_string(), "0".to_string());
                params.insert("appid".to_string(), APP_ID.to_string());
                params.insert("token".to_string(), String::new());
                params.insert("clienttime".to_string(), (now_millis() / 1000).to_string());
                params.insert("iscorrection".to_string(), "1".to_string());
                params.insert("uuid".to_string(), "-".to_string());
                params.insert("mid".to_string(), self.inner.device.mid.clone());
                params.insert("dfid".to_string(), dfid.to_string());
                params.insert("clientver".to_string(), CLIENT_VER.to_string());
                params.insert("platform".to_string(), "AndroidFilter".to_string());
            }
        }
        for (key, value) in custom {
            params.insert((*key).to_string(), value.clone());
        }

        let signature = request_signature(&params, body);
        let mut out: Vec<(String, String)> = params.into_iter().collect();
        out.push(("signature".to_string(), signature));
        out
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
                warn!(error = %err, keyword, "kugou search failed");
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
        let dfid = self.dfid().await.to_string();
        let custom = [
            ("keyword", keyword.to_string()),
            ("page", page.to_string()),
            ("pagesize", page_size.to_string()),
        ];
        let params = self.signed_params(&custom, "", Module::Search, &dfid);

        let response: KgResponse<KgSearchData> = self
            .request(reqwest::Method::GET, &self.inner.endpoints.search, Module::Search)
            .header("x-router", "complexsearch.kugou.com")
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.error_code != 0 {
            return Err(SourceError::Protocol(response.error_code));
        }
        let lists = response.data.map(|d| d.lists).unwrap_or_default();
        Ok(lists
            .into_iter()
            .map(|item| candidate_from_song(item, separator))
            .collect())
    }

    pub async fn get_lyrics(&self, candidate: &TrackCandidate) -> Option<LyricsDocument> {
        match self.try_get_lyrics(candidate).await {
            Ok(doc) => doc,
            Err(err) => {
                warn!(error = %err, title = %candidate.title, "kugou lyric fetch failed");
                None
            }
        }
    }

    async fn try_get_lyrics(
        &self,
        candidate: &TrackCandidate,
    ) -> Result<Option<LyricsDocument>, SourceError> {
        let Some(hash) = candidate.extras.get("hash") else {
            return Ok(None);
        };

        let custom = [
            ("album_audio_id", candidate.id.clone()),
            ("duration", candidate.duration_ms.to_string()),
            ("hash", hash.clone()),
            (
                "keyword",
                format!("{} - {}", candidate.artist, candidate.title),
            ),
            ("lrctxt", "1".to_string()),
            ("man", "no".to_string()),
        ];
        let params = self.signed_params(&custom, "", Module::Lyric, DFID_UNAVAILABLE);

        let search: KgLyricSearchResponse = self
            .request(
                reqwest::Method::GET,
                &self.inner.endpoints.lyric_search,
                Module::Lyric,
            )
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if search.error_code != 0 {
            return Err(SourceError::Protocol(search.error_code));
        }
        let Some(lyric) = search.candidates.into_iter().next() else {
            debug!(title = %candidate.title, "no lyric candidates");
            return Ok(None);
        };

        let custom = [
            ("accesskey", lyric.accesskey),
            ("charset", "utf8".to_string()),
            ("client", "mobi".to_string()),
            ("fmt", "krc".to_string()),
            ("id", lyric.id),
            ("ver", "1".to_string()),
        ];
        let params = self.signed_params(&custom, "", Module::Lyric, DFID_UNAVAILABLE);

        let content: KgLyricContent = self
            .request(
                reqwest::Method::GET,
                &self.inner.endpoints.lyric_download,
                Module::Lyric,
            )
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = if content.contenttype == CONTENT_TYPE_PLAIN {
            String::from_utf8(decode_base64(&content.content)?)?
        } else {
            decode_krc(&content.content)?
        };
        Ok(lyrics::krc::parse(&text))
    }
}

/// Bootstrap signature: the register app id brackets the sorted parameter
/// VALUES — no keys, unlike every other request.
fn bootstrap_signature<'a>(values: impl Iterator<Item = &'a String>) -> String {
    let mut values: Vec<&str> = values
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .collect();
    values.sort_unstable();
    crypto::md5_hex(format!(
        "{REGISTER_APP_ID}{}{REGISTER_APP_ID}",
        values.concat()
    ))
}

fn request_signature(params: &BTreeMap<String, String>, body: &str) -> String {
    let joined: String = params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    crypto::md5_hex(format!("{SIGNATURE_SALT}{joined}{body}{SIGNATURE_SALT}"))
}

/// Base64 transported through JSON can pick up stray whitespace; strip it
/// before decoding.
fn decode_base64(content: &str) -> Result<Vec<u8>, SourceError> {
    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(BASE64.decode(cleaned.as_bytes())?)
}

/// KRC payload: base64 -> strip magic + XOR -> zlib inflate.
fn decode_krc(content: &str) -> Result<String, SourceError> {
    let raw = decode_base64(content)?;
    let unwrapped = crypto::xor_unwrap(&raw)?;
    Ok(crypto::inflate(&unwrapped, Wrap::Zlib)?)
}

fn candidate_from_song(item: KgSongItem, separator: &str) -> TrackCandidate {
    let artist = item
        .singers
        .iter()
        .map(|s| s.name.as_str())
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join(separator);
    let cover_url = if item.image.is_empty() {
        String::new()
    } else {
        item.image.replace("{size}", "480")
    };

    let mut extras = HashMap::new();
    extras.insert("hash".to_string(), item.file_hash);

    TrackCandidate {
        id: item.id,
        title: item.song_name,
        artist,
        album: item.album_name,
        duration_ms: item.duration * 1000,
        source: SourceKind::Kugou,
        release_date: item.publish_date,
        track_number: String::new(),
        cover_url,
        extras,
    }
}

#[derive(Debug, Deserialize)]
struct KgResponse<T> {
    #[serde(default)]
    #[allow(dead_code)]
    status: i64,
    #[serde(default)]
    error_code: i64,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RegisterData {
    #[serde(default)]
    dfid: String,
}

#[derive(Debug, Deserialize)]
struct KgSearchData {
    #[serde(default)]
    lists: Vec<KgSongItem>,
}

#[derive(Debug, Deserialize)]
struct KgSongItem {
    #[serde(rename = "ID", deserialize_with = "flex_string", default)]
    id: String,
    #[serde(rename = "FileHash", default)]
    file_hash: String,
    #[serde(rename = "SongName", default)]
    song_name: String,
    #[serde(rename = "Singers", default)]
    singers: Vec<KgSinger>,
    #[serde(rename = "AlbumName", default)]
    album_name: String,
    #[serde(rename = "Duration", default)]
    duration: u64,
    #[serde(rename = "PublishDate", default)]
    publish_date: String,
    #[serde(rename = "Image", default)]
    image: String,
}

#[derive(Debug, Deserialize)]
struct KgSinger {
    #[serde(default)]
    name: String,
}

/// The lyric-search response is flat, without the usual `data` wrapper.
#[derive(Debug, Deserialize)]
struct KgLyricSearchResponse {
    #[serde(default)]
    #[allow(dead_code)]
    status: i64,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    candidates: Vec<KgLyricCandidate>,
}

#[derive(Debug, Deserialize)]
struct KgLyricCandidate {
    #[serde(deserialize_with = "flex_string", default)]
    id: String,
    #[serde(default)]
    accesskey: String,
}

#[derive(Debug, Deserialize)]
struct KgLyricContent {
    #[serde(default)]
    content: String,
    #[serde(default)]
    contenttype: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_signature_uses_sorted_key_value_pairs() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "2".to_string());
        params.insert("a".to_string(), "1".to_string());

        let expected = crypto::md5_hex(format!("{SIGNATURE_SALT}a=1b=2{SIGNATURE_SALT}"));
        assert_eq!(request_signature(&params, ""), expected);

        let with_body = crypto::md5_hex(format!("{SIGNATURE_SALT}a=1b=2BODY{SIGNATURE_SALT}"));
        assert_eq!(request_signature(&params, "BODY"), with_body);
    }

    #[test]
    fn bootstrap_signature_uses_sorted_values_only() {
        let values = ["zz".to_string(), "".to_string(), "aa".to_string()];
        let expected = crypto::md5_hex("1014aazz1014");
        assert_eq!(bootstrap_signature(values.iter()), expected);
    }

    #[test]
    fn signed_params_end_with_signature() {
        let client = KugouClient::new().unwrap();
        let params = client.signed_params(
            &[("keyword", "hello".to_string())],
            "",
            Module::Lyric,
            DFID_UNAVAILABLE,
        );
        let (last_key, last_value) = params.last().unwrap();
        assert_eq!(last_key, "signature");
        assert_eq!(last_value.len(), 32);
        assert!(params.iter().any(|(k, v)| k == "keyword" && v == "hello"));
        assert!(params.iter().any(|(k, v)| k == "appid" && v == APP_ID));
    }

    #[test]
    fn maps_search_items_to_candidates() {
        let json = serde_json::json!({
            "status": 1,
            "error_code": 0,
            "data": {
                "lists": [{
                    "ID": 123456,
                    "FileHash": "ABCDEF",
                    "SongName": "Song Title",
                    "Singers": [{ "name": "First" }, { "name": "Second" }],
                    "AlbumName": "Album",
                    "Duration": 215,
                    "PublishDate": "2020-01-01",
                    "Image": "http://imge.kugou.com/stdmusic/{size}/cover.jpg"
                }]
            }
        });
        let response: KgResponse<KgSearchData> = serde_json::from_value(json).unwrap();
        let item = response.data.unwrap().lists.into_iter().next().unwrap();
        let candidate = candidate_from_song(item, "/");

        assert_eq!(candidate.id, "123456");
        assert_eq!(candidate.artist, "First/Second");
        assert_eq!(candidate.duration_ms, 215_000);
        assert_eq!(candidate.source, SourceKind::Kugou);
        assert_eq!(candidate.extras.get("hash").map(String::as_str), Some("ABCDEF"));
        assert!(candidate.cover_url.contains("/480/"));
    }

    #[test]
    fn plain_content_type_decodes_base64_text() {
        let text = "[00:01.000]hello";
        let encoded = BASE64.encode(text);
        let decoded = String::from_utf8(decode_base64(&encoded).unwrap()).unwrap();
        assert_eq!(decoded, text);
    }

    #[tokio::test]
    async fn registration_failure_degrades_to_sentinel() {
        // Unroutable endpoint: the connection is refused immediately, and
        // the client must degrade instead of raising.
        let client = KugouClient::with_endpoints(Endpoints {
            register: "http://127.0.0.1:9/r_register_dev".to_string(),
            ..Endpoints::default()
        })
        .unwrap();

        let (first, second) = tokio::join!(client.dfid(), client.dfid());
        assert_eq!(first, DFID_UNAVAILABLE);
        assert_eq!(second, DFID_UNAVAILABLE);
    }
}
