//! "Now playing" from a streaming server status endpoint.
//!
//! ## Payload shapes
//!
//! Upstreams disagree on layout, so a payload is matched against an ordered
//! list of shapes, first hit wins:
//!
//!   1. Icecast      `{"icestats": {"source": {..} | [..]}}`
//!   2. Source list  `{"sources": [..]}` or `{"mounts": [..]}`
//!   3. Nested       `{"now": {..}, "history": [..]}`
//!   4. Flat         `{"track": .., "artist": .., "title": ..}`
//!
//! Multi-source shapes pick the configured mount, or the first source.
//!
//! ## Liveness
//!
//! Only a payload fetched during this build is `live`. Anything served from
//! cache, stale cache or the mock file still shows the track but carries no
//! history and disables auto-refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, Provenance, Resolved};
use crate::config::Config;
use crate::dates;
use crate::error::FetchError;
use crate::http;
use crate::source::{resolve_source, DataSource};

pub const CACHE_KEY: &str = "now_playing";
pub const MOCK_FILE: &str = "now_playing_mock.json";
const HISTORY_LIMIT: usize = 30;
/// Titles some servers report while nothing is on air.
const SILENCE_SENTINELS: &[&str] = &["silence", "silencio"];
/// Checked in this order; the first separator present wins.
const TITLE_SEPARATORS: &[&str] = &[" - ", " \u{2013} ", " \u{2014} "];

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowItem {
    pub track: String,
    pub artist: Option<String>,
    pub stream_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub track: String,
    pub artist: String,
    pub url: String,
    pub played_at: DateTime<Utc>,
}

impl HistoryItem {
    pub fn played_label(&self) -> String {
        dates::label(&self.played_at)
    }
}

/// What a payload says about the current track.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackState {
    Playable(NowItem),
    /// A title is present but it is a silence placeholder.
    Silent,
    /// No usable title at all.
    Missing,
}

impl TrackState {
    pub fn playable(self) -> Option<NowItem> {
        match self {
            Self::Playable(item) => Some(item),
            Self::Silent | Self::Missing => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingState {
    pub available: bool,
    pub live: bool,
    /// Whether the page may poll for updates. Follows `live`.
    pub auto_refresh: bool,
    pub track: Option<String>,
    pub artist: Option<String>,
    pub stream_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub history: Vec<HistoryItem>,
    /// Why nothing is playable, when `available` is false.
    pub reason: Option<String>,
}

impl NowPlayingState {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            live: false,
            auto_refresh: false,
            track: None,
            artist: None,
            stream_url: None,
            started_at: None,
            history: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    fn playing(item: NowItem, history: Vec<HistoryItem>) -> Self {
        Self {
            available: true,
            live: false,
            auto_refresh: false,
            track: Some(item.track),
            artist: item.artist,
            stream_url: item.stream_url,
            started_at: item.started_at,
            history,
            reason: None,
        }
    }

    pub fn started_label(&self) -> Option<String> {
        self.started_at.as_ref().map(dates::label)
    }
}

// ── Text helpers ──────────────────────────────────────────────────────────────

pub fn is_silence(title: &str) -> bool {
    let t = title.trim();
    SILENCE_SENTINELS.iter().any(|s| t.eq_ignore_ascii_case(s))
}

/// Split "Artist - Track" on the first separator found, in priority order.
/// Returns `(artist, track)`.
pub fn split_title(title: &str) -> Option<(String, String)> {
    let title = title.trim();
    TITLE_SEPARATORS.iter().find_map(|sep| {
        let (artist, track) = title.split_once(*sep)?;
        let (artist, track) = (artist.trim(), track.trim());
        if artist.is_empty() || track.is_empty() {
            return None;
        }
        Some((artist.to_string(), track.to_string()))
    })
}

/// Mount path with scheme and host stripped, a leading slash and no
/// trailing slash: `http://host:8000/live/` → `/live`.
pub fn normalize_mount(raw: &str) -> String {
    let raw = raw.trim();
    let path = match raw.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or(""),
        None => raw,
    };
    let path = path.split(['?', '#']).next().unwrap_or("");
    format!("/{}", path.trim_matches('/'))
}

fn text<'a>(obj: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|f| obj.get(*f).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

// ── Shape matching ────────────────────────────────────────────────────────────

#[derive(Debug)]
enum PayloadShape<'a> {
    Icecast(Vec<&'a Value>),
    Sources(Vec<&'a Value>),
    Nested(&'a Value),
    Flat(&'a Value),
}

type ShapeMatcher = for<'a> fn(&'a Value) -> Option<PayloadShape<'a>>;

const SHAPES: &[ShapeMatcher] = &[match_icecast, match_sources, match_nested, match_flat];

fn as_list(value: &Value) -> Option<Vec<&Value>> {
    match value {
        Value::Array(items) => Some(items.iter().filter(|v| v.is_object()).collect()),
        Value::Object(_) => Some(vec![value]),
        _ => None,
    }
}

fn match_icecast(payload: &Value) -> Option<PayloadShape<'_>> {
    let sources = as_list(payload.get("icestats")?.get("source")?)?;
    Some(PayloadShape::Icecast(sources))
}

fn match_sources(payload: &Value) -> Option<PayloadShape<'_>> {
    ["sources", "mounts"]
        .iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_array))
        .map(|items| PayloadShape::Sources(items.iter().filter(|v| v.is_object()).collect()))
}

fn match_nested(payload: &Value) -> Option<PayloadShape<'_>> {
    payload
        .get("now")
        .filter(|v| v.is_object())
        .map(PayloadShape::Nested)
}

fn match_flat(payload: &Value) -> Option<PayloadShape<'_>> {
    payload.is_object().then_some(PayloadShape::Flat(payload))
}

fn detect_shape(payload: &Value) -> Option<PayloadShape<'_>> {
    SHAPES.iter().find_map(|matcher| matcher(payload))
}

fn source_mount(source: &Value) -> Option<String> {
    text(source, &["mount", "listenurl", "stream_url", "url"]).map(normalize_mount)
}

/// The source whose mount matches `mount`, else the first one.
fn select_source<'a>(sources: &[&'a Value], mount: &str) -> Option<&'a Value> {
    if !mount.trim().is_empty() {
        let wanted = normalize_mount(mount);
        if let Some(hit) = sources
            .iter()
            .find(|s| source_mount(s).as_deref() == Some(wanted.as_str()))
        {
            return Some(*hit);
        }
        debug!(mount = %wanted, "configured mount not found, using first source");
    }
    sources.first().copied()
}

/// Read the current track out of one object (a source, `now`, or the root).
fn read_item(obj: &Value) -> TrackState {
    // a source entry may itself wrap its metadata in `now`
    let obj = obj.get("now").filter(|v| v.is_object()).unwrap_or(obj);

    let mut track = text(obj, &["track", "song"]).map(str::to_string);
    let mut artist = text(obj, &["artist"]).map(str::to_string);
    if track.is_none() || artist.is_none() {
        if let Some(title) = text(obj, &["title"]) {
            match split_title(title) {
                Some((a, t)) => {
                    artist = artist.or(Some(a));
                    track = track.or(Some(t));
                }
                None => track = track.or_else(|| Some(title.to_string())),
            }
        }
    }

    let Some(track) = track else {
        return TrackState::Missing;
    };
    if is_silence(&track) {
        return TrackState::Silent;
    }

    TrackState::Playable(NowItem {
        track,
        artist,
        stream_url: text(obj, &["stream_url", "listenurl", "url"]).map(str::to_string),
        started_at: ["started_at", "stream_start_iso8601", "stream_start"]
            .iter()
            .find_map(|f| obj.get(*f).and_then(dates::parse_timestamp)),
    })
}

fn read_history(payload: &Value) -> Vec<HistoryItem> {
    let Some(rows) = ["history", "recent"]
        .iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_array))
    else {
        return Vec::new();
    };

    let now = Utc::now();
    rows.iter()
        .filter(|row| row.is_object())
        .take(HISTORY_LIMIT)
        .map(|row| {
            let (artist, track) = match (text(row, &["artist"]), text(row, &["track"])) {
                (Some(a), Some(t)) => (a.to_string(), t.to_string()),
                (artist, track) => {
                    let split = text(row, &["title"]).and_then(split_title);
                    (
                        artist
                            .map(str::to_string)
                            .or_else(|| split.as_ref().map(|s| s.0.clone()))
                            .unwrap_or_else(|| "Unknown".to_string()),
                        track
                            .or_else(|| text(row, &["title"]).filter(|_| split.is_none()))
                            .map(str::to_string)
                            .or_else(|| split.as_ref().map(|s| s.1.clone()))
                            .unwrap_or_else(|| "Unknown".to_string()),
                    )
                }
            };
            HistoryItem {
                track,
                artist,
                url: text(row, &["url"]).unwrap_or_default().to_string(),
                played_at: row
                    .get("played_at")
                    .and_then(dates::parse_timestamp)
                    .unwrap_or(now),
            }
        })
        .collect()
}

/// Current track plus history for a payload of any supported shape.
pub fn parse_payload(payload: &Value, mount: &str) -> (TrackState, Vec<HistoryItem>) {
    let state = match detect_shape(payload) {
        Some(PayloadShape::Icecast(sources)) | Some(PayloadShape::Sources(sources)) => {
            match select_source(&sources, mount) {
                Some(source) => read_item(source),
                None => TrackState::Missing,
            }
        }
        Some(PayloadShape::Nested(now)) => read_item(now),
        Some(PayloadShape::Flat(obj)) => read_item(obj),
        None => TrackState::Missing,
    };
    (state, read_history(payload))
}

// ── Source ────────────────────────────────────────────────────────────────────

/// Absolute source URL, or the configuration problem that prevents one.
pub fn source_url(config: &Config) -> Result<String, FetchError> {
    let raw = config.now_playing.source_url.trim();
    if raw.is_empty() {
        return Err(FetchError::Unconfigured("now_playing.source_url"));
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(raw.to_string());
    }

    let domain = config.site.domain.trim().trim_end_matches('/');
    if domain.is_empty() {
        return Err(FetchError::Unconfigured("site.domain"));
    }
    let origin = if domain.contains("://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    };
    Ok(format!("{}/{}", origin, raw.trim_start_matches('/')))
}

pub struct NowPlayingSource {
    url: String,
    mount: String,
    timeout: Duration,
    ttl_secs: i64,
    mock_path: PathBuf,
}

impl NowPlayingSource {
    pub fn new(config: &Config, content_dir: &Path) -> Result<Self, FetchError> {
        Ok(Self {
            url: source_url(config)?,
            mount: config.now_playing.mount.clone(),
            timeout: Duration::from_secs(config.now_playing.timeout_sec.max(1)),
            ttl_secs: config.now_ttl_secs(),
            mock_path: content_dir.join(MOCK_FILE),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn mock(&self) -> Option<NowPlayingState> {
        let content = std::fs::read_to_string(&self.mock_path).ok()?;
        let payload: Value = serde_json::from_str(&content)
            .map_err(|e| warn!(path = %self.mock_path.display(), "bad mock file: {}", e))
            .ok()?;
        let (state, history) = parse_payload(&payload, &self.mount);
        state
            .playable()
            .map(|item| NowPlayingState::playing(item, history))
    }
}

impl DataSource for NowPlayingSource {
    type Data = NowPlayingState;

    fn key(&self) -> &'static str {
        CACHE_KEY
    }

    fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    async fn fetch(&self) -> Result<Value, FetchError> {
        let client = http::build_client(self.timeout)?;
        http::get_json(&client, &self.url).await
    }

    /// Rejects anything without a playable track, silence included.
    fn normalize(&self, payload: &Value) -> Option<NowPlayingState> {
        let (state, history) = parse_payload(payload, &self.mount);
        match state {
            TrackState::Playable(item) => Some(NowPlayingState::playing(item, history)),
            TrackState::Silent => {
                debug!("payload reports silence");
                None
            }
            TrackState::Missing => {
                debug!("payload has no track");
                None
            }
        }
    }

    fn fallback(&self) -> Resolved<NowPlayingState> {
        match self.mock() {
            Some(state) => Resolved::new(state, Provenance::Mock),
            None => Resolved::new(
                NowPlayingState::unavailable("no playable track from fetch, cache or mock"),
                Provenance::Unavailable,
            ),
        }
    }
}

/// Apply the liveness rule: only a fetch from this build is live.
fn settle(mut resolved: Resolved<NowPlayingState>) -> Resolved<NowPlayingState> {
    let live = resolved.provenance == Provenance::Live;
    let state = &mut resolved.value;
    state.live = live && state.available;
    state.auto_refresh = state.live;
    if !state.live {
        state.history.clear();
    }
    resolved
}

pub async fn resolve(
    store: &CacheStore,
    config: &Config,
    content_dir: &Path,
) -> Resolved<NowPlayingState> {
    let source = match NowPlayingSource::new(config, content_dir) {
        Ok(source) => source,
        Err(e) => {
            info!(branch = "unavailable", "now playing not configured: {}", e);
            return Resolved::new(
                NowPlayingState::unavailable(e.to_string()),
                Provenance::Unavailable,
            );
        }
    };

    info!(url = source.url(), mount = %source.mount, "resolving now playing");
    let resolved = settle(resolve_source(store, &source).await);
    info!(
        branch = %resolved.provenance,
        available = resolved.value.available,
        live = resolved.value.live,
        track = resolved.value.track.as_deref().unwrap_or("-"),
        "now playing resolved"
    );
    resolved
}

// ── tests ─────────────────────────────────────────────────────────────────────
