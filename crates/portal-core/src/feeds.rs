//! Link roll: the union of every configured RSS/Atom feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{Provenance, Resolved};
use crate::config::{Config, FeedSource};
use crate::dates;
use crate::error::FetchError;
use crate::http;
use crate::source::DataSource;

pub const CACHE_KEY: &str = "feeds";
/// Entries taken from any single feed.
const PER_FEED_LIMIT: usize = 12;
const FALLBACK_LIMIT: usize = 10;
const TIMEOUT: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub url: String,
    pub source: String,
    pub published: DateTime<Utc>,
}

impl FeedItem {
    pub fn published_label(&self) -> String {
        self.published.format("%Y-%m-%d").to_string()
    }

    fn from_payload(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let text = |field: &str, default: &str| {
            obj.get(field)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        Some(Self {
            title: text("title", "(untitled)"),
            url: text("url", "#"),
            source: text("source", "feed"),
            published: obj
                .get("published")
                .and_then(dates::parse_timestamp)
                .unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Debug, Deserialize)]
struct FeedsFile {
    #[serde(default)]
    feeds: Vec<FeedSource>,
}

/// Feeds listed in `feeds.yaml`. A missing or unreadable file is no feeds.
pub fn load_feed_list(path: &Path) -> Vec<FeedSource> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_yaml::from_str::<Option<FeedsFile>>(&content) {
        Ok(file) => file.map(|f| f.feeds).unwrap_or_default(),
        Err(e) => {
            warn!("ignoring malformed {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Parse an RSS or Atom document into items for `source`.
///
/// Linkless entries are dropped; Atom entries prefer their `alternate` link.
pub fn parse_feed(source: &str, body: &[u8]) -> Result<Vec<FeedItem>, FetchError> {
    let feed = feed_rs::parser::parse(body).map_err(|e| FetchError::Parse(e.to_string()))?;
    let now = Utc::now();

    let items = feed
        .entries
        .into_iter()
        .take(PER_FEED_LIMIT)
        .filter_map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("") | Some("alternate")))
                .or_else(|| entry.links.first())
                .map(|l| l.href.trim().to_string())
                .filter(|href| !href.is_empty())?;
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "(untitled)".to_string());
            Some(FeedItem {
                title,
                url: link,
                source: source.to_string(),
                published: entry.published.or(entry.updated).unwrap_or(now),
            })
        })
        .collect();
    Ok(items)
}

/// Fetch every feed with `fetch_one`, skipping the ones that fail.
///
/// Errors only when no feed produced a single item.
pub async fn gather<F, Fut>(
    feeds: &[FeedSource],
    limit: usize,
    mut fetch_one: F,
) -> Result<Value, FetchError>
where
    F: FnMut(FeedSource) -> Fut,
    Fut: Future<Output = Result<Vec<FeedItem>, FetchError>>,
{
    let mut all = Vec::new();
    for feed in feeds {
        if feed.url.trim().is_empty() {
            continue;
        }
        match fetch_one(feed.clone()).await {
            Ok(items) => {
                debug!(feed = %feed.name, count = items.len(), "feed fetched");
                all.extend(items);
            }
            Err(e) => warn!(feed = %feed.name, url = %feed.url, "skipping feed: {}", e),
        }
    }

    if all.is_empty() {
        return Err(FetchError::Empty("no feed data fetched".into()));
    }

    all.sort_by(|a, b| b.published.cmp(&a.published));
    all.truncate(limit);
    info!(count = all.len(), "feeds merged");
    Ok(json!({
        "updated_at": Utc::now().to_rfc3339(),
        "items": all,
    }))
}

async fn fetch_feed(client: &reqwest::Client, feed: &FeedSource) -> Result<Vec<FeedItem>, FetchError> {
    let body = http::get_bytes(client, feed.url.trim()).await?;
    parse_feed(&feed.name, &body)
}

pub struct FeedsSource {
    feeds: Vec<FeedSource>,
    ttl_secs: i64,
    limit: usize,
}

impl FeedsSource {
    /// Feeds from `feeds.yaml` in `content_dir`, then any listed in the config.
    pub fn new(config: &Config, content_dir: &Path) -> Self {
        let mut feeds = load_feed_list(&content_dir.join("feeds.yaml"));
        feeds.extend(config.feeds.iter().cloned());
        Self::with_feeds(config, feeds)
    }

    pub fn with_feeds(config: &Config, feeds: Vec<FeedSource>) -> Self {
        Self {
            feeds,
            ttl_secs: config.feeds_ttl_secs(),
            limit: config.feeds_limit,
        }
    }
}

impl DataSource for FeedsSource {
    type Data = Vec<FeedItem>;

    fn key(&self) -> &'static str {
        CACHE_KEY
    }

    fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    async fn fetch(&self) -> Result<Value, FetchError> {
        let client = http::build_client(TIMEOUT)?;
        let client = &client;
        gather(&self.feeds, self.limit, |feed| async move {
            fetch_feed(client, &feed).await
        })
        .await
    }

    fn normalize(&self, payload: &Value) -> Option<Vec<FeedItem>> {
        let items = payload.get("items")?.as_array()?;
        Some(
            items
                .iter()
                .take(self.limit)
                .filter_map(FeedItem::from_payload)
                .collect(),
        )
    }

    fn fallback(&self) -> Resolved<Vec<FeedItem>> {
        let now = Utc::now();
        let items = self
            .feeds
            .iter()
            .take(FALLBACK_LIMIT)
            .enumerate()
            .map(|(i, feed)| FeedItem {
                title: format!("Offline cached placeholder #{}", i + 1),
                url: if feed.url.is_empty() {
                    "https://example.com".to_string()
                } else {
                    feed.url.clone()
                },
                source: feed.name.clone(),
                published: now,
            })
            .collect();
        Resolved::new(items, Provenance::Fallback)
    }
}
