use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default = "default_feeds_ttl_minutes")]
    pub feeds_ttl_minutes: i64,
    #[serde(default = "default_weather_ttl_minutes")]
    pub weather_ttl_minutes: i64,
    #[serde(default = "default_now_ttl_minutes")]
    pub now_ttl_minutes: i64,
    #[serde(default = "default_status_ttl_minutes")]
    pub status_ttl_minutes: i64,
    #[serde(default = "default_feeds_limit")]
    pub feeds_limit: usize,
    /// Extra feeds on top of `feeds.yaml` in the content directory.
    #[serde(default)]
    pub feeds: Vec<FeedSource>,
    #[serde(default)]
    pub now_playing: NowPlayingConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub status_services: Vec<String>,
    #[serde(default)]
    pub status_http_checks: Vec<HttpCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub title: String,
    /// Bare host (`example.com`) or origin (`https://example.com`). Relative
    /// now-playing URLs are joined onto it.
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    #[serde(default = "default_longitude")]
    pub longitude: f64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSource {
    #[serde(default = "default_feed_name")]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NowPlayingConfig {
    /// Absolute URL, or a path served from `site.domain`.
    #[serde(default)]
    pub source_url: String,
    /// Stream mount to pick when the server reports several sources.
    #[serde(default)]
    pub mount: String,
    #[serde(default = "default_now_timeout_sec")]
    pub timeout_sec: u64,
    /// Overrides `now_ttl_minutes` when set.
    #[serde(default)]
    pub cache_ttl_sec: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsMode {
    #[default]
    Local,
    RemoteSsh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default)]
    pub metrics_mode: MetricsMode,
    /// `user@host` handed to ssh.
    #[serde(default)]
    pub ssh_target: String,
    #[serde(default = "default_ssh_timeout_sec")]
    pub ssh_timeout_sec: u64,
    /// Serve the last remote reading when the probe fails.
    #[serde(default = "default_allow_fallback_cache")]
    pub allow_fallback_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCheck {
    #[serde(default = "default_http_check_name")]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            domain: String::new(),
            latitude: default_latitude(),
            longitude: default_longitude(),
            timezone: default_timezone(),
        }
    }
}

impl Default for NowPlayingConfig {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            mount: String::new(),
            timeout_sec: default_now_timeout_sec(),
            cache_ttl_sec: None,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            metrics_mode: MetricsMode::default(),
            ssh_target: String::new(),
            ssh_timeout_sec: default_ssh_timeout_sec(),
            allow_fallback_cache: default_allow_fallback_cache(),
        }
    }
}

fn default_feeds_ttl_minutes() -> i64 {
    30
}

fn default_weather_ttl_minutes() -> i64 {
    30
}

fn default_now_ttl_minutes() -> i64 {
    5
}

fn default_status_ttl_minutes() -> i64 {
    10
}

fn default_feeds_limit() -> usize {
    120
}

fn default_feed_name() -> String {
    "feed".to_string()
}

fn default_http_check_name() -> String {
    "http".to_string()
}

// Buenos Aires
fn default_latitude() -> f64 {
    -34.6037
}

fn default_longitude() -> f64 {
    -58.3816
}

fn default_timezone() -> String {
    "auto".to_string()
}

fn default_now_timeout_sec() -> u64 {
    6
}

fn default_ssh_timeout_sec() -> u64 {
    5
}

fn default_allow_fallback_cache() -> bool {
    true
}

impl Config {
    /// Load from `path`, picking the format by extension (`.toml` or YAML).
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content, is_toml(path))
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(content: &str, toml: bool) -> anyhow::Result<Self> {
        if toml {
            return Ok(toml::from_str(content)?);
        }
        // An empty YAML document deserializes to null, not to a map.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// First existing `config.yaml`, `config.yml` or `config.toml` in
    /// `content_dir`; `config.yaml` when none exists.
    pub fn find_in(content_dir: &Path) -> PathBuf {
        ["config.yaml", "config.yml", "config.toml"]
            .iter()
            .map(|name| content_dir.join(name))
            .find(|p| p.exists())
            .unwrap_or_else(|| content_dir.join("config.yaml"))
    }

    pub fn feeds_ttl_secs(&self) -> i64 {
        self.feeds_ttl_minutes * 60
    }

    pub fn weather_ttl_secs(&self) -> i64 {
        self.weather_ttl_minutes * 60
    }

    pub fn status_ttl_secs(&self) -> i64 {
        self.status_ttl_minutes * 60
    }

    pub fn now_ttl_secs(&self) -> i64 {
        self.now_playing
            .cache_ttl_sec
            .unwrap_or(self.now_ttl_minutes * 60)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            feeds_ttl_minutes: default_feeds_ttl_minutes(),
            weather_ttl_minutes: default_weather_ttl_minutes(),
            now_ttl_minutes: default_now_ttl_minutes(),
            status_ttl_minutes: default_status_ttl_minutes(),
            feeds_limit: default_feeds_limit(),
            feeds: Vec::new(),
            now_playing: NowPlayingConfig::default(),
            status: StatusConfig::default(),
            status_services: Vec::new(),
            status_http_checks: Vec::new(),
        }
    }
}
