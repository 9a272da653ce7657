//! On-disk JSON cache with TTL freshness, and the fetch ladder built on it.
//!
//! ## Ladder
//!
//!   1. fresh cache entry          → `cache`    (no fetch happens)
//!   2. fetch succeeds             → `live`     (payload written to cache)
//!   3. fetch fails, entry exists  → `stale`    (last-known-good, any age)
//!   4. nothing usable             → `fallback` (caller-supplied)
//!
//! Entries are never deleted. A stale entry stays on disk until the next
//! successful fetch replaces it.
//!
//! Single writer: one build per cache directory at a time. Nothing here
//! locks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::error::FetchError;

// ── Provenance ────────────────────────────────────────────────────────────────

/// Which ladder step produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Cache,
    Live,
    Stale,
    Fallback,
    Mock,
    Unavailable,
}

impl Provenance {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Live => "live",
            Self::Stale => "stale",
            Self::Fallback => "fallback",
            Self::Mock => "mock",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A normalized value together with the step that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved<T> {
    pub value: T,
    pub provenance: Provenance,
}

impl<T> Resolved<T> {
    pub fn new(value: T, provenance: Provenance) -> Self {
        Self { value, provenance }
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// One JSON document per source key under a single directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Missing and malformed files both read as absent.
    pub fn read(&self, key: &str) -> Option<Value> {
        let path = self.path(key);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Value>(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, path = %path.display(), "ignoring malformed cache file: {}", e);
                None
            }
        }
    }

    /// Persist `payload` under `key`.
    ///
    /// The document is written to a temp file beside the target and renamed
    /// over it, so a reader never sees a half-written entry.
    pub fn write(&self, key: &str, payload: &Value) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, payload)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(key))?;
        debug!(key, "cache entry written");
        Ok(())
    }

    /// Age of the entry by file modification time. A timestamp in the future
    /// counts as zero.
    pub fn age(&self, key: &str) -> Option<Duration> {
        let modified = std::fs::metadata(self.path(key)).ok()?.modified().ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    pub fn is_fresh(&self, key: &str, ttl_secs: i64) -> bool {
        if ttl_secs <= 0 {
            return false;
        }
        match self.age(key) {
            Some(age) => age <= Duration::from_secs(ttl_secs as u64),
            None => false,
        }
    }

    // ── Ladder ────────────────────────────────────────────────────────────────

    /// Run the ladder for `key`, falling back to `fallback()` when neither a
    /// fetch nor any cache entry is available.
    pub async fn resolve<F, Fut, B>(
        &self,
        key: &str,
        ttl_secs: i64,
        fetch: F,
        fallback: B,
    ) -> Resolved<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, FetchError>>,
        B: FnOnce() -> Value,
    {
        match self
            .resolve_accepted(key, ttl_secs, fetch, |v| Some(v.clone()))
            .await
        {
            Some(resolved) => resolved,
            None => {
                info!(key, branch = "fallback", "no fetch and no cache, using fallback");
                Resolved::new(fallback(), Provenance::Fallback)
            }
        }
    }

    /// The ladder with a validity gate.
    ///
    /// `accept` runs on every candidate payload (fresh cache, fetched, stale
    /// cache). A rejected candidate falls through as if its step had failed,
    /// and a rejected fetch is not written, so the last good entry survives.
    /// Returns `None` when no step produced an accepted value.
    pub async fn resolve_accepted<T, F, Fut, A>(
        &self,
        key: &str,
        ttl_secs: i64,
        fetch: F,
        accept: A,
    ) -> Option<Resolved<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, FetchError>>,
        A: Fn(&Value) -> Option<T>,
    {
        let cached = self.read(key);

        if let Some(payload) = cached.as_ref() {
            if self.is_fresh(key, ttl_secs) {
                if let Some(value) = accept(payload) {
                    info!(key, branch = "cache", "serving fresh cache entry");
                    return Some(Resolved::new(value, Provenance::Cache));
                }
                warn!(key, "fresh cache entry rejected, fetching");
            }
        }

        match fetch().await {
            Ok(payload) => match accept(&payload) {
                Some(value) => {
                    if let Err(e) = self.write(key, &payload) {
                        warn!(key, "failed to write cache entry: {:#}", e);
                    }
                    info!(key, branch = "live", "fetched fresh payload");
                    return Some(Resolved::new(value, Provenance::Live));
                }
                None => warn!(key, "fetched payload rejected"),
            },
            Err(e) => warn!(key, kind = e.kind(), "fetch failed: {}", e),
        }

        let payload = cached?;
        match accept(&payload) {
            Some(value) => {
                info!(key, branch = "stale", "serving last-known-good cache entry");
                Some(Resolved::new(value, Provenance::Stale))
            }
            None => {
                warn!(key, "stale cache entry rejected");
                None
            }
        }
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    fn store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache"));
        (dir, store)
    }

    fn backdate(store: &CacheStore, key: &str, secs: u64) {
        let file = std::fs::File::options()
            .write(true)
            .open(store.path(key))
            .unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_write_then_read_is_deep_equal() {
        let (_dir, store) = store();
        let payload = json!({"items": [{"title": "a", "n": 1.5}], "ok": true, "none": null});
        store.write("feeds", &payload).unwrap();
        assert_eq!(store.read("feeds"), Some(payload));
    }

    #[test]
    fn test_missing_and_malformed_read_as_absent() {
        let (_dir, store) = store();
        assert!(store.read("weather").is_none());

        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.path("weather"), "{ not json").unwrap();
        assert!(store.read("weather").is_none());
    }

    #[test]
    fn test_non_positive_ttl_is_never_fresh() {
        let (_dir, store) = store();
        store.write("status", &json!({})).unwrap();
        assert!(!store.is_fresh("status", 0));
        assert!(!store.is_fresh("status", -30));
        assert!(store.is_fresh("status", 60));
    }

    #[test]
    fn test_freshness_follows_mtime() {
        let (_dir, store) = store();
        assert!(!store.is_fresh("now_playing", 300));

        store.write("now_playing", &json!({"track": "x"})).unwrap();
        backdate(&store, "now_playing", 600);
        assert!(!store.is_fresh("now_playing", 300));
        assert!(store.is_fresh("now_playing", 900));
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_fetch() {
        let (_dir, store) = store();
        store.write("weather", &json!({"temp_c": 20.0})).unwrap();

        let calls = Cell::new(0);
        let resolved = store
            .resolve(
                "weather",
                60,
                || {
                    calls.set(calls.get() + 1);
                    async { Ok(json!({"temp_c": 30.0})) }
                },
                || json!({}),
            )
            .await;

        assert_eq!(calls.get(), 0);
        assert_eq!(resolved.provenance, Provenance::Cache);
        assert_eq!(resolved.value, json!({"temp_c": 20.0}));
    }

    #[tokio::test]
    async fn test_live_fetch_is_persisted() {
        let (_dir, store) = store();
        let resolved = store
            .resolve("weather", 60, || async { Ok(json!({"temp_c": 30.0})) }, || json!({}))
            .await;

        assert_eq!(resolved.provenance, Provenance::Live);
        assert_eq!(store.read("weather"), Some(json!({"temp_c": 30.0})));
    }

    #[tokio::test]
    async fn test_fetch_error_with_old_cache_is_stale() {
        let (_dir, store) = store();
        store.write("feeds", &json!({"items": ["old"]})).unwrap();
        backdate(&store, "feeds", 86_400);

        let resolved = store
            .resolve(
                "feeds",
                60,
                || async { Err(FetchError::Status(503)) },
                || json!({"items": []}),
            )
            .await;

        assert_eq!(resolved.provenance, Provenance::Stale);
        assert_eq!(resolved.value, json!({"items": ["old"]}));
        // the entry is left untouched
        assert_eq!(store.read("feeds"), Some(json!({"items": ["old"]})));
    }

    #[tokio::test]
    async fn test_fetch_error_without_cache_is_fallback() {
        let (_dir, store) = store();
        let resolved = store
            .resolve(
                "feeds",
                60,
                || async { Err(FetchError::Empty("no feeds".into())) },
                || json!({"items": ["placeholder"]}),
            )
            .await;

        assert_eq!(resolved.provenance, Provenance::Fallback);
        assert_eq!(resolved.value, json!({"items": ["placeholder"]}));
        assert!(store.read("feeds").is_none());
    }

    #[tokio::test]
    async fn test_rejected_fetch_keeps_last_good_entry() {
        let (_dir, store) = store();
        store.write("now_playing", &json!({"ok": true})).unwrap();

        let accept = |v: &Value| v.get("ok").and_then(Value::as_bool).filter(|ok| *ok);
        let resolved = store
            .resolve_accepted("now_playing", 0, || async { Ok(json!({"ok": false})) }, accept)
            .await
            .unwrap();

        assert_eq!(resolved.provenance, Provenance::Stale);
        assert_eq!(store.read("now_playing"), Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_rejected_fresh_cache_triggers_fetch() {
        let (_dir, store) = store();
        store.write("now_playing", &json!({"ok": false})).unwrap();

        let calls = Cell::new(0);
        let accept = |v: &Value| v.get("ok").and_then(Value::as_bool).filter(|ok| *ok);
        let resolved = store
            .resolve_accepted(
                "now_playing",
                3600,
                || {
                    calls.set(calls.get() + 1);
                    async { Ok(json!({"ok": true})) }
                },
                accept,
            )
            .await
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(resolved.provenance, Provenance::Live);
    }

    #[tokio::test]
    async fn test_nothing_accepted_is_none() {
        let (_dir, store) = store();
        store.write("now_playing", &json!({"ok": false})).unwrap();

        let accept = |v: &Value| v.get("ok").and_then(Value::as_bool).filter(|ok| *ok);
        let resolved = store
            .resolve_accepted(
                "now_playing",
                3600,
                || async { Err(FetchError::Timeout(Duration::from_secs(6))) },
                accept,
            )
            .await;
        assert!(resolved.is_none());
    }

    #[test]
    fn test_provenance_serializes_lowercase() {
        let r = Resolved::new(1, Provenance::Unavailable);
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"value": 1, "provenance": "unavailable"})
        );
    }
}
