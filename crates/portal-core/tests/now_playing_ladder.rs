mod common;

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use common::{now_playing_config, serve, Workspace};
use portal_core::now_playing::{self, CACHE_KEY, MOCK_FILE};
use portal_core::Provenance;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
struct Upstream {
    hits: Arc<AtomicUsize>,
    status: StatusCode,
    body: Value,
}

async fn status_json(State(up): State<Upstream>) -> (StatusCode, Json<Value>) {
    up.hits.fetch_add(1, Ordering::SeqCst);
    (up.status, Json(up.body.clone()))
}

async fn upstream(status: StatusCode, body: Value) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/api/now-playing", get(status_json))
        .with_state(Upstream {
            hits: hits.clone(),
            status,
            body,
        });
    (serve(app).await, hits)
}

fn live_payload() -> Value {
    json!({
        "now": {"title": "Blur FM - Warm Breeze", "url": "https://blur.fm/listen"},
        "history": [
            {"track": "Earlier", "artist": "Someone", "played_at": "2024-05-01T09:00:00Z"}
        ]
    })
}

#[tokio::test]
async fn live_fetch_then_fresh_cache_is_not_live() {
    let ws = Workspace::new();
    let (origin, hits) = upstream(StatusCode::OK, live_payload()).await;
    let config = now_playing_config(&format!("{origin}/api/now-playing"));

    let first = now_playing::resolve(&ws.store, &config, ws.content_dir()).await;
    assert_eq!(first.provenance, Provenance::Live);
    assert!(first.value.available);
    assert!(first.value.live);
    assert!(first.value.auto_refresh);
    assert_eq!(first.value.artist.as_deref(), Some("Blur FM"));
    assert_eq!(first.value.track.as_deref(), Some("Warm Breeze"));
    assert_eq!(first.value.history.len(), 1);
    assert!(ws.store.read(CACHE_KEY).is_some());

    // default TTL is 5 minutes, so the second build is served from cache
    let second = now_playing::resolve(&ws.store, &config, ws.content_dir()).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(second.provenance, Provenance::Cache);
    assert!(second.value.available);
    assert!(!second.value.live);
    assert!(!second.value.auto_refresh);
    assert!(second.value.history.is_empty());
    assert_eq!(second.value.track.as_deref(), Some("Warm Breeze"));
}

#[tokio::test]
async fn relative_source_is_joined_onto_domain() {
    let ws = Workspace::new();
    let (origin, hits) = upstream(StatusCode::OK, live_payload()).await;
    let mut config = now_playing_config("/api/now-playing");
    config.site.domain = origin;

    let resolved = now_playing::resolve(&ws.store, &config, ws.content_dir()).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(resolved.provenance, Provenance::Live);
}

#[tokio::test]
async fn silence_falls_back_to_stale_cache() {
    let ws = Workspace::new();
    ws.store
        .write(CACHE_KEY, &json!({"track": "Old Song", "artist": "Old Band", "history": [{"track": "x"}]}))
        .unwrap();
    let (origin, hits) = upstream(StatusCode::OK, json!({"track": "Silencio"})).await;
    let mut config = now_playing_config(&format!("{origin}/api/now-playing"));
    config.now_playing.cache_ttl_sec = Some(0);

    let resolved = now_playing::resolve(&ws.store, &config, ws.content_dir()).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(resolved.provenance, Provenance::Stale);
    assert!(resolved.value.available);
    assert!(!resolved.value.live);
    assert!(resolved.value.history.is_empty());
    assert_eq!(resolved.value.track.as_deref(), Some("Old Song"));
    // the silent payload did not replace the last good entry
    assert_eq!(ws.store.read(CACHE_KEY).unwrap()["track"], "Old Song");
}

#[tokio::test]
async fn silence_without_cache_or_mock_is_unavailable() {
    let ws = Workspace::new();
    let (origin, _) = upstream(StatusCode::OK, json!({"track": "Silence"})).await;
    let config = now_playing_config(&format!("{origin}/api/now-playing"));

    let resolved = now_playing::resolve(&ws.store, &config, ws.content_dir()).await;
    assert_eq!(resolved.provenance, Provenance::Unavailable);
    assert!(!resolved.value.available);
    assert!(resolved.value.track.is_none());
    assert!(ws.store.read(CACHE_KEY).is_none());
}

#[tokio::test]
async fn cached_silence_is_not_served_as_fresh() {
    let ws = Workspace::new();
    ws.store.write(CACHE_KEY, &json!({"track": "silence"})).unwrap();
    let (origin, hits) = upstream(StatusCode::OK, live_payload()).await;
    let config = now_playing_config(&format!("{origin}/api/now-playing"));

    let resolved = now_playing::resolve(&ws.store, &config, ws.content_dir()).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(resolved.provenance, Provenance::Live);
}

#[tokio::test]
async fn server_error_uses_mock_when_no_cache() {
    let ws = Workspace::new();
    std::fs::write(
        ws.content_dir().join(MOCK_FILE),
        r#"{"track": "Warm Breeze", "artist": "Blur FM", "history": [{"track": "a"}]}"#,
    )
    .unwrap();
    let (origin, _) = upstream(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "boom"})).await;
    let config = now_playing_config(&format!("{origin}/api/now-playing"));

    let resolved = now_playing::resolve(&ws.store, &config, ws.content_dir()).await;
    assert_eq!(resolved.provenance, Provenance::Mock);
    assert!(resolved.value.available);
    assert!(!resolved.value.live);
    assert!(resolved.value.history.is_empty());
    assert_eq!(resolved.value.artist.as_deref(), Some("Blur FM"));
}

#[tokio::test]
async fn unreachable_upstream_is_stale_with_cache() {
    let ws = Workspace::new();
    ws.store
        .write(CACHE_KEY, &json!({"icestats": {"source": {"title": "Band - Tune"}}}))
        .unwrap();
    // nothing listens on port 9 of localhost
    let mut config = now_playing_config("http://127.0.0.1:9/status-json.xsl");
    config.now_playing.cache_ttl_sec = Some(0);

    let resolved = now_playing::resolve(&ws.store, &config, ws.content_dir()).await;
    assert_eq!(resolved.provenance, Provenance::Stale);
    assert_eq!(resolved.value.track.as_deref(), Some("Tune"));
    assert_eq!(resolved.value.artist.as_deref(), Some("Band"));
}
