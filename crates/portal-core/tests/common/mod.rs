#![allow(dead_code)]

use axum::Router;
use portal_core::{CacheStore, Config};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Serve `app` on an ephemeral localhost port and return its origin.
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("listener has no address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

/// A scratch content dir with an empty cache under it.
pub struct Workspace {
    pub dir: TempDir,
    pub store: CacheStore,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = CacheStore::new(dir.path().join("cache"));
        Self { dir, store }
    }

    pub fn content_dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}

pub fn now_playing_config(source_url: &str) -> Config {
    let mut config = Config::default();
    config.now_playing.source_url = source_url.to_string();
    config.now_playing.timeout_sec = 2;
    config
}
