use serde_json::Value;
use std::future::Future;
use tracing::Instrument;

use crate::cache::{CacheStore, Resolved};
use crate::error::FetchError;

/// One dynamic input of the build.
///
/// The ladder itself lives in [`CacheStore::resolve_accepted`]; a source only
/// says where its payload comes from, how to read it, and what to show when
/// nothing else worked.
pub trait DataSource {
    type Data;

    /// Cache key, also the cache file stem.
    fn key(&self) -> &'static str;

    /// Seconds a cache entry is trusted without refetching. `<= 0` always
    /// fetches.
    fn ttl_secs(&self) -> i64;

    fn fetch(&self) -> impl Future<Output = Result<Value, FetchError>>;

    /// Map a raw payload to the canonical shape. `None` rejects the payload
    /// and the ladder moves on as if that step had failed.
    fn normalize(&self, payload: &Value) -> Option<Self::Data>;

    /// Terminal result when no fetch or cache entry was usable.
    fn fallback(&self) -> Resolved<Self::Data>;
}

pub async fn resolve_source<S: DataSource>(store: &CacheStore, source: &S) -> Resolved<S::Data> {
    let key = source.key();
    let span = tracing::info_span!("source", key);
    async move {
        let resolved = store
            .resolve_accepted(key, source.ttl_secs(), || source.fetch(), |v| {
                source.normalize(v)
            })
            .await;
        match resolved {
            Some(resolved) => resolved,
            None => {
                let fallback = source.fallback();
                tracing::info!(branch = %fallback.provenance, "no usable payload");
                fallback
            }
        }
    }
    .instrument(span)
    .await
}
