//! Data core for the portal build: an on-disk TTL cache, the
//! fetch-or-serve-cached ladder, and the four source adapters that feed the
//! renderer (feeds, weather, now playing, host status).

pub mod cache;
pub mod config;
pub mod dates;
pub mod error;
pub mod feeds;
pub mod http;
pub mod now_playing;
pub mod platform;
pub mod source;
pub mod status;
pub mod weather;

pub use cache::{CacheStore, Provenance, Resolved};
pub use config::Config;
pub use error::FetchError;
pub use source::{resolve_source, DataSource};
