use std::time::Duration;

/// Everything that can go wrong while producing a fresh payload.
///
/// None of these escape an adapter: they push the ladder down to the stale
/// cache or the fallback.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("subprocess failed: {0}")]
    Subprocess(String),

    #[error("not configured: {0}")]
    Unconfigured(&'static str),

    #[error("no data: {0}")]
    Empty(String),
}

impl FetchError {
    /// Short label for diagnostics and status details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(e) if e.is_connect() => "connect",
            Self::Http(_) => "http",
            Self::Status(_) => "status",
            Self::Timeout(_) => "timeout",
            Self::Parse(_) => "parse",
            Self::Subprocess(_) => "subprocess",
            Self::Unconfigured(_) => "unconfigured",
            Self::Empty(_) => "empty",
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
