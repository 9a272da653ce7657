//! Host status: service checks, HTTP checks, uptime and CPU temperature.
//!
//! Metrics come from the build host (`local`) or from a remote box over a
//! batch-mode ssh session (`remote_ssh`). Remote mode ignores the status TTL
//! and probes on every build; a failed probe serves the last remote reading
//! from its own cache entry before it falls back to local metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, Provenance, Resolved};
use crate::config::{Config, HttpCheck, MetricsMode, StatusConfig};
use crate::dates;
use crate::error::FetchError;
use crate::http;
use crate::platform;
use crate::source::{resolve_source, DataSource};

pub const CACHE_KEY: &str = "status";
pub const REMOTE_CACHE_KEY: &str = "status_remote";
const SERVICE_TIMEOUT: Duration = Duration::from_secs(3);
const HTTP_TIMEOUT: Duration = Duration::from_secs(4);
const SYSTEMCTL: &str = "systemctl";
const SSH: &str = "ssh";

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Up,
    Degraded,
    Down,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub state: CheckState,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsSource {
    Local,
    RemoteSsh,
    RemoteCache,
    LocalFallback,
    Fallback,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub uptime_seconds: Option<f64>,
    pub cpu_temp_c: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub services: Vec<Check>,
    #[serde(default)]
    pub http_checks: Vec<Check>,
    #[serde(default)]
    pub uptime_seconds: Option<f64>,
    #[serde(default)]
    pub cpu_temp_c: Option<f64>,
    #[serde(default)]
    pub metrics_stale: bool,
    #[serde(default = "default_metrics_source")]
    pub metrics_source: MetricsSource,
}

fn default_metrics_source() -> MetricsSource {
    MetricsSource::Local
}

impl StatusSnapshot {
    pub fn uptime_label(&self) -> String {
        dates::format_uptime(self.uptime_seconds)
    }

    pub fn cpu_temp_label(&self) -> String {
        match self.cpu_temp_c {
            Some(t) => format!("{t:.1}°C"),
            None => "n/a".to_string(),
        }
    }

    fn empty() -> Self {
        Self {
            generated_at: Utc::now(),
            services: Vec::new(),
            http_checks: Vec::new(),
            uptime_seconds: None,
            cpu_temp_c: None,
            metrics_stale: true,
            metrics_source: MetricsSource::Fallback,
        }
    }
}

// ── State mapping ─────────────────────────────────────────────────────────────

/// `systemctl is-active` output → check state.
pub fn map_service_state(state: &str) -> CheckState {
    match state.trim() {
        "active" => CheckState::Up,
        "activating" | "reloading" => CheckState::Degraded,
        "inactive" | "failed" | "deactivating" => CheckState::Down,
        _ => CheckState::Unknown,
    }
}

pub fn map_http_status(code: u16) -> CheckState {
    match code {
        0..=399 => CheckState::Up,
        400..=499 => CheckState::Degraded,
        _ => CheckState::Down,
    }
}

// ── Checks ────────────────────────────────────────────────────────────────────

pub async fn check_service(name: &str) -> Check {
    check_service_with(SYSTEMCTL, name).await
}

/// Run `<binary> is-active <name>` with a bounded wait.
pub async fn check_service_with(binary: &str, name: &str) -> Check {
    let check = |state, detail: String| Check {
        name: name.to_string(),
        state,
        detail,
    };

    let mut cmd = tokio::process::Command::new(binary);
    cmd.args(["is-active", name])
        .stdin(Stdio::null())
        .kill_on_drop(true);
    let run = cmd.output();

    let output = match tokio::time::timeout(SERVICE_TIMEOUT, run).await {
        Err(_) => {
            warn!(service = name, "service check timed out");
            return check(CheckState::Degraded, "timed out".to_string());
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return check(CheckState::Unknown, format!("{binary} unavailable"));
        }
        Ok(Err(e)) => {
            warn!(service = name, "service check failed: {}", e);
            return check(CheckState::Unknown, format!("error: {e}"));
        }
        Ok(Ok(output)) => output,
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let raw = [stdout.trim(), stderr.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string();
    debug!(service = name, state = %raw, "service checked");
    check(map_service_state(&raw), raw)
}

pub async fn check_http(client: &reqwest::Client, check: &HttpCheck) -> Check {
    let (state, detail) = match client.get(check.url.trim()).send().await {
        Ok(response) => {
            let code = response.status().as_u16();
            (map_http_status(code), format!("HTTP {code}"))
        }
        Err(e) => {
            let e = FetchError::from(e);
            warn!(check = %check.name, url = %check.url, "http check failed: {}", e);
            (CheckState::Down, format!("error: {}", e.kind()))
        }
    };
    Check {
        name: check.name.clone(),
        state,
        detail,
    }
}

// ── Metrics ───────────────────────────────────────────────────────────────────

/// Where local metrics are read from.
#[derive(Debug, Clone)]
pub struct MetricsPaths {
    pub uptime: PathBuf,
    pub thermal: PathBuf,
}

impl Default for MetricsPaths {
    fn default() -> Self {
        Self {
            uptime: PathBuf::from(platform::PROC_UPTIME),
            thermal: PathBuf::from(platform::THERMAL_ZONE_TEMP),
        }
    }
}

fn read_number(path: &Path, field: usize) -> Option<f64> {
    let content = std::fs::read_to_string(path).ok()?;
    content.split_whitespace().nth(field)?.parse().ok()
}

pub fn read_local(paths: &MetricsPaths) -> Metrics {
    Metrics {
        uptime_seconds: read_number(&paths.uptime, 0),
        cpu_temp_c: read_number(&paths.thermal, 0).map(|milli| milli / 1000.0),
    }
}

/// Shell snippet run on the remote host. Prints uptime seconds, then
/// millidegrees when the thermal file exists; a missing file is not an error.
pub fn probe_script(uptime: &str, thermal: &str) -> String {
    format!("cut -d' ' -f1 '{uptime}'; cat '{thermal}' 2>/dev/null || true")
}

/// Remote probe stdout: uptime seconds, then millidegrees. The temperature
/// line is optional (hosts without a thermal zone).
pub fn parse_probe_output(stdout: &str) -> Result<Metrics, FetchError> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let uptime = lines
        .next()
        .ok_or_else(|| FetchError::Empty("remote probe printed nothing".into()))?;
    let uptime: f64 = uptime
        .parse()
        .map_err(|_| FetchError::Parse(format!("uptime line not numeric: {uptime:?}")))?;
    let cpu_temp_c = lines
        .next()
        .and_then(|l| l.parse::<f64>().ok())
        .map(|milli| milli / 1000.0);
    Ok(Metrics {
        uptime_seconds: Some(uptime),
        cpu_temp_c,
    })
}

/// Run `script` on `target` through `ssh` in batch mode.
pub async fn probe_remote(
    ssh: &str,
    target: &str,
    script: &str,
    timeout: Duration,
) -> Result<Metrics, FetchError> {
    if target.trim().is_empty() {
        return Err(FetchError::Unconfigured("status.ssh_target"));
    }

    let connect_timeout = format!("ConnectTimeout={}", timeout.as_secs().max(1));
    info!(ssh_target = target, "probing remote metrics over ssh");
    let mut cmd = tokio::process::Command::new(ssh);
    cmd.args(["-o", "BatchMode=yes", "-o", connect_timeout.as_str()])
        .arg(target.trim())
        .arg(script)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    let run = cmd.output();

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| FetchError::Timeout(timeout))?
        .map_err(|e| FetchError::Subprocess(format!("{ssh}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FetchError::Subprocess(format!(
            "ssh exited {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsReading {
    pub metrics: Metrics,
    pub source: MetricsSource,
    pub stale: bool,
}

/// Settle a remote probe result: fresh reading, else the last remote
/// reading, else local metrics.
pub fn settle_remote(
    store: &CacheStore,
    probe: Result<Metrics, FetchError>,
    allow_cache: bool,
    paths: &MetricsPaths,
) -> MetricsReading {
    match probe {
        Ok(metrics) => {
            match serde_json::to_value(metrics) {
                Ok(payload) => {
                    if let Err(e) = store.write(REMOTE_CACHE_KEY, &payload) {
                        warn!("failed to cache remote metrics: {:#}", e);
                    }
                }
                Err(e) => warn!("failed to encode remote metrics: {}", e),
            }
            return MetricsReading {
                metrics,
                source: MetricsSource::RemoteSsh,
                stale: false,
            };
        }
        Err(e) => warn!(kind = e.kind(), "remote probe failed: {}", e),
    }

    if allow_cache {
        let cached = store
            .read(REMOTE_CACHE_KEY)
            .and_then(|v| serde_json::from_value::<Metrics>(v).ok());
        if let Some(metrics) = cached {
            info!(branch = "remote_cache", "serving last remote metrics");
            return MetricsReading {
                metrics,
                source: MetricsSource::RemoteCache,
                stale: true,
            };
        }
    }

    info!(branch = "local_fallback", "no remote metrics, reading local");
    MetricsReading {
        metrics: read_local(paths),
        source: MetricsSource::LocalFallback,
        stale: true,
    }
}

// ── Source ────────────────────────────────────────────────────────────────────

pub struct StatusSource {
    services: Vec<String>,
    http_checks: Vec<HttpCheck>,
    settings: StatusConfig,
    ttl_secs: i64,
    store: CacheStore,
    paths: MetricsPaths,
    ssh: String,
}

impl StatusSource {
    pub fn new(config: &Config, store: &CacheStore) -> Self {
        Self {
            services: config.status_services.clone(),
            http_checks: config.status_http_checks.clone(),
            settings: config.status.clone(),
            ttl_secs: config.status_ttl_secs(),
            store: store.clone(),
            paths: MetricsPaths::default(),
            ssh: SSH.to_string(),
        }
    }

    pub fn with_paths(mut self, paths: MetricsPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_ssh(mut self, binary: impl Into<String>) -> Self {
        self.ssh = binary.into();
        self
    }

    async fn metrics(&self) -> MetricsReading {
        match self.settings.metrics_mode {
            MetricsMode::Local => MetricsReading {
                metrics: read_local(&self.paths),
                source: MetricsSource::Local,
                stale: false,
            },
            MetricsMode::RemoteSsh => {
                let timeout = Duration::from_secs(self.settings.ssh_timeout_sec.max(1));
                let script = probe_script(platform::PROC_UPTIME, platform::THERMAL_ZONE_TEMP);
                let probe =
                    probe_remote(&self.ssh, &self.settings.ssh_target, &script, timeout).await;
                settle_remote(
                    &self.store,
                    probe,
                    self.settings.allow_fallback_cache,
                    &self.paths,
                )
            }
        }
    }

    pub async fn collect(&self) -> Result<StatusSnapshot, FetchError> {
        let mut services = Vec::with_capacity(self.services.len());
        for name in &self.services {
            services.push(check_service(name).await);
        }

        let mut http_checks = Vec::with_capacity(self.http_checks.len());
        let targets: Vec<&HttpCheck> = self
            .http_checks
            .iter()
            .filter(|c| !c.url.trim().is_empty())
            .collect();
        if !targets.is_empty() {
            let client = http::build_client(HTTP_TIMEOUT)?;
            for target in targets {
                http_checks.push(check_http(&client, target).await);
            }
        }

        let reading = self.metrics().await;
        Ok(StatusSnapshot {
            generated_at: Utc::now(),
            services,
            http_checks,
            uptime_seconds: reading.metrics.uptime_seconds,
            cpu_temp_c: reading.metrics.cpu_temp_c,
            metrics_stale: reading.stale,
            metrics_source: reading.source,
        })
    }
}

impl DataSource for StatusSource {
    type Data = StatusSnapshot;

    fn key(&self) -> &'static str {
        CACHE_KEY
    }

    /// Remote mode probes on every build.
    fn ttl_secs(&self) -> i64 {
        match self.settings.metrics_mode {
            MetricsMode::Local => self.ttl_secs,
            MetricsMode::RemoteSsh => 0,
        }
    }

    async fn fetch(&self) -> Result<Value, FetchError> {
        Ok(serde_json::to_value(self.collect().await?)?)
    }

    fn normalize(&self, payload: &Value) -> Option<StatusSnapshot> {
        serde_json::from_value(payload.clone())
            .map_err(|e| debug!("status payload unreadable: {}", e))
            .ok()
    }

    fn fallback(&self) -> Resolved<StatusSnapshot> {
        Resolved::new(StatusSnapshot::empty(), Provenance::Fallback)
    }
}

pub async fn resolve(store: &CacheStore, config: &Config) -> Resolved<StatusSnapshot> {
    resolve_with(store, &StatusSource::new(config, store)).await
}

pub async fn resolve_with<S>(store: &CacheStore, source: &S) -> Resolved<StatusSnapshot>
where
    S: DataSource<Data = StatusSnapshot>,
{
    let mut resolved = resolve_source(store, source).await;
    if resolved.provenance == Provenance::Stale {
        resolved.value.metrics_stale = true;
    }
    resolved
}

// ── tests ─────────────────────────────────────────────────────────────────────
