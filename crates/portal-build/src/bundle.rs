//! The document handed to the renderer.

use chrono::{DateTime, Local, Utc};
use portal_core::feeds::FeedItem;
use portal_core::now_playing::{HistoryItem, NowPlayingState};
use portal_core::status::StatusSnapshot;
use portal_core::weather::Weather;
use portal_core::{Provenance, Resolved};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Bundle {
    pub built_at: DateTime<Local>,
    pub built_label: String,
    pub links: Vec<LinkView>,
    pub weather: WeatherView,
    pub status: StatusView,
    pub now: NowView,
    pub data_sources: DataSources,
}

/// Provenance of every source, for the "data sources" block.
#[derive(Debug, Serialize)]
pub struct DataSources {
    pub links: Provenance,
    pub weather: Provenance,
    pub now: Provenance,
    pub status: Provenance,
}

#[derive(Debug, Serialize)]
pub struct LinkView {
    #[serde(flatten)]
    pub item: FeedItem,
    pub published_label: String,
}

#[derive(Debug, Serialize)]
pub struct WeatherView {
    #[serde(flatten)]
    pub weather: Weather,
    pub temp_label: String,
    pub humidity_label: String,
    pub wind_label: String,
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
    pub uptime_label: String,
    pub cpu_temp_label: String,
    pub source: Provenance,
}

#[derive(Debug, Serialize)]
pub struct HistoryView {
    #[serde(flatten)]
    pub item: HistoryItem,
    pub played_label: String,
}

#[derive(Debug, Serialize)]
pub struct NowView {
    pub available: bool,
    pub live: bool,
    pub auto_refresh: bool,
    pub track: Option<String>,
    pub artist: Option<String>,
    pub stream_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub started_label: Option<String>,
    pub history: Vec<HistoryView>,
    pub reason: Option<String>,
    pub source: Provenance,
}

impl NowView {
    fn new(now: Resolved<NowPlayingState>) -> Self {
        let started_label = now.value.started_label();
        let state = now.value;
        Self {
            available: state.available,
            live: state.live,
            auto_refresh: state.auto_refresh,
            track: state.track,
            artist: state.artist,
            stream_url: state.stream_url,
            started_at: state.started_at,
            started_label,
            history: state
                .history
                .into_iter()
                .map(|item| HistoryView {
                    played_label: item.played_label(),
                    item,
                })
                .collect(),
            reason: state.reason,
            source: now.provenance,
        }
    }
}

impl Bundle {
    pub fn new(
        built_at: DateTime<Local>,
        links: Resolved<Vec<FeedItem>>,
        weather: Resolved<Weather>,
        status: Resolved<StatusSnapshot>,
        now: Resolved<NowPlayingState>,
    ) -> Self {
        let data_sources = DataSources {
            links: links.provenance,
            weather: weather.provenance,
            now: now.provenance,
            status: status.provenance,
        };

        Self {
            built_label: built_at.format("%Y-%m-%d %H:%M").to_string(),
            built_at,
            links: links
                .value
                .into_iter()
                .map(|item| LinkView {
                    published_label: item.published_label(),
                    item,
                })
                .collect(),
            weather: WeatherView {
                temp_label: weather.value.temp_label(),
                humidity_label: weather.value.humidity_label(),
                wind_label: weather.value.wind_label(),
                weather: weather.value,
            },
            status: StatusView {
                uptime_label: status.value.uptime_label(),
                cpu_temp_label: status.value.cpu_temp_label(),
                source: status.provenance,
                snapshot: status.value,
            },
            now: NowView::new(now),
            data_sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use portal_core::status::MetricsSource;

    #[test]
    fn test_bundle_surfaces_every_provenance() {
        let weather = Weather {
            updated_at: Utc::now(),
            temp_c: 24.0,
            humidity: 58,
            wind_kmh: 12.0,
            description: "offline cached forecast".into(),
        };
        let status = StatusSnapshot {
            generated_at: Utc::now(),
            services: Vec::new(),
            http_checks: Vec::new(),
            uptime_seconds: Some(3_600.0),
            cpu_temp_c: None,
            metrics_stale: true,
            metrics_source: MetricsSource::RemoteCache,
        };
        let link = FeedItem {
            title: "post".into(),
            url: "https://a.example/post".into(),
            source: "a".into(),
            published: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };

        let bundle = Bundle::new(
            Local::now(),
            Resolved::new(vec![link], Provenance::Stale),
            Resolved::new(weather, Provenance::Fallback),
            Resolved::new(status, Provenance::Live),
            Resolved::new(NowPlayingState::unavailable("not configured"), Provenance::Unavailable),
        );
        let json = serde_json::to_value(&bundle).unwrap();

        assert_eq!(json["data_sources"]["links"], "stale");
        assert_eq!(json["data_sources"]["weather"], "fallback");
        assert_eq!(json["data_sources"]["status"], "live");
        assert_eq!(json["data_sources"]["now"], "unavailable");
        assert_eq!(json["links"][0]["published_label"], "2024-05-01");
        assert_eq!(json["weather"]["temp_label"], "24.0°C");
        assert_eq!(json["status"]["metrics_source"], "remote_cache");
        assert_eq!(json["status"]["uptime_label"], "1h 0m");
        assert_eq!(json["now"]["available"], false);
        assert_eq!(json["now"]["source"], "unavailable");
    }

    #[test]
    fn test_now_history_rows_carry_played_label() {
        let state: NowPlayingState = serde_json::from_value(serde_json::json!({
            "available": true,
            "live": true,
            "auto_refresh": true,
            "track": "Windowlicker",
            "artist": "Aphex Twin",
            "stream_url": null,
            "started_at": "2024-05-01T11:58:00Z",
            "history": [{
                "track": "Xtal",
                "artist": "Aphex Twin",
                "url": "",
                "played_at": "2024-05-01T11:50:00Z"
            }],
            "reason": null
        }))
        .unwrap();

        let view = NowView::new(Resolved::new(state, Provenance::Live));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["live"], true);
        assert_eq!(json["source"], "live");
        assert_eq!(json["history"][0]["track"], "Xtal");
        assert_eq!(json["history"][0]["played_label"], "2024-05-01 11:50");
        assert!(json["started_label"].is_string());
    }
}
