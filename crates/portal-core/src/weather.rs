//! Current conditions from Open-Meteo.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use crate::cache::{Provenance, Resolved};
use crate::config::{Config, SiteConfig};
use crate::dates;
use crate::error::FetchError;
use crate::http;
use crate::source::DataSource;

pub const CACHE_KEY: &str = "weather";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code";
const TIMEOUT: Duration = Duration::from_secs(6);

/// WMO weather interpretation codes.
const WEATHER_CODES: &[(i64, &str)] = &[
    (0, "clear"),
    (1, "mostly clear"),
    (2, "partly cloudy"),
    (3, "overcast"),
    (45, "fog"),
    (48, "depositing rime fog"),
    (51, "light drizzle"),
    (53, "drizzle"),
    (55, "dense drizzle"),
    (61, "light rain"),
    (63, "rain"),
    (65, "heavy rain"),
    (71, "light snow"),
    (73, "snow"),
    (75, "heavy snow"),
    (80, "rain showers"),
    (81, "rain showers"),
    (82, "violent rain showers"),
    (95, "thunderstorm"),
];

pub fn describe(code: i64) -> &'static str {
    WEATHER_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, d)| *d)
        .unwrap_or("unknown")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub updated_at: DateTime<Utc>,
    pub temp_c: f64,
    pub humidity: i64,
    pub wind_kmh: f64,
    pub description: String,
}

impl Weather {
    pub fn temp_label(&self) -> String {
        format!("{:.1}°C", self.temp_c)
    }

    pub fn humidity_label(&self) -> String {
        format!("{}%", self.humidity)
    }

    pub fn wind_label(&self) -> String {
        format!("{:.0} km/h", self.wind_kmh)
    }

    /// Lenient: missing numbers become zero, like the upstream defaults.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let obj = payload.as_object()?;
        Some(Self {
            updated_at: obj
                .get("updated_at")
                .and_then(dates::parse_timestamp)
                .unwrap_or_else(Utc::now),
            temp_c: obj.get("temp_c").and_then(Value::as_f64).unwrap_or(0.0),
            humidity: obj
                .get("humidity")
                .and_then(Value::as_f64)
                .map(|h| h.round() as i64)
                .unwrap_or(0),
            wind_kmh: obj.get("wind_kmh").and_then(Value::as_f64).unwrap_or(0.0),
            description: obj
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        })
    }
}

/// Reduce an Open-Meteo response to the cached payload shape.
pub fn condense_forecast(response: &Value) -> Result<Value, FetchError> {
    let current = response
        .get("current")
        .and_then(Value::as_object)
        .ok_or_else(|| FetchError::Parse("forecast has no `current` block".into()))?;

    let number = |field: &str| current.get(field).and_then(Value::as_f64).unwrap_or(0.0);
    let code = number("weather_code") as i64;
    let humidity = number("relative_humidity_2m").round() as i64;
    Ok(json!({
        "updated_at": Utc::now().to_rfc3339(),
        "temp_c": number("temperature_2m"),
        "humidity": humidity,
        "wind_kmh": number("wind_speed_10m"),
        "description": describe(code),
    }))
}

fn offline_forecast() -> Weather {
    Weather {
        updated_at: Utc::now(),
        temp_c: 24.0,
        humidity: 58,
        wind_kmh: 12.0,
        description: "offline cached forecast".to_string(),
    }
}

pub struct WeatherSource {
    site: SiteConfig,
    ttl_secs: i64,
    endpoint: String,
}

impl WeatherSource {
    pub fn new(config: &Config) -> Self {
        Self {
            site: config.site.clone(),
            ttl_secs: config.weather_ttl_secs(),
            endpoint: FORECAST_URL.to_string(),
        }
    }

    /// Point at a different forecast endpoint (tests, mirrors).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl DataSource for WeatherSource {
    type Data = Weather;

    fn key(&self) -> &'static str {
        CACHE_KEY
    }

    fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    async fn fetch(&self) -> Result<Value, FetchError> {
        let client = http::build_client(TIMEOUT)?;
        let url = forecast_url(&self.endpoint, &self.site)?;
        let response = http::get_json(&client, url.as_str()).await?;
        let payload = condense_forecast(&response)?;
        info!(description = ?payload.get("description"), "weather fetched");
        Ok(payload)
    }

    fn normalize(&self, payload: &Value) -> Option<Weather> {
        Weather::from_payload(payload)
    }

    fn fallback(&self) -> Resolved<Weather> {
        Resolved::new(offline_forecast(), Provenance::Fallback)
    }
}

/// Open-Meteo request URL for the site's coordinates.
fn forecast_url(endpoint: &str, site: &SiteConfig) -> Result<Url, FetchError> {
    Url::parse_with_params(
        endpoint,
        &[
            ("latitude", site.latitude.to_string()),
            ("longitude", site.longitude.to_string()),
            ("current", CURRENT_FIELDS.to_string()),
            ("timezone", site.timezone.clone()),
        ],
    )
    .map_err(|e| FetchError::Parse(format!("bad weather endpoint {endpoint:?}: {e}")))
}
