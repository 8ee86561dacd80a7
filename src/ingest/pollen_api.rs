/// Pollen forecast API client.
///
/// Retrieves allergen contamination levels, allergy risk and air-quality
/// forecasts for one coordinate from the public polleninformation.at
/// forecast endpoint.
///
/// Endpoint: https://www.polleninformation.at/api/forecast/public
///   ?country=AT&lang=de&latitude=46.628&longitude=14.309&apikey=...

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::SnapshotSource;
use crate::model::{AllergenReading, LocationProfile, PollError, RawSnapshot, RiskSeries};

pub const POLLEN_API_URL: &str = "https://www.polleninformation.at/api/forecast/public";

/// Keys of `additionalForecastData` days that are not air metrics.
const NON_METRIC_KEYS: &[&str] = &["date", "dayrisk_personalized"];

const HOURS_PER_DAY: u32 = 24;

/// Days covered by the `_1` .. `_4` keys of a forecast.
const FORECAST_DAYS: u32 = 4;

// ============================================================================
// API Response Structures
// ============================================================================

/// Forecast response body.
#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    pub contamination: Vec<ContaminationEntry>,
    #[serde(default)]
    pub locationtitle: Option<String>,
    /// `allergyrisk_1` .. `allergyrisk_4`: one continuous value per day.
    #[serde(default)]
    pub allergyrisk: Option<BTreeMap<String, Value>>,
    /// `allergyrisk_hourly_1` .. `_4`: 24 continuous values per day.
    #[serde(default)]
    pub allergyrisk_hourly: Option<BTreeMap<String, Value>>,
    #[serde(default, rename = "additionalForecastData")]
    pub additional_forecast_data: Option<Vec<BTreeMap<String, Value>>>,
}

/// One allergen with up to four daily severity codes.
#[derive(Debug, Deserialize)]
pub struct ContaminationEntry {
    #[serde(default)]
    pub poll_title: String,
    #[serde(default)]
    pub contamination_1: Option<Value>,
    #[serde(default)]
    pub contamination_2: Option<Value>,
    #[serde(default)]
    pub contamination_3: Option<Value>,
    #[serde(default)]
    pub contamination_4: Option<Value>,
}

// ============================================================================
// URL construction
// ============================================================================

/// Builds the forecast URL for a profile.
pub fn build_forecast_url(base_url: &str, profile: &LocationProfile) -> Result<Url, PollError> {
    let latitude = profile.latitude.to_string();
    let longitude = profile.longitude.to_string();
    Url::parse_with_params(
        base_url,
        &[
            ("country", profile.country_code.as_str()),
            ("lang", profile.language_code.as_str()),
            ("latitude", latitude.as_str()),
            ("longitude", longitude.as_str()),
            ("apikey", profile.credential.as_str()),
        ],
    )
    .map_err(|e| PollError::Transport(format!("invalid API base URL '{}': {}", base_url, e)))
}

/// The URL with the `apikey` value masked, for log output.
pub fn redact_url(url: &Url) -> String {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "apikey" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

// ============================================================================
// API Client
// ============================================================================

/// Blocking HTTP client for the forecast endpoint.
pub struct PollenApiClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl PollenApiClient {
    /// Creates a client with a bounded per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PollError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("polmon_service/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PollError::Transport(format!("could not build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            timeout,
        })
    }

    /// Fetches and validates the forecast for `profile`.
    ///
    /// # Returns
    /// The parsed snapshot, possibly empty. Errors are classified:
    /// 401/403 as `Auth`, other non-2xx and network failures as
    /// `Transport`, malformed bodies as `Content`.
    pub fn fetch_forecast(&self, profile: &LocationProfile) -> Result<RawSnapshot, PollError> {
        let url = build_forecast_url(&self.base_url, profile)?;
        tracing::debug!(url = %redact_url(&url), "requesting pollen forecast");

        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(PollError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(PollError::Transport(format!("HTTP error: {}", status.as_u16())));
        }

        let body = response.text().map_err(|e| self.transport_error(e))?;
        parse_forecast_body(&body)
    }

    fn transport_error(&self, err: reqwest::Error) -> PollError {
        if err.is_timeout() {
            PollError::Transport(format!("request timed out after {}s", self.timeout.as_secs()))
        } else {
            // The URL carries the credential.
            PollError::Transport(err.without_url().to_string())
        }
    }
}

impl SnapshotSource for PollenApiClient {
    fn name(&self) -> &'static str {
        "pollen-api"
    }

    fn fetch(&self, profile: &LocationProfile) -> Result<RawSnapshot, PollError> {
        self.fetch_forecast(profile)
    }
}

// ============================================================================
// Body parsing
// ============================================================================

/// Validates a response body and converts it into a snapshot.
///
/// The body must be a JSON object without an `error` key and with a
/// `contamination` array. Legacy responses wrapped in `{"result": {...}}`
/// are unwrapped first. An empty `contamination` array is a valid, empty
/// answer.
pub fn parse_forecast_body(body: &str) -> Result<RawSnapshot, PollError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| PollError::Content(format!("response is not JSON: {}", e)))?;

    let mut object = match value {
        Value::Object(map) => map,
        other => {
            return Err(PollError::Content(format!(
                "expected a JSON object, got {}",
                json_type(&other)
            )));
        }
    };

    if !object.contains_key("contamination") {
        if let Some(Value::Object(inner)) = object.remove("result") {
            object = inner;
        }
    }

    if let Some(err) = object.get("error") {
        let message = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
        return Err(PollError::Content(format!("upstream reported error: {}", message)));
    }

    match object.get("contamination") {
        Some(Value::Array(_)) => {}
        Some(other) => {
            return Err(PollError::Content(format!(
                "'contamination' must be a list, got {}",
                json_type(other)
            )));
        }
        None => return Err(PollError::Content("missing 'contamination' list".to_string())),
    }

    let response: ForecastResponse = serde_json::from_value(Value::Object(object))
        .map_err(|e| PollError::Content(format!("unexpected response shape: {}", e)))?;

    Ok(snapshot_from_response(response))
}

fn snapshot_from_response(response: ForecastResponse) -> RawSnapshot {
    let readings = response
        .contamination
        .into_iter()
        .map(|entry| {
            let daily = [
                entry.contamination_1,
                entry.contamination_2,
                entry.contamination_3,
                entry.contamination_4,
            ]
            .into_iter()
            .enumerate()
            .filter_map(|(day, raw)| {
                let code = raw.as_ref().and_then(severity_code)?;
                Some((day as u32, code))
            })
            .collect();
            AllergenReading {
                label: entry.poll_title,
                daily,
                hourly: BTreeMap::new(),
            }
        })
        .collect();

    let mut risk = RiskSeries::default();
    for (key, raw) in response.allergyrisk.iter().flatten() {
        if let (Some(day), Some(value)) = (day_suffix(key), numeric(raw)) {
            risk.daily.insert(day, value);
        }
    }
    for (key, raw) in response.allergyrisk_hourly.iter().flatten() {
        let (Some(day), Some(hours)) = (day_suffix(key), raw.as_array()) else {
            continue;
        };
        for (hour, raw_value) in (0..HOURS_PER_DAY).zip(hours) {
            let offset = day
                .checked_mul(HOURS_PER_DAY)
                .and_then(|start| start.checked_add(hour));
            if let (Some(offset), Some(value)) = (offset, numeric(raw_value)) {
                risk.hourly.insert(offset, value);
            }
        }
    }

    let mut ancillary: BTreeMap<String, BTreeMap<u32, f64>> = BTreeMap::new();
    for (day, metrics) in response.additional_forecast_data.iter().flatten().enumerate() {
        for (key, raw) in metrics {
            if NON_METRIC_KEYS.contains(&key.as_str()) {
                continue;
            }
            if let Some(value) = numeric(raw) {
                ancillary.entry(key.clone()).or_default().insert(day as u32, value);
            }
        }
    }

    RawSnapshot {
        location_title: response.locationtitle.filter(|t| !t.trim().is_empty()),
        readings,
        risk: (!risk.is_empty()).then_some(risk),
        ancillary,
    }
}

/// Day offset from a `..._N` key, where N counts from 1. Keys beyond the
/// forecast window are ignored.
fn day_suffix(key: &str) -> Option<u32> {
    let n: u32 = key.rsplit('_').next()?.parse().ok()?;
    (1..=FORECAST_DAYS).contains(&n).then(|| n - 1)
}

/// Integral severity code from a number, integral float or numeric string.
fn severity_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    let parsed: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Tests
// ============================================================================
