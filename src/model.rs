/// Core data types for the pollen monitoring service.
///
/// This module defines the shared domain model imported by all other modules:
/// the location profile a tracking session runs against, the verbatim
/// snapshot of one poll, the tracked quantities handed to the host, and the
/// poll error taxonomy. It contains no I/O.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::slug::slugify;

/// Language whose allergen names act as the canonical identity.
pub const REFERENCE_LANGUAGE: &str = "en";

/// Display name used when a severity code falls outside the level table.
pub const UNAVAILABLE: &str = "unavailable";

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// One configured tracking location. Immutable once a session starts.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationProfile {
    /// Human-facing title, e.g. "Klagenfurt".
    pub title: String,
    /// WGS84 latitude.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
    /// ISO 3166-1 alpha-2 country code, upper case.
    pub country_code: String,
    /// ISO 639-1 language code used for upstream labels.
    pub language_code: String,
    /// Upstream API key. Never serialized, never logged.
    #[serde(skip_serializing, default)]
    pub credential: String,
}

impl LocationProfile {
    /// Location identity used as the prefix of every unique id.
    ///
    /// Falls back to the formatted coordinates when the title slugs to
    /// nothing (e.g. a title written entirely in a non-Latin script).
    pub fn location_key(&self) -> String {
        location_key(&self.title, self.latitude, self.longitude)
    }
}

/// Slug of `title`, or of the coordinates when the title slugs to nothing.
pub fn location_key(title: &str, latitude: f64, longitude: f64) -> String {
    let from_title = slugify(title);
    if !from_title.is_empty() {
        return from_title;
    }
    slugify(&format!("{:.4} {:.4}", latitude, longitude))
}

impl fmt::Debug for LocationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationProfile")
            .field("title", &self.title)
            .field("latitude", &self.latitude)
            .field("longitude", &self.longitude)
            .field("country_code", &self.country_code)
            .field("language_code", &self.language_code)
            .field("credential", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// One allergen entry as delivered upstream.
///
/// `label` is free text in the profile's language, possibly of the form
/// "Name (Latin)". Codes are keyed by day offset (0 = today) or by hour
/// offset from the reference midnight.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AllergenReading {
    pub label: String,
    pub daily: BTreeMap<u32, i64>,
    pub hourly: BTreeMap<u32, i64>,
}

/// Continuous allergy risk values, observed range roughly 0..10.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RiskSeries {
    pub daily: BTreeMap<u32, f64>,
    pub hourly: BTreeMap<u32, f64>,
}

impl RiskSeries {
    pub fn is_empty(&self) -> bool {
        self.daily.is_empty() && self.hourly.is_empty()
    }
}

/// The verbatim content of one successful poll.
///
/// An empty snapshot is a valid upstream answer ("nothing to report here
/// now") and is distinct from the absence of a snapshot after a failure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSnapshot {
    /// Upstream place title, e.g. "9020 Klagenfurt".
    pub location_title: Option<String>,
    pub readings: Vec<AllergenReading>,
    pub risk: Option<RiskSeries>,
    /// Ancillary air metrics: metric name -> day offset -> value.
    pub ancillary: BTreeMap<String, BTreeMap<u32, f64>>,
}

impl RawSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when the snapshot carries no allergen, risk or air data at all.
    pub fn is_empty(&self) -> bool {
        !self.has_allergen_data() && !self.has_air_data()
    }

    /// Any allergen reading or allergy risk value.
    pub fn has_allergen_data(&self) -> bool {
        !self.readings.is_empty() || self.risk.as_ref().is_some_and(|r| !r.is_empty())
    }

    pub fn has_air_data(&self) -> bool {
        self.ancillary.values().any(|series| !series.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tracked quantities
// ---------------------------------------------------------------------------

/// What a tracked quantity measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityKind {
    Pollen,
    DailyRisk,
    HourlyRisk,
    AirQuality,
}

impl QuantityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantityKind::Pollen => "pollen",
            QuantityKind::DailyRisk => "daily_risk",
            QuantityKind::HourlyRisk => "hourly_risk",
            QuantityKind::AirQuality => "air_quality",
        }
    }

    /// Pollen and allergy risk quantities, as opposed to air metrics.
    pub fn is_allergen(&self) -> bool {
        !matches!(self, QuantityKind::AirQuality)
    }
}

impl fmt::Display for QuantityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A severity level resolved against a level table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Level {
    /// Index 0..=4 with its localized and reference-language names.
    Named { index: u8, name: String, name_en: String },
    /// The raw code was outside the table; surfaced rather than clamped.
    Unavailable { raw: i64 },
}

impl Level {
    pub fn display_name(&self) -> &str {
        match self {
            Level::Named { name, .. } => name,
            Level::Unavailable { .. } => UNAVAILABLE,
        }
    }

    pub fn index(&self) -> Option<u8> {
        match self {
            Level::Named { index, .. } => Some(*index),
            Level::Unavailable { .. } => None,
        }
    }
}

/// The raw value behind a quantity: a discrete code or a continuous measure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QuantityValue {
    Code(i64),
    Measure(f64),
}

/// One step of a forecast sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastEntry {
    pub time: DateTime<Utc>,
    /// Day offset for daily series, hour offset for hourly series.
    pub offset: u32,
    pub value: QuantityValue,
    pub level: Option<Level>,
}

/// A named data point exposed to the host framework.
///
/// While `is_stale` is set, `value`, `level` and `forecast` are cleared and
/// `stale_since` records when staleness first began.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedQuantity {
    pub unique_id: String,
    pub kind: QuantityKind,
    /// Display name in the profile's language.
    pub name: String,
    pub canonical_name: String,
    pub latin_name: Option<String>,
    pub slug: String,
    pub value: Option<QuantityValue>,
    pub level: Option<Level>,
    pub forecast: Vec<ForecastEntry>,
    /// Unit of a numeric value, e.g. "°C". Severity levels have none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    /// Host-side device class of an air metric, e.g. "aqi".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    pub is_stale: bool,
    pub stale_since: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors a poll can end with. None of them is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// Connection failure, timeout, or a non-2xx status other than 401/403.
    #[error("transport error: {0}")]
    Transport(String),
    /// The upstream rejected the credential.
    #[error("credential rejected (HTTP {status})")]
    Auth { status: u16 },
    /// 2xx response whose body is not the expected JSON shape.
    #[error("content error: {0}")]
    Content(String),
    /// The profile was torn down while the fetch was in flight.
    #[error("poll cancelled")]
    Cancelled,
}

/// Copyable classification of a [`PollError`] for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transport,
    Auth,
    Content,
    Cancelled,
}

impl PollError {
    pub fn kind(&self) -> ErrorClass {
        match self {
            PollError::Transport(_) => ErrorClass::Transport,
            PollError::Auth { .. } => ErrorClass::Auth,
            PollError::Content(_) => ErrorClass::Content,
            PollError::Cancelled => ErrorClass::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(title: &str) -> LocationProfile {
        LocationProfile {
            title: title.to_string(),
            latitude: 46.628,
            longitude: 14.309,
            country_code: "AT".to_string(),
            language_code: "de".to_string(),
            credential: "secret-key".to_string(),
        }
    }

    #[test]
    fn test_location_key_uses_title_slug() {
        assert_eq!(profile("Klagenfurt am Wörthersee").location_key(), "klagenfurt_am_worthersee");
    }

    #[test]
    fn test_location_key_falls_back_to_coordinates() {
        assert_eq!(profile("Киев").location_key(), "46_6280_14_3090");
    }

    #[test]
    fn test_debug_output_redacts_credential() {
        let rendered = format!("{:?}", profile("Wien"));
        assert!(!rendered.contains("secret-key"), "credential leaked: {}", rendered);
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_credential_is_not_serialized() {
        let json = serde_json::to_string(&profile("Wien")).expect("profile serializes");
        assert!(!json.contains("secret-key"));
    }

    #[test]
    fn test_snapshot_with_only_air_data_is_not_empty() {
        let mut snapshot = RawSnapshot::empty();
        assert!(snapshot.is_empty());
        snapshot
            .ancillary
            .insert("ozone".to_string(), BTreeMap::from([(0, 42.0)]));
        assert!(!snapshot.is_empty());
        assert!(snapshot.has_air_data());
        assert!(!snapshot.has_allergen_data());
    }

    #[test]
    fn test_snapshot_with_empty_risk_series_is_empty() {
        let snapshot = RawSnapshot {
            risk: Some(RiskSeries::default()),
            ..RawSnapshot::empty()
        };
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_poll_error_display_and_kind() {
        let err = PollError::Auth { status: 401 };
        assert_eq!(err.to_string(), "credential rejected (HTTP 401)");
        assert_eq!(err.kind(), ErrorClass::Auth);
        assert_eq!(PollError::Transport("timed out".into()).kind(), ErrorClass::Transport);
    }

    #[test]
    fn test_level_display_name_for_unavailable() {
        assert_eq!(Level::Unavailable { raw: 7 }.display_name(), UNAVAILABLE);
        assert_eq!(Level::Unavailable { raw: 7 }.index(), None);
    }
}
