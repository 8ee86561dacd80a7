/// Snapshot interpretation.
///
/// Produces one [`Observation`] per quantity present in a snapshot, in a
/// fixed order: allergens in upstream order, then the daily and hourly
/// allergy risk, then air metrics sorted by name. The order is what makes
/// two identical snapshots interpret identically.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::levels::{Cadence, LevelNames, RiskScale, build_forecast};
use crate::model::{
    AllergenReading, ForecastEntry, Level, QuantityKind, QuantityValue, REFERENCE_LANGUAGE,
    RawSnapshot, RiskSeries,
};
use crate::resolve::resolve;
use crate::slug::slugify;
use crate::tables::{LevelTable, TableProvider};

/// Slug of the daily allergy risk quantity.
pub const DAILY_RISK_SLUG: &str = "allergy_risk";
/// Slug of the hourly allergy risk quantity.
pub const HOURLY_RISK_SLUG: &str = "allergy_risk_hourly";

/// One interpreted quantity, not yet assigned a unique id.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub kind: QuantityKind,
    /// Display name in the profile's language.
    pub name: String,
    pub canonical_name: String,
    pub latin_name: Option<String>,
    /// Never empty: unresolvable labels get a positional slug.
    pub slug: String,
    pub value: Option<QuantityValue>,
    pub level: Option<Level>,
    pub forecast: Vec<ForecastEntry>,
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
}

/// Everything the reconciler needs from one successful poll.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterpretedSnapshot {
    pub observations: Vec<Observation>,
    /// The response carried allergen readings or allergy risk values.
    pub has_allergen_data: bool,
    /// The response carried air metrics.
    pub has_air_data: bool,
    pub location_title: Option<String>,
    /// Labels that kept their localized name as canonical name.
    pub resolution_misses: usize,
}

impl InterpretedSnapshot {
    /// True for a structurally valid response without any content.
    pub fn is_empty(&self) -> bool {
        !self.has_allergen_data && !self.has_air_data
    }

    /// Whether this response speaks for quantities of `kind` at all.
    /// Allergen kinds follow allergen content; air metrics follow air content.
    pub fn reports(&self, kind: QuantityKind) -> bool {
        if kind.is_allergen() {
            self.has_allergen_data
        } else {
            self.has_air_data
        }
    }
}

/// Interprets snapshots for one language.
pub struct Interpreter {
    tables: Arc<dyn TableProvider>,
    language_code: String,
    reference_language: String,
    risk_scale: RiskScale,
}

impl Interpreter {
    pub fn new(tables: Arc<dyn TableProvider>, language_code: &str, risk_scale: RiskScale) -> Self {
        Self {
            tables,
            language_code: language_code.to_ascii_lowercase(),
            reference_language: REFERENCE_LANGUAGE.to_string(),
            risk_scale,
        }
    }

    /// Resolves canonical names and reference level names against
    /// `language_code` instead of English.
    pub fn with_reference_language(mut self, language_code: &str) -> Self {
        self.reference_language = language_code.to_ascii_lowercase();
        self
    }

    pub fn language_code(&self) -> &str {
        &self.language_code
    }

    pub fn interpret(&self, snapshot: &RawSnapshot, now: DateTime<Utc>) -> InterpretedSnapshot {
        let current_block = self.tables.language_block(&self.language_code);
        let reference_block = self.tables.language_block(&self.reference_language);

        let reference_levels = self.tables.level_table(&self.reference_language);
        // Languages without their own level table show reference names.
        let local_levels = self
            .tables
            .level_table(&self.language_code)
            .or_else(|| reference_levels.clone());
        let level_pair: Option<(Arc<LevelTable>, Arc<LevelTable>)> =
            match (local_levels, reference_levels) {
                (Some(local), Some(reference)) => Some((local, reference)),
                (Some(local), None) => Some((Arc::clone(&local), local)),
                _ => None,
            };
        let names = level_pair
            .as_ref()
            .map(|(local, reference)| LevelNames::new(local, reference));

        let mut observations = Vec::new();
        let mut resolution_misses = 0;

        for (position, reading) in snapshot.readings.iter().enumerate() {
            let resolution = resolve(
                &reading.label,
                current_block.as_deref(),
                reference_block.as_deref(),
            );
            if resolution.missed {
                resolution_misses += 1;
            }
            let slug = if resolution.slug.is_empty() {
                format!("allergen_{}", position + 1)
            } else {
                resolution.slug
            };
            let (value, level, forecast) = pollen_series(reading, names, now);
            observations.push(Observation {
                kind: QuantityKind::Pollen,
                name: resolution.local_name,
                canonical_name: resolution.canonical_name,
                latin_name: resolution.latin_name,
                slug,
                value,
                level,
                forecast,
                unit: None,
                device_class: None,
            });
        }

        if let Some(risk) = &snapshot.risk {
            observations.extend(self.risk_observations(risk, names, now));
        }

        for (metric, series) in &snapshot.ancillary {
            if series.is_empty() {
                continue;
            }
            let slug = slugify(metric);
            if slug.is_empty() {
                continue;
            }
            let forecast = build_forecast(series, Cadence::Daily, now, |v| {
                (QuantityValue::Measure(v), None)
            });
            let name = humanize(&slug);
            observations.push(Observation {
                kind: QuantityKind::AirQuality,
                name: name.clone(),
                canonical_name: name,
                latin_name: None,
                value: series.get(&0).copied().map(QuantityValue::Measure),
                level: None,
                forecast,
                unit: air_metric_unit(&slug),
                device_class: air_metric_class(&slug),
                slug,
            });
        }

        InterpretedSnapshot {
            observations,
            has_allergen_data: snapshot.has_allergen_data(),
            has_air_data: snapshot.has_air_data(),
            location_title: snapshot.location_title.clone(),
            resolution_misses,
        }
    }

    fn risk_observations(
        &self,
        risk: &RiskSeries,
        names: Option<LevelNames<'_>>,
        now: DateTime<Utc>,
    ) -> Vec<Observation> {
        let scale = self.risk_scale;
        let annotate = |v: f64| {
            (
                QuantityValue::Measure(v),
                names.map(|n| n.risk_level(v, scale)),
            )
        };
        let mut out = Vec::new();
        for (kind, cadence, series, slug, name) in [
            (QuantityKind::DailyRisk, Cadence::Daily, &risk.daily, DAILY_RISK_SLUG, "Allergy risk"),
            (QuantityKind::HourlyRisk, Cadence::Hourly, &risk.hourly, HOURLY_RISK_SLUG, "Allergy risk (hourly)"),
        ] {
            if series.is_empty() {
                continue;
            }
            let current = series.get(&cadence.current_offset(now)).copied();
            out.push(Observation {
                kind,
                name: name.to_string(),
                canonical_name: name.to_string(),
                latin_name: None,
                slug: slug.to_string(),
                value: current.map(QuantityValue::Measure),
                level: current.and_then(|v| names.map(|n| n.risk_level(v, scale))),
                forecast: build_forecast(series, cadence, now, annotate),
                unit: None,
                device_class: None,
            });
        }
        out
    }
}

/// Current value, level and forecast for one allergen.
///
/// Daily codes are preferred; hourly codes are used when no daily series
/// was delivered.
fn pollen_series(
    reading: &AllergenReading,
    names: Option<LevelNames<'_>>,
    now: DateTime<Utc>,
) -> (Option<QuantityValue>, Option<Level>, Vec<ForecastEntry>) {
    let (series, cadence) = if reading.daily.is_empty() {
        (&reading.hourly, Cadence::Hourly)
    } else {
        (&reading.daily, Cadence::Daily)
    };
    let current = series.get(&cadence.current_offset(now)).copied();
    let forecast = build_forecast(series, cadence, now, |code| {
        (QuantityValue::Code(code), names.map(|n| n.level(code)))
    });
    (
        current.map(QuantityValue::Code),
        current.and_then(|code| names.map(|n| n.level(code))),
        forecast,
    )
}

/// Unit of an air metric's values, when the metric has one.
pub fn air_metric_unit(slug: &str) -> Option<&'static str> {
    match slug {
        "temperature" => Some("°C"),
        _ => None,
    }
}

/// Host device class of an air metric.
pub fn air_metric_class(slug: &str) -> Option<&'static str> {
    match slug {
        "temperature" => Some("temperature"),
        "ozone" | "particulate_matter" | "sulphur_dioxide" | "nitrogen_dioxide" => Some("aqi"),
        _ => None,
    }
}

/// `"particulate_matter"` -> `"Particulate matter"`.
fn humanize(slug: &str) -> String {
    let spaced = slug.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::BundledTables;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn interpreter(language: &str) -> Interpreter {
        let tables = BundledTables::bundled().expect("bundled tables");
        Interpreter::new(Arc::new(tables), language, RiskScale::default())
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    fn reading(label: &str, codes: &[(u32, i64)]) -> AllergenReading {
        AllergenReading {
            label: label.to_string(),
            daily: codes.iter().copied().collect(),
            hourly: BTreeMap::new(),
        }
    }

    #[test]
    fn test_german_labels_resolve_to_english_slugs() {
        let snapshot = RawSnapshot {
            readings: vec![
                reading("Birke (Betula)", &[(0, 3), (1, 2)]),
                reading("Gräser", &[(0, 1)]),
            ],
            ..RawSnapshot::empty()
        };
        let out = interpreter("de").interpret(&snapshot, fixed_now());
        let slugs: Vec<&str> = out.observations.iter().map(|o| o.slug.as_str()).collect();
        assert_eq!(slugs, vec!["birch", "grasses"]);
        assert_eq!(out.observations[0].name, "Birke");
        assert_eq!(out.observations[0].canonical_name, "Birch");
        assert_eq!(out.resolution_misses, 0);
        assert!(!out.is_empty());
    }

    #[test]
    fn test_pollen_level_uses_local_and_english_names() {
        let snapshot = RawSnapshot {
            readings: vec![reading("Birke (Betula)", &[(0, 3)])],
            ..RawSnapshot::empty()
        };
        let out = interpreter("de").interpret(&snapshot, fixed_now());
        assert_eq!(out.observations[0].value, Some(QuantityValue::Code(3)));
        assert_eq!(
            out.observations[0].level,
            Some(Level::Named {
                index: 3,
                name: "hoch".into(),
                name_en: "high".into()
            })
        );
    }

    #[test]
    fn test_out_of_range_code_is_unavailable() {
        let snapshot = RawSnapshot {
            readings: vec![reading("Birke (Betula)", &[(0, 9)])],
            ..RawSnapshot::empty()
        };
        let out = interpreter("de").interpret(&snapshot, fixed_now());
        assert_eq!(out.observations[0].level, Some(Level::Unavailable { raw: 9 }));
    }

    #[test]
    fn test_unresolvable_label_keeps_local_name() {
        let snapshot = RawSnapshot {
            readings: vec![reading("Zirbe", &[(0, 1)])],
            ..RawSnapshot::empty()
        };
        let out = interpreter("de").interpret(&snapshot, fixed_now());
        assert_eq!(out.observations[0].canonical_name, "Zirbe");
        assert_eq!(out.observations[0].slug, "zirbe");
        assert_eq!(out.resolution_misses, 1);
    }

    #[test]
    fn test_empty_slug_falls_back_to_position() {
        let snapshot = RawSnapshot {
            readings: vec![
                reading("Берёза (Betula)", &[(0, 2)]),
                reading("Кипарис", &[(0, 1)]),
            ],
            ..RawSnapshot::empty()
        };
        let out = interpreter("ru").interpret(&snapshot, fixed_now());
        assert_eq!(out.observations[0].slug, "birch");
        assert_eq!(out.observations[1].slug, "allergen_2");
        assert_eq!(out.observations[1].canonical_name, "Кипарис");
    }

    #[test]
    fn test_language_without_level_table_uses_reference_names() {
        let snapshot = RawSnapshot {
            readings: vec![reading("Birch", &[(0, 2)])],
            ..RawSnapshot::empty()
        };
        let out = interpreter("xx").interpret(&snapshot, fixed_now());
        assert_eq!(out.observations[0].level.as_ref().map(Level::display_name), Some("moderate"));
    }

    #[test]
    fn test_risk_series_produce_daily_and_hourly_quantities() {
        let snapshot = RawSnapshot {
            risk: Some(RiskSeries {
                daily: BTreeMap::from([(0, 7.5), (1, 2.0)]),
                hourly: (0..24).map(|h| (h, 4.0)).collect(),
            }),
            ..RawSnapshot::empty()
        };
        let out = interpreter("en").interpret(&snapshot, fixed_now());
        assert_eq!(out.observations.len(), 2);
        let daily = &out.observations[0];
        assert_eq!(daily.kind, QuantityKind::DailyRisk);
        assert_eq!(daily.slug, DAILY_RISK_SLUG);
        assert_eq!(daily.level.as_ref().and_then(Level::index), Some(3));
        let hourly = &out.observations[1];
        assert_eq!(hourly.kind, QuantityKind::HourlyRisk);
        assert_eq!(hourly.forecast.first().map(|e| e.offset), Some(9));
    }

    #[test]
    fn test_air_metrics_are_numeric_quantities() {
        let mut snapshot = RawSnapshot::empty();
        snapshot.ancillary.insert(
            "particulate_matter".to_string(),
            BTreeMap::from([(0, 12.5), (1, 9.0)]),
        );
        let out = interpreter("en").interpret(&snapshot, fixed_now());
        let air = &out.observations[0];
        assert_eq!(air.kind, QuantityKind::AirQuality);
        assert_eq!(air.name, "Particulate matter");
        assert_eq!(air.value, Some(QuantityValue::Measure(12.5)));
        assert_eq!(air.level, None);
        assert_eq!(air.forecast.len(), 2);
        assert_eq!(air.device_class, Some("aqi"));
        assert_eq!(air.unit, None);
    }

    #[test]
    fn test_temperature_carries_celsius_unit() {
        let mut snapshot = RawSnapshot::empty();
        snapshot.ancillary.insert("temperature".to_string(), BTreeMap::from([(0, 18.5)]));
        let out = interpreter("en").interpret(&snapshot, fixed_now());
        assert_eq!(out.observations[0].unit, Some("°C"));
        assert_eq!(out.observations[0].device_class, Some("temperature"));
        assert_eq!(air_metric_class("pollen_count"), None);
    }

    #[test]
    fn test_empty_snapshot_is_flagged() {
        let out = interpreter("de").interpret(&RawSnapshot::empty(), fixed_now());
        assert!(out.is_empty());
        assert!(out.observations.is_empty());
    }

    #[test]
    fn test_air_only_snapshot_reports_air_but_not_allergens() {
        let mut snapshot = RawSnapshot::empty();
        snapshot.ancillary.insert("ozone".to_string(), BTreeMap::from([(0, 40.0)]));
        let out = interpreter("de").interpret(&snapshot, fixed_now());
        assert!(!out.is_empty());
        assert!(out.reports(QuantityKind::AirQuality));
        assert!(!out.reports(QuantityKind::Pollen));
        assert!(!out.reports(QuantityKind::DailyRisk));
    }

    #[test]
    fn test_risk_offset_past_the_calendar_does_not_panic() {
        let snapshot = RawSnapshot {
            risk: Some(RiskSeries {
                daily: BTreeMap::from([(0, 5.0), (4_000_000_000, 1.0)]),
                hourly: BTreeMap::new(),
            }),
            ..RawSnapshot::empty()
        };
        let out = interpreter("en").interpret(&snapshot, fixed_now());
        assert_eq!(out.observations.len(), 1);
        assert_eq!(out.observations[0].forecast.len(), 1);
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize("nitrogen_dioxide"), "Nitrogen dioxide");
        assert_eq!(humanize(""), "");
    }
}
