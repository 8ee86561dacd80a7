//! Severity levels and forecast sequences.
//!
//! Two numeric domains arrive from upstream:
//!   - discrete codes 0..=4, used directly as an index into a level table;
//!   - continuous risk values (observed range about 0..10), scaled onto the
//!     same five levels by a configurable divisor.
//!
//! Out-of-range results are reported as [`Level::Unavailable`] so upstream
//! anomalies stay visible instead of being clamped away.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::model::{ForecastEntry, Level, QuantityValue};
use crate::tables::LevelTable;

/// Divisor mapping the continuous risk range onto five levels.
///
/// The upstream API does not document the range of its risk values; 2.5
/// assumes 0..10. Override through `service.risk_scale_divisor`.
pub const DEFAULT_RISK_DIVISOR: f64 = 2.5;

/// Scaling of continuous risk values onto level indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskScale {
    pub divisor: f64,
}

impl Default for RiskScale {
    fn default() -> Self {
        Self {
            divisor: DEFAULT_RISK_DIVISOR,
        }
    }
}

impl RiskScale {
    pub fn new(divisor: f64) -> Self {
        Self { divisor }
    }

    /// `round(value / divisor)`. Non-finite input scales to -1, which no
    /// level table accepts.
    pub fn scale(&self, value: f64) -> i64 {
        let scaled = (value / self.divisor).round();
        if scaled.is_finite() { scaled as i64 } else { -1 }
    }
}

/// Scales a risk value with the default divisor.
pub fn scale_risk(value: f64) -> i64 {
    RiskScale::default().scale(value)
}

// ---------------------------------------------------------------------------
// Level lookup
// ---------------------------------------------------------------------------

/// A localized level table paired with the reference-language table.
#[derive(Debug, Clone, Copy)]
pub struct LevelNames<'a> {
    pub local: &'a LevelTable,
    pub reference: &'a LevelTable,
}

impl<'a> LevelNames<'a> {
    pub fn new(local: &'a LevelTable, reference: &'a LevelTable) -> Self {
        Self { local, reference }
    }

    /// Level for a discrete code.
    pub fn level(&self, code: i64) -> Level {
        match (self.local.name(code), self.reference.name(code)) {
            (Some(name), Some(name_en)) => Level::Named {
                // name() only succeeds for 0..=4
                index: code as u8,
                name: name.to_string(),
                name_en: name_en.to_string(),
            },
            _ => Level::Unavailable { raw: code },
        }
    }

    /// Level for a continuous risk value.
    pub fn risk_level(&self, value: f64, scale: RiskScale) -> Level {
        self.level(scale.scale(value))
    }
}

// ---------------------------------------------------------------------------
// Forecast sequences
// ---------------------------------------------------------------------------

/// Whether series offsets count days or hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily,
    Hourly,
}

impl Cadence {
    /// Offset of "now" within a series of this cadence.
    pub fn current_offset(&self, now: DateTime<Utc>) -> u32 {
        match self {
            Cadence::Daily => 0,
            Cadence::Hourly => now.hour(),
        }
    }

    /// `reference_midnight + offset` in days or hours, or `None` when the
    /// result is outside the representable calendar.
    pub fn time_at(&self, reference_midnight: DateTime<Utc>, offset: u32) -> Option<DateTime<Utc>> {
        let step = match self {
            Cadence::Daily => Duration::try_days(i64::from(offset))?,
            Cadence::Hourly => Duration::try_hours(i64::from(offset))?,
        };
        reference_midnight.checked_add_signed(step)
    }
}

/// Midnight (UTC) of the day containing `now`.
pub fn reference_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// Builds a forecast from a series keyed by offset.
///
/// Offsets before the current one (earlier hours of today) are dropped, so
/// the first entry is "today" or "this hour" when present. Missing offsets
/// are omitted, never interpolated, and so are offsets that fall off the
/// calendar. `annotate` turns a raw series value into the entry's value and
/// optional level.
pub fn build_forecast<T, F>(
    series: &BTreeMap<u32, T>,
    cadence: Cadence,
    now: DateTime<Utc>,
    annotate: F,
) -> Vec<ForecastEntry>
where
    T: Copy,
    F: Fn(T) -> (QuantityValue, Option<Level>),
{
    let midnight = reference_midnight(now);
    let first = cadence.current_offset(now);
    series
        .range(first..)
        .filter_map(|(&offset, &raw)| {
            let time = cadence.time_at(midnight, offset)?;
            let (value, level) = annotate(raw);
            Some(ForecastEntry {
                time,
                offset,
                value,
                level,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn english() -> LevelTable {
        LevelTable::new(
            "en",
            ["none", "low", "moderate", "high", "very high"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .expect("five names")
    }

    fn swedish() -> LevelTable {
        LevelTable::new(
            "sv",
            ["ingen", "låg", "måttlig", "hög", "mycket hög"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .expect("five names")
    }

    /// A fixed "now" used across tests: 2024-05-01 13:25:00 UTC.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 25, 0).unwrap()
    }

    #[test]
    fn test_scale_risk_reference_points() {
        assert_eq!(scale_risk(7.5), 3);
        assert_eq!(scale_risk(0.0), 0);
        assert_eq!(scale_risk(12.0), 5);
        assert_eq!(scale_risk(10.0), 4);
        assert_eq!(scale_risk(1.2), 0);
        assert_eq!(scale_risk(1.3), 1);
    }

    #[test]
    fn test_scale_risk_non_finite_is_out_of_range() {
        assert_eq!(scale_risk(f64::NAN), -1);
        assert_eq!(scale_risk(f64::INFINITY), -1);
    }

    #[test]
    fn test_custom_divisor() {
        assert_eq!(RiskScale::new(1.0).scale(3.4), 3);
        assert_eq!(RiskScale::new(25.0).scale(100.0), 4);
    }

    #[test]
    fn test_level_names_both_languages() {
        let (sv, en) = (swedish(), english());
        let names = LevelNames::new(&sv, &en);
        assert_eq!(
            names.level(3),
            Level::Named {
                index: 3,
                name: "hög".into(),
                name_en: "high".into()
            }
        );
    }

    #[test]
    fn test_out_of_range_code_is_unavailable() {
        let en = english();
        let names = LevelNames::new(&en, &en);
        assert_eq!(names.level(5), Level::Unavailable { raw: 5 });
        assert_eq!(names.level(-2), Level::Unavailable { raw: -2 });
    }

    #[test]
    fn test_risk_above_range_is_unavailable_not_clamped() {
        let en = english();
        let names = LevelNames::new(&en, &en);
        assert_eq!(names.risk_level(12.0, RiskScale::default()), Level::Unavailable { raw: 5 });
        assert_eq!(names.risk_level(7.5, RiskScale::default()).index(), Some(3));
    }

    #[test]
    fn test_reference_midnight() {
        assert_eq!(
            reference_midnight(fixed_now()),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_daily_forecast_is_ordered_and_skips_missing_days() {
        let series = BTreeMap::from([(3u32, 1i64), (0, 2), (1, 4)]);
        let forecast = build_forecast(&series, Cadence::Daily, fixed_now(), |code| {
            (QuantityValue::Code(code), None)
        });
        let offsets: Vec<u32> = forecast.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 1, 3]);
        assert_eq!(forecast[0].time, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert_eq!(forecast[2].time, Utc.with_ymd_and_hms(2024, 5, 4, 0, 0, 0).unwrap());
        assert_eq!(forecast[1].value, QuantityValue::Code(4));
    }

    #[test]
    fn test_hourly_forecast_starts_at_this_hour() {
        let series: BTreeMap<u32, f64> = (0..30).map(|h| (h, f64::from(h) / 10.0)).collect();
        let forecast = build_forecast(&series, Cadence::Hourly, fixed_now(), |v| {
            (QuantityValue::Measure(v), None)
        });
        assert_eq!(forecast.first().map(|e| e.offset), Some(13));
        assert_eq!(forecast.len(), 17);
        assert_eq!(forecast[0].time, Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap());
        assert_eq!(
            forecast.last().map(|e| e.time),
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 5, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_offsets_past_the_calendar_are_dropped() {
        assert_eq!(Cadence::Daily.time_at(fixed_now(), 4_000_000_000), None);
        let series = BTreeMap::from([(0u32, 2i64), (4_000_000_000, 1)]);
        let forecast = build_forecast(&series, Cadence::Daily, fixed_now(), |code| {
            (QuantityValue::Code(code), None)
        });
        assert_eq!(forecast.len(), 1);
        assert_eq!(forecast[0].offset, 0);
    }

    #[test]
    fn test_empty_series_yields_empty_forecast() {
        let series: BTreeMap<u32, i64> = BTreeMap::new();
        assert!(build_forecast(&series, Cadence::Daily, fixed_now(), |c| (QuantityValue::Code(c), None)).is_empty());
    }
}
