//! Location Verification Module
//!
//! Probes configured locations against the forecast source to determine
//! which are reachable, accepted and returning data. Run this after adding
//! a location or rotating an API key, before leaving the daemon to poll.
//!
//! A probe is one fetch through the same source and validation the daemon
//! uses; nothing is reconciled or published.

use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ingest::SnapshotSource;
use crate::model::{LocationProfile, PollError};

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub source: String,
    pub results: Vec<ProfileVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub working: usize,
    pub empty: usize,
    pub failed: usize,
    pub credential_rejected: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileVerification {
    pub title: String,
    pub status: VerificationStatus,
    pub allergen_count: usize,
    pub has_risk: bool,
    pub air_metrics: Vec<String>,
    pub latency_ms: u64,
    /// Title reported upstream for the coordinates.
    pub location: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Ok,
    Empty,
    AuthError,
    ContentError,
    TransportError,
}

impl VerificationStatus {
    pub fn is_working(&self) -> bool {
        matches!(self, VerificationStatus::Ok | VerificationStatus::Empty)
    }
}

// ============================================================================
// Single profile
// ============================================================================

pub fn verify_profile(source: &dyn SnapshotSource, profile: &LocationProfile) -> ProfileVerification {
    let started = Instant::now();
    let fetched = source.fetch(profile);
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut result = ProfileVerification {
        title: profile.title.clone(),
        status: VerificationStatus::TransportError,
        allergen_count: 0,
        has_risk: false,
        air_metrics: Vec::new(),
        latency_ms,
        location: None,
        error: None,
    };

    match fetched {
        Ok(snapshot) => {
            result.allergen_count = snapshot.readings.len();
            result.has_risk = snapshot.risk.as_ref().is_some_and(|r| !r.is_empty());
            result.air_metrics = snapshot.ancillary.keys().cloned().collect();
            result.location = snapshot.location_title.clone();
            result.status = if snapshot.is_empty() {
                VerificationStatus::Empty
            } else {
                VerificationStatus::Ok
            };
        }
        Err(err) => {
            result.status = match err {
                PollError::Auth { .. } => VerificationStatus::AuthError,
                PollError::Content(_) => VerificationStatus::ContentError,
                PollError::Transport(_) | PollError::Cancelled => VerificationStatus::TransportError,
            };
            result.error = Some(err.to_string());
        }
    }

    result
}

// ============================================================================
// Full Verification Runner
// ============================================================================

pub fn verify_all(source: &dyn SnapshotSource, profiles: &[LocationProfile]) -> VerificationReport {
    let mut summary = VerificationSummary {
        total: profiles.len(),
        ..VerificationSummary::default()
    };
    let mut results = Vec::with_capacity(profiles.len());

    for profile in profiles {
        let result = verify_profile(source, profile);
        match result.status {
            VerificationStatus::Ok => {
                tracing::info!(
                    location = %profile.title,
                    allergens = result.allergen_count,
                    latency_ms = result.latency_ms,
                    "verified"
                );
                summary.working += 1;
            }
            VerificationStatus::Empty => {
                tracing::warn!(location = %profile.title, "reachable but no data for these coordinates");
                summary.working += 1;
                summary.empty += 1;
            }
            VerificationStatus::AuthError => {
                tracing::error!(location = %profile.title, "API key rejected");
                summary.failed += 1;
                summary.credential_rejected += 1;
            }
            VerificationStatus::ContentError | VerificationStatus::TransportError => {
                tracing::error!(
                    location = %profile.title,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "verification failed"
                );
                summary.failed += 1;
            }
        }
        results.push(result);
    }

    VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        source: source.name().to_string(),
        results,
        summary,
    }
}

/// Print a human-readable report summary
pub fn print_report_summary(report: &VerificationReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("VERIFICATION SUMMARY ({})", report.source);
    println!("═══════════════════════════════════════════════════════════");
    for result in &report.results {
        let marker = if result.status.is_working() { "✓" } else { "✗" };
        println!(
            "  {} {:<24} {:?} ({} allergens, {} ms)",
            marker, result.title, result.status, result.allergen_count, result.latency_ms
        );
        if let Some(error) = &result.error {
            println!("      {}", error);
        }
    }
    let s = &report.summary;
    println!("\nLocations: {}/{} working ({} empty), {} failed",
        s.working, s.total, s.empty, s.failed);
    if s.credential_rejected > 0 {
        println!("⚠ {} location(s) need a new API key", s.credential_rejected);
    }
    println!("═══════════════════════════════════════════════════════════\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AllergenReading, RawSnapshot};

    /// Answers by profile title.
    struct ByTitle;

    impl SnapshotSource for ByTitle {
        fn name(&self) -> &'static str {
            "by-title"
        }

        fn fetch(&self, profile: &LocationProfile) -> Result<RawSnapshot, PollError> {
            match profile.title.as_str() {
                "ok" => Ok(RawSnapshot {
                    location_title: Some("8010 Graz".into()),
                    readings: vec![AllergenReading {
                        label: "Birke".into(),
                        ..AllergenReading::default()
                    }],
                    ..RawSnapshot::empty()
                }),
                "empty" => Ok(RawSnapshot::empty()),
                "auth" => Err(PollError::Auth { status: 403 }),
                "content" => Err(PollError::Content("missing 'contamination' list".into())),
                _ => Err(PollError::Transport("connection refused".into())),
            }
        }
    }

    fn profile(title: &str) -> LocationProfile {
        LocationProfile {
            title: title.to_string(),
            latitude: 47.07,
            longitude: 15.44,
            country_code: "AT".to_string(),
            language_code: "de".to_string(),
            credential: "key".to_string(),
        }
    }

    #[test]
    fn test_status_per_outcome() {
        let cases = [
            ("ok", VerificationStatus::Ok),
            ("empty", VerificationStatus::Empty),
            ("auth", VerificationStatus::AuthError),
            ("content", VerificationStatus::ContentError),
            ("down", VerificationStatus::TransportError),
        ];
        for (title, expected) in cases {
            assert_eq!(verify_profile(&ByTitle, &profile(title)).status, expected, "{}", title);
        }
    }

    #[test]
    fn test_ok_result_details() {
        let result = verify_profile(&ByTitle, &profile("ok"));
        assert_eq!(result.allergen_count, 1);
        assert_eq!(result.location.as_deref(), Some("8010 Graz"));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_summary_counts() {
        let profiles: Vec<_> = ["ok", "empty", "auth", "content", "down"]
            .iter()
            .map(|t| profile(t))
            .collect();
        let report = verify_all(&ByTitle, &profiles);
        assert_eq!(
            report.summary,
            VerificationSummary {
                total: 5,
                working: 2,
                empty: 1,
                failed: 3,
                credential_rejected: 1,
            }
        );
        assert_eq!(report.source, "by-title");
        let json = serde_json::to_string(&report).expect("report serializes");
        assert!(json.contains("\"auth_error\""));
    }
}
