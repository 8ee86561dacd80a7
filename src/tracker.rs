/// Per-location tracking session.
///
/// A `LocationTracker` owns everything one configured location needs across
/// cycles: its poller (and last good snapshot), its interpreter, and its
/// reconciler (registry plus last output). `run_cycle` is the single
/// poll → interpret → reconcile → publish sequence.
///
/// Readers never touch the tracker itself. They hold a [`ViewHandle`] and
/// get an immutable `Arc<TrackerView>` that is swapped in whole at the end
/// of each committed cycle.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::Interpreter;
use crate::ingest::SnapshotSource;
use crate::levels::RiskScale;
use crate::logging::{DataSource, log_cycle_summary, log_poll_failure};
use crate::model::{ErrorClass, LocationProfile, PollError, TrackedQuantity};
use crate::poller::{CancelToken, PollStatus, Poller};
use crate::reconcile::{CycleSummary, Reconciler};
use crate::slug::split_location;
use crate::tables::TableProvider;

// ---------------------------------------------------------------------------
// Published view
// ---------------------------------------------------------------------------

/// Read-only state of one location after its latest committed cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerView {
    pub location_key: String,
    /// Configured title.
    pub title: String,
    /// Title reported upstream, e.g. "9020 Klagenfurt".
    pub location_title: Option<String>,
    pub zip: Option<String>,
    pub place: Option<String>,
    pub quantities: Vec<TrackedQuantity>,
    /// Whether the most recent poll succeeded.
    pub update_success: bool,
    /// Time of the most recent successful poll.
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorClass>,
    /// Set after a credential rejection, cleared by the next success.
    pub needs_credential: bool,
    pub cycles: u64,
    pub last_summary: CycleSummary,
}

/// Cheap, cloneable access to the latest published view.
#[derive(Debug, Clone, Default)]
pub struct ViewHandle {
    inner: Arc<RwLock<Arc<TrackerView>>>,
}

impl ViewHandle {
    fn new(view: TrackerView) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(view))),
        }
    }

    pub fn current(&self) -> Arc<TrackerView> {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    fn publish(&self, view: TrackerView) -> Arc<TrackerView> {
        let view = Arc::new(view);
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::clone(&view);
        view
    }
}

/// Pretty JSON array of views, as printed by a one-shot run.
pub fn views_to_json(views: &[Arc<TrackerView>]) -> serde_json::Result<String> {
    let views: Vec<&TrackerView> = views.iter().map(Arc::as_ref).collect();
    serde_json::to_string_pretty(&views)
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub struct LocationTracker {
    profile: LocationProfile,
    location_key: String,
    poller: Poller,
    interpreter: Interpreter,
    reconciler: Reconciler,
    cancel: CancelToken,
    view: ViewHandle,
}

impl LocationTracker {
    pub fn new(
        profile: LocationProfile,
        source: Arc<dyn SnapshotSource>,
        tables: Arc<dyn TableProvider>,
        risk_scale: RiskScale,
    ) -> Self {
        let location_key = profile.location_key();
        let cancel = CancelToken::new();
        let interpreter = Interpreter::new(tables, &profile.language_code, risk_scale);
        let view = ViewHandle::new(TrackerView {
            location_key: location_key.clone(),
            title: profile.title.clone(),
            ..TrackerView::default()
        });
        Self {
            poller: Poller::new(source, cancel.clone()),
            reconciler: Reconciler::new(location_key.clone()),
            location_key,
            profile,
            interpreter,
            cancel,
            view,
        }
    }

    /// Replaces the interpreter's reference language.
    pub fn with_reference_language(mut self, language_code: &str) -> Self {
        self.interpreter = self.interpreter.with_reference_language(language_code);
        self
    }

    pub fn profile(&self) -> &LocationProfile {
        &self.profile
    }

    pub fn location_key(&self) -> &str {
        &self.location_key
    }

    pub fn view_handle(&self) -> ViewHandle {
        self.view.clone()
    }

    pub fn view(&self) -> Arc<TrackerView> {
        self.view.current()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Host purge of an id. The published view drops it immediately.
    pub fn forget(&mut self, id: &str) -> bool {
        if !self.reconciler.forget(id) {
            return false;
        }
        let mut view = TrackerView::clone(&self.view.current());
        view.quantities.retain(|q| q.unique_id != id);
        self.view.publish(view);
        true
    }

    /// Runs one cycle and publishes its view.
    ///
    /// A cycle cancelled before or during the fetch commits nothing and
    /// returns the view that was already published.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Arc<TrackerView> {
        let source = DataSource::from_source_name(self.poller.source_name());
        let poll = self.poller.poll(&self.profile);

        if poll.is_cancelled() {
            tracing::debug!(location = %self.profile.title, "cycle cancelled, nothing committed");
            return self.view.current();
        }

        if let PollStatus::Failed(err) = &poll.status {
            log_poll_failure(source, &self.profile.title, "forecast poll", err);
        }

        // A failed poll hands back the last good snapshot, but reconciling
        // it again would turn a transport error into a state change.
        let interpreted = match poll.status {
            PollStatus::Failed(_) => None,
            _ => poll
                .snapshot
                .as_deref()
                .map(|snapshot| self.interpreter.interpret(snapshot, now)),
        };

        let result = self
            .reconciler
            .reconcile(interpreted.as_ref(), poll.succeeded, now);
        log_cycle_summary(&self.profile.title, &result.summary);

        let previous = self.view.current();
        let location_title = interpreted
            .as_ref()
            .and_then(|s| s.location_title.clone())
            .or_else(|| previous.location_title.clone());
        let (zip, place) = match location_title.as_deref() {
            Some(title) => {
                let (zip, place) = split_location(title);
                (non_empty(zip), non_empty(place))
            }
            None => (None, None),
        };

        let error = poll.error();
        let needs_credential = match error {
            Some(PollError::Auth { .. }) => true,
            Some(_) => previous.needs_credential,
            None => false,
        };

        self.view.publish(TrackerView {
            location_key: self.location_key.clone(),
            title: self.profile.title.clone(),
            location_title,
            zip,
            place,
            quantities: result.quantities,
            update_success: poll.succeeded,
            last_updated: if poll.succeeded { Some(now) } else { previous.last_updated },
            last_error: error.map(PollError::kind),
            needs_credential,
            cycles: previous.cycles + 1,
            last_summary: result.summary,
        })
    }
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::{Duration, TimeZone};

    use crate::model::{AllergenReading, RawSnapshot};
    use crate::tables::BundledTables;

    struct ScriptedSource {
        results: Mutex<VecDeque<Result<RawSnapshot, PollError>>>,
    }

    impl SnapshotSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn fetch(&self, _profile: &LocationProfile) -> Result<RawSnapshot, PollError> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(PollError::Transport("script exhausted".into())))
        }
    }

    fn tracker(results: Vec<Result<RawSnapshot, PollError>>) -> LocationTracker {
        let profile = LocationProfile {
            title: "Klagenfurt".to_string(),
            latitude: 46.628,
            longitude: 14.309,
            country_code: "AT".to_string(),
            language_code: "de".to_string(),
            credential: "key".to_string(),
        };
        LocationTracker::new(
            profile,
            Arc::new(ScriptedSource {
                results: Mutex::new(results.into()),
            }),
            Arc::new(BundledTables::bundled().expect("bundled tables")),
            RiskScale::default(),
        )
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    fn birch() -> RawSnapshot {
        RawSnapshot {
            location_title: Some("9020 Klagenfurt".to_string()),
            readings: vec![AllergenReading {
                label: "Birke (Betula)".to_string(),
                daily: [(0, 3), (1, 2)].into(),
                hourly: Default::default(),
            }],
            ..RawSnapshot::empty()
        }
    }

    #[test]
    fn test_successful_cycle_publishes_quantities_and_location() {
        let mut t = tracker(vec![Ok(birch())]);
        let view = t.run_cycle(fixed_now());
        assert!(view.update_success);
        assert_eq!(view.last_updated, Some(fixed_now()));
        assert_eq!(view.zip.as_deref(), Some("9020"));
        assert_eq!(view.place.as_deref(), Some("Klagenfurt"));
        assert_eq!(view.quantities.len(), 1);
        assert_eq!(view.quantities[0].unique_id, "polmon_klagenfurt_pollen_birch");
        assert_eq!(t.view(), view);
    }

    #[test]
    fn test_failure_keeps_quantities_and_last_updated() {
        let mut t = tracker(vec![Ok(birch()), Err(PollError::Transport("timed out".into()))]);
        let first = t.run_cycle(fixed_now());
        let second = t.run_cycle(fixed_now() + Duration::hours(8));
        assert!(!second.update_success);
        assert_eq!(second.quantities, first.quantities);
        assert_eq!(second.last_updated, Some(fixed_now()));
        assert_eq!(second.last_error, Some(ErrorClass::Transport));
        assert_eq!(second.place.as_deref(), Some("Klagenfurt"));
    }

    #[test]
    fn test_auth_failure_flags_credential_until_success() {
        let mut t = tracker(vec![
            Err(PollError::Auth { status: 401 }),
            Err(PollError::Transport("reset".into())),
            Ok(birch()),
        ]);
        assert!(t.run_cycle(fixed_now()).needs_credential);
        assert!(t.run_cycle(fixed_now()).needs_credential);
        let view = t.run_cycle(fixed_now());
        assert!(!view.needs_credential);
        assert_eq!(view.last_error, None);
    }

    #[test]
    fn test_empty_response_marks_stale() {
        let mut t = tracker(vec![Ok(birch()), Ok(RawSnapshot::empty())]);
        t.run_cycle(fixed_now());
        let view = t.run_cycle(fixed_now() + Duration::hours(8));
        assert!(view.update_success);
        assert!(view.quantities[0].is_stale);
        assert_eq!(view.quantities[0].stale_since, Some(fixed_now() + Duration::hours(8)));
    }

    #[test]
    fn test_cancelled_cycle_commits_nothing() {
        let mut t = tracker(vec![Ok(birch()), Ok(RawSnapshot::empty())]);
        let first = t.run_cycle(fixed_now());
        t.cancel_token().cancel();
        let after = t.run_cycle(fixed_now() + Duration::hours(8));
        assert!(Arc::ptr_eq(&first, &after));
        assert_eq!(after.cycles, 1);
    }

    #[test]
    fn test_forget_republishes_view_without_id() {
        let mut t = tracker(vec![Ok(birch())]);
        let handle = t.view_handle();
        t.run_cycle(fixed_now());
        assert!(t.forget("polmon_klagenfurt_pollen_birch"));
        assert!(handle.current().quantities.is_empty());
        assert_eq!(handle.current().cycles, 1);
        assert!(!t.forget("polmon_klagenfurt_pollen_birch"));
    }

    #[test]
    fn test_views_serialize_as_json_array() {
        let mut t = tracker(vec![Ok(birch())]);
        let views = vec![t.run_cycle(fixed_now())];
        let json = views_to_json(&views).expect("views serialize");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(parsed[0]["location_key"], "klagenfurt");
        assert_eq!(
            parsed[0]["quantities"][0]["unique_id"],
            "polmon_klagenfurt_pollen_birch"
        );
    }
}
