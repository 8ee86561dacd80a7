/// Poll execution with failure isolation.
///
/// A `Poller` issues exactly one fetch per call against its snapshot source
/// and classifies the outcome. It keeps the last successfully fetched
/// snapshot, so a failed poll still hands the caller the last-known-good
/// data together with `succeeded = false`.
///
/// Polls take `&mut self`: one poller belongs to one profile, and holding it
/// mutably is what keeps two polls for the same profile from overlapping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ingest::SnapshotSource;
use crate::model::{LocationProfile, PollError, RawSnapshot};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared cancellation flag for one profile.
///
/// Clones observe the same flag. Once cancelled, a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Poll outcome
// ---------------------------------------------------------------------------

/// How a single poll ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// A snapshot with content.
    Fresh,
    /// Structurally valid response with nothing to report. Not an error.
    Empty,
    /// The poll failed; the previous snapshot is retained.
    Failed(PollError),
}

/// Result of one poll.
#[derive(Debug, Clone)]
pub struct PollResult {
    /// The new snapshot on success, otherwise the last good one (if any).
    pub snapshot: Option<Arc<RawSnapshot>>,
    pub succeeded: bool,
    pub status: PollStatus,
}

impl PollResult {
    pub fn error(&self) -> Option<&PollError> {
        match &self.status {
            PollStatus::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, PollStatus::Failed(PollError::Cancelled))
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct Poller {
    source: Arc<dyn SnapshotSource>,
    cancel: CancelToken,
    last_good: Option<Arc<RawSnapshot>>,
    last_succeeded: bool,
}

impl Poller {
    pub fn new(source: Arc<dyn SnapshotSource>, cancel: CancelToken) -> Self {
        Self {
            source,
            cancel,
            last_good: None,
            last_succeeded: false,
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Last successfully fetched snapshot, empty snapshots included.
    pub fn last_good(&self) -> Option<&Arc<RawSnapshot>> {
        self.last_good.as_ref()
    }

    /// Whether the most recent completed poll succeeded.
    pub fn last_succeeded(&self) -> bool {
        self.last_succeeded
    }

    /// Fetches once for `profile`.
    ///
    /// Never returns an error: failures are reported in the result. A poll
    /// whose token is cancelled before or during the fetch is discarded and
    /// leaves the poller's state untouched.
    pub fn poll(&mut self, profile: &LocationProfile) -> PollResult {
        if self.cancel.is_cancelled() {
            return self.discarded();
        }

        let fetched = self.source.fetch(profile);

        if self.cancel.is_cancelled() {
            tracing::debug!(location = %profile.title, "discarding result of cancelled poll");
            return self.discarded();
        }

        match fetched {
            Ok(snapshot) => {
                let status = if snapshot.is_empty() {
                    PollStatus::Empty
                } else {
                    PollStatus::Fresh
                };
                let snapshot = Arc::new(snapshot);
                self.last_good = Some(Arc::clone(&snapshot));
                self.last_succeeded = true;
                PollResult {
                    snapshot: Some(snapshot),
                    succeeded: true,
                    status,
                }
            }
            Err(err) => {
                self.last_succeeded = false;
                PollResult {
                    snapshot: self.last_good.clone(),
                    succeeded: false,
                    status: PollStatus::Failed(err),
                }
            }
        }
    }

    fn discarded(&self) -> PollResult {
        PollResult {
            snapshot: self.last_good.clone(),
            succeeded: false,
            status: PollStatus::Failed(PollError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::model::AllergenReading;

    /// Hands out scripted results in order; cancels the token mid-fetch when
    /// asked to.
    struct ScriptedSource {
        results: Mutex<VecDeque<Result<RawSnapshot, PollError>>>,
        cancel_during_fetch: Option<CancelToken>,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<RawSnapshot, PollError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                cancel_during_fetch: None,
            }
        }
    }

    impl SnapshotSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn fetch(&self, _profile: &LocationProfile) -> Result<RawSnapshot, PollError> {
            if let Some(token) = &self.cancel_during_fetch {
                token.cancel();
            }
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(PollError::Transport("script exhausted".into())))
        }
    }

    fn profile() -> LocationProfile {
        LocationProfile {
            title: "Graz".to_string(),
            latitude: 47.0707,
            longitude: 15.4395,
            country_code: "AT".to_string(),
            language_code: "de".to_string(),
            credential: "key".to_string(),
        }
    }

    fn birch_snapshot() -> RawSnapshot {
        RawSnapshot {
            readings: vec![AllergenReading {
                label: "Birke (Betula)".to_string(),
                daily: [(0, 3)].into(),
                hourly: Default::default(),
            }],
            ..RawSnapshot::empty()
        }
    }

    #[test]
    fn test_success_then_failure_retains_last_good() {
        let source = ScriptedSource::new(vec![
            Ok(birch_snapshot()),
            Err(PollError::Transport("timed out".into())),
        ]);
        let mut poller = Poller::new(Arc::new(source), CancelToken::new());

        let first = poller.poll(&profile());
        assert!(first.succeeded);
        assert_eq!(first.status, PollStatus::Fresh);

        let second = poller.poll(&profile());
        assert!(!second.succeeded);
        assert_eq!(second.snapshot.as_deref(), Some(&birch_snapshot()));
        assert_eq!(second.error(), Some(&PollError::Transport("timed out".into())));
        assert!(!poller.last_succeeded());
    }

    #[test]
    fn test_empty_snapshot_is_success() {
        let source = ScriptedSource::new(vec![Ok(birch_snapshot()), Ok(RawSnapshot::empty())]);
        let mut poller = Poller::new(Arc::new(source), CancelToken::new());
        poller.poll(&profile());

        let result = poller.poll(&profile());
        assert!(result.succeeded);
        assert_eq!(result.status, PollStatus::Empty);
        assert!(result.snapshot.expect("empty snapshot is kept").is_empty());
    }

    #[test]
    fn test_auth_failure_is_classified() {
        let source = ScriptedSource::new(vec![Err(PollError::Auth { status: 401 })]);
        let mut poller = Poller::new(Arc::new(source), CancelToken::new());
        let result = poller.poll(&profile());
        assert!(!result.succeeded);
        assert!(result.snapshot.is_none());
        assert_eq!(result.error().map(PollError::kind), Some(crate::model::ErrorClass::Auth));
    }

    #[test]
    fn test_cancelled_before_fetch_does_not_call_source() {
        let token = CancelToken::new();
        token.cancel();
        let source = Arc::new(ScriptedSource::new(vec![Ok(birch_snapshot())]));
        let mut poller = Poller::new(source.clone(), token);

        assert!(poller.poll(&profile()).is_cancelled());
        assert_eq!(source.results.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_cancelled_during_fetch_discards_result() {
        let token = CancelToken::new();
        let source = ScriptedSource {
            results: Mutex::new(vec![Ok(birch_snapshot())].into()),
            cancel_during_fetch: Some(token.clone()),
        };
        let mut poller = Poller::new(Arc::new(source), token);

        let result = poller.poll(&profile());
        assert!(result.is_cancelled());
        assert!(poller.last_good().is_none());
    }
}
