/// Recorded-payload replay for development and testing.
///
/// When the live API is unavailable (no credential, rate limits, offline
/// development), use this source to replay response bodies captured earlier.
/// Bodies go through the same validation as live responses, so a recorded
/// malformed body produces the same `Content` error it would in production.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::ingest::SnapshotSource;
use crate::ingest::pollen_api::parse_forecast_body;
use crate::model::{LocationProfile, PollError, RawSnapshot};

/// Replays a sequence of recorded response bodies, one per fetch.
///
/// After the last file the final one is repeated, so a single-file replay
/// behaves like an upstream that never changes.
pub struct ReplaySource {
    paths: Vec<PathBuf>,
    cursor: Mutex<usize>,
}

impl ReplaySource {
    /// Replays a single recorded body on every fetch.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::sequence(vec![path.into()])
    }

    /// Replays `paths` in order, then keeps repeating the last one.
    pub fn sequence(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            cursor: Mutex::new(0),
        }
    }

    fn next_path(&self) -> Option<&Path> {
        let mut cursor = self.cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let index = (*cursor).min(self.paths.len().checked_sub(1)?);
        *cursor = cursor.saturating_add(1);
        self.paths.get(index).map(PathBuf::as_path)
    }
}

impl SnapshotSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn fetch(&self, profile: &LocationProfile) -> Result<RawSnapshot, PollError> {
        let path = self
            .next_path()
            .ok_or_else(|| PollError::Transport("replay source has no recorded payloads".to_string()))?;
        tracing::debug!(
            location = %profile.title,
            path = %path.display(),
            "replaying recorded forecast"
        );
        let body = std::fs::read_to_string(path).map_err(|e| {
            PollError::Transport(format!("could not read recorded payload {}: {}", path.display(), e))
        })?;
        parse_forecast_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn profile() -> LocationProfile {
        LocationProfile {
            title: "Wien".to_string(),
            latitude: 48.2082,
            longitude: 16.3738,
            country_code: "AT".to_string(),
            language_code: "de".to_string(),
            credential: String::new(),
        }
    }

    fn recorded(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(body.as_bytes()).expect("write body");
        file
    }

    #[test]
    fn test_replay_single_file_repeats() {
        let file = recorded(r#"{"contamination": [{"poll_title": "Birke", "contamination_1": 2}]}"#);
        let source = ReplaySource::new(file.path());
        for _ in 0..3 {
            let snapshot = source.fetch(&profile()).expect("replayed snapshot");
            assert_eq!(snapshot.readings.len(), 1);
        }
    }

    #[test]
    fn test_replay_sequence_advances_then_sticks_on_last() {
        let full = recorded(r#"{"contamination": [{"poll_title": "Birke", "contamination_1": 2}]}"#);
        let empty = recorded(r#"{"contamination": []}"#);
        let source = ReplaySource::sequence(vec![full.path().into(), empty.path().into()]);
        assert_eq!(source.fetch(&profile()).expect("first").readings.len(), 1);
        assert!(source.fetch(&profile()).expect("second").is_empty());
        assert!(source.fetch(&profile()).expect("third").is_empty());
    }

    #[test]
    fn test_replay_missing_file_is_transport_error() {
        let source = ReplaySource::new("/nonexistent/forecast.json");
        assert!(matches!(source.fetch(&profile()), Err(PollError::Transport(_))));
    }

    #[test]
    fn test_replay_malformed_body_is_content_error() {
        let file = recorded("{\"status\": \"ok\"}");
        let source = ReplaySource::new(file.path());
        assert!(matches!(source.fetch(&profile()), Err(PollError::Content(_))));
    }

    #[test]
    fn test_replay_without_paths_is_transport_error() {
        let source = ReplaySource::sequence(Vec::new());
        assert!(matches!(source.fetch(&profile()), Err(PollError::Transport(_))));
    }
}
