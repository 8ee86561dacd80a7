/// Upstream snapshot sources.
///
/// Every source turns one profile into one `RawSnapshot` or a classified
/// `PollError`. The poller only ever talks to the trait.
///
/// Submodules:
/// - `pollen_api`: live HTTP client for the public forecast endpoint.
/// - `replay`: recorded payloads read from disk, for development and tests.

pub mod pollen_api;
pub mod replay;

use crate::model::{LocationProfile, PollError, RawSnapshot};

/// A place snapshots come from.
///
/// Implementations must be `Send + Sync`: the scheduler shares one source
/// between per-profile worker threads.
pub trait SnapshotSource: Send + Sync {
    /// Short name used in log output (e.g. `"pollen-api"`).
    fn name(&self) -> &'static str;

    /// Fetches one snapshot. May block on I/O; must not panic.
    fn fetch(&self, profile: &LocationProfile) -> Result<RawSnapshot, PollError>;
}
