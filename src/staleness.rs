/// Staleness age of tracked quantities.
///
/// A quantity goes stale when a successful poll returns nothing for its
/// location. The reconciler keeps it around indefinitely; presentation
/// layers that want to flag long-running staleness (an allergen that has
/// been silent all winter, a location the upstream dropped) use these
/// helpers.
///
/// # Clock injection
/// All functions accept a `now: DateTime<Utc>` parameter rather than calling
/// `Utc::now()` internally, so staleness checks are deterministic in tests.

use chrono::{DateTime, Utc};

use crate::model::TrackedQuantity;

/// Minutes since the quantity went stale, or `None` if it is not stale.
///
/// A `stale_since` in the future (clock skew between cycles) counts as zero.
pub fn stale_for_minutes(quantity: &TrackedQuantity, now: DateTime<Utc>) -> Option<u64> {
    if !quantity.is_stale {
        return None;
    }
    let since = quantity.stale_since?;
    let minutes = (now - since).num_minutes();
    Some(u64::try_from(minutes).unwrap_or(0))
}

/// Returns `true` if the quantity has been stale for longer than
/// `max_age_minutes`.
///
/// Staleness age is compared strictly:
///   age > max_age_minutes  →  true
///   age == max_age_minutes →  false
pub fn is_stale_longer_than(
    quantity: &TrackedQuantity,
    max_age_minutes: u64,
    now: DateTime<Utc>,
) -> bool {
    stale_for_minutes(quantity, now).is_some_and(|age| age > max_age_minutes)
}

/// Quantities stale for longer than `max_age_minutes`, in input order.
pub fn long_stale<'a>(
    quantities: &'a [TrackedQuantity],
    max_age_minutes: u64,
    now: DateTime<Utc>,
) -> Vec<&'a TrackedQuantity> {
    quantities
        .iter()
        .filter(|q| is_stale_longer_than(q, max_age_minutes, now))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
