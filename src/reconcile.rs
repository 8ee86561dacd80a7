/// Reconciliation of tracked quantities across poll cycles.
///
/// Each cycle turns the interpreted snapshot into the authoritative, ordered
/// list of tracked quantities for one location and decides for every id
/// whether it is created, updated, reissued as stale, or dropped:
///
///   failed poll            -> previous output unchanged
///   non-empty snapshot     -> fresh quantities; known ids not seen are dropped
///   empty snapshot         -> every known id reissued as stale
///
/// A stale quantity keeps the instant its staleness began, however many
/// empty cycles follow. The core never deletes an id on its own after an
/// empty cycle; only [`RegistryState::forget`] does.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::{InterpretedSnapshot, Observation};
use crate::model::{QuantityKind, TrackedQuantity};

/// Prefix of every unique id issued by this service.
pub const ID_PREFIX: &str = "polmon";

/// `polmon_{location}_{kind}_{slug}`.
pub fn unique_id(location_key: &str, kind: QuantityKind, slug: &str) -> String {
    format!("{}_{}_{}_{}", ID_PREFIX, location_key, kind.as_str(), slug)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// What the registry remembers about an issued id, enough to reissue it as
/// a stale quantity without the snapshot that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub kind: QuantityKind,
    pub name: String,
    pub canonical_name: String,
    pub latin_name: Option<String>,
    pub slug: String,
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
    /// Set while the id is stale.
    pub stale_since: Option<DateTime<Utc>>,
}

/// Ids issued for one location over the life of its tracking session.
///
/// Ordered by id so stale reissues come out in a stable order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryState {
    entries: BTreeMap<String, RegistryEntry>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes an id the host has explicitly purged.
    pub fn forget(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    fn insert(&mut self, id: String, entry: RegistryEntry) {
        self.entries.insert(id, entry);
    }
}

// ---------------------------------------------------------------------------
// Cycle results
// ---------------------------------------------------------------------------

/// Counts of what one reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub created: usize,
    pub updated: usize,
    pub stale: usize,
    pub dropped: usize,
    /// Quantities handed back unchanged after a failed poll.
    pub carried: usize,
    /// Ids renamed because two observations slugged to the same id.
    pub collisions: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub quantities: Vec<TrackedQuantity>,
    pub summary: CycleSummary,
}

/// One reconciliation step.
///
/// `snapshot` is the interpreted result of the latest poll; a successful
/// poll without a snapshot counts as empty. When `succeeded` is false the
/// registry is left untouched and `previous` is returned unchanged.
///
/// A known id missing from the snapshot is reissued as stale when the
/// snapshot says nothing about its kind (no allergen content for pollen and
/// risk ids, no air content for air ids), and dropped otherwise.
pub fn reconcile(
    location_key: &str,
    snapshot: Option<&InterpretedSnapshot>,
    succeeded: bool,
    registry: &mut RegistryState,
    previous: &[TrackedQuantity],
    now: DateTime<Utc>,
) -> Reconciliation {
    if !succeeded {
        return Reconciliation {
            quantities: previous.to_vec(),
            summary: CycleSummary {
                carried: previous.len(),
                ..CycleSummary::default()
            },
        };
    }

    let mut summary = CycleSummary::default();
    let observations = snapshot.map(|s| s.observations.as_slice()).unwrap_or_default();
    let reports = |kind: QuantityKind| snapshot.is_some_and(|s| s.reports(kind));

    let mut quantities = Vec::with_capacity(observations.len().max(registry.len()));
    let mut produced: HashSet<String> = HashSet::with_capacity(observations.len());
    let mut fresh_entries = Vec::with_capacity(observations.len());

    for observation in observations {
        let base = unique_id(location_key, observation.kind, &observation.slug);
        let id = disambiguate(&base, &produced);
        if id != base {
            summary.collisions += 1;
            tracing::warn!(
                id = %base,
                renamed = %id,
                label = %observation.name,
                "two quantities share an id in one snapshot; keeping both"
            );
        }

        if registry.contains(&id) {
            summary.updated += 1;
        } else {
            summary.created += 1;
        }

        produced.insert(id.clone());
        quantities.push(fresh_quantity(&id, observation));
        fresh_entries.push((id, entry_for(observation)));
    }

    let missing: Vec<String> = registry
        .known_ids()
        .filter(|id| !produced.contains(*id))
        .map(str::to_string)
        .collect();

    for id in &missing {
        let Some(entry) = registry.entries.get_mut(id) else {
            continue;
        };
        if reports(entry.kind) {
            tracing::debug!(id = %id, "quantity no longer reported upstream, dropping");
            registry.forget(id);
            summary.dropped += 1;
        } else {
            let since = *entry.stale_since.get_or_insert(now);
            quantities.push(stale_quantity(id, entry, since));
            summary.stale += 1;
        }
    }

    for (id, entry) in fresh_entries {
        registry.insert(id, entry);
    }

    Reconciliation { quantities, summary }
}

/// `base`, or `base_2`, `base_3`, ... when already produced this cycle.
fn disambiguate(base: &str, produced: &HashSet<String>) -> String {
    if !produced.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !produced.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn entry_for(observation: &Observation) -> RegistryEntry {
    RegistryEntry {
        kind: observation.kind,
        name: observation.name.clone(),
        canonical_name: observation.canonical_name.clone(),
        latin_name: observation.latin_name.clone(),
        slug: observation.slug.clone(),
        unit: observation.unit,
        device_class: observation.device_class,
        stale_since: None,
    }
}

fn fresh_quantity(id: &str, observation: &Observation) -> TrackedQuantity {
    TrackedQuantity {
        unique_id: id.to_string(),
        kind: observation.kind,
        name: observation.name.clone(),
        canonical_name: observation.canonical_name.clone(),
        latin_name: observation.latin_name.clone(),
        slug: observation.slug.clone(),
        value: observation.value,
        level: observation.level.clone(),
        forecast: observation.forecast.clone(),
        unit: observation.unit,
        device_class: observation.device_class,
        is_stale: false,
        stale_since: None,
    }
}

fn stale_quantity(id: &str, entry: &RegistryEntry, since: DateTime<Utc>) -> TrackedQuantity {
    TrackedQuantity {
        unique_id: id.to_string(),
        kind: entry.kind,
        name: entry.name.clone(),
        canonical_name: entry.canonical_name.clone(),
        latin_name: entry.latin_name.clone(),
        slug: entry.slug.clone(),
        value: None,
        level: None,
        forecast: Vec::new(),
        unit: entry.unit,
        device_class: entry.device_class,
        is_stale: true,
        stale_since: Some(since),
    }
}

// ---------------------------------------------------------------------------
// Stateful wrapper
// ---------------------------------------------------------------------------

/// Owns one location's registry and last output across cycles.
#[derive(Debug, Clone)]
pub struct Reconciler {
    location_key: String,
    registry: RegistryState,
    last_output: Vec<TrackedQuantity>,
}

impl Reconciler {
    pub fn new(location_key: impl Into<String>) -> Self {
        Self {
            location_key: location_key.into(),
            registry: RegistryState::new(),
            last_output: Vec::new(),
        }
    }

    pub fn location_key(&self) -> &str {
        &self.location_key
    }

    pub fn registry(&self) -> &RegistryState {
        &self.registry
    }

    pub fn last_output(&self) -> &[TrackedQuantity] {
        &self.last_output
    }

    /// Runs one cycle and remembers its output for the next failed poll.
    pub fn reconcile(
        &mut self,
        snapshot: Option<&InterpretedSnapshot>,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> Reconciliation {
        let result = reconcile(
            &self.location_key,
            snapshot,
            succeeded,
            &mut self.registry,
            &self.last_output,
            now,
        );
        self.last_output = result.quantities.clone();
        result
    }

    /// Host purge of a single id; it disappears from the next output too.
    pub fn forget(&mut self, id: &str) -> bool {
        self.last_output.retain(|q| q.unique_id != id);
        self.registry.forget(id)
    }
}
