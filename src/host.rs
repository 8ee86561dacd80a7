/// Diff between what the host shows and what the core wants shown.
///
/// The host framework owns its monitored points. Each cycle an adapter
/// compares the ids the host currently shows against the latest tracked
/// quantities and applies the plan. Orphans are reported only: whether to
/// purge them is the host's call, after which it tells the tracker to forget
/// the id.

use std::collections::HashSet;

use serde::Serialize;

use crate::model::TrackedQuantity;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostPlan {
    /// Desired quantities the host does not show yet.
    pub create: Vec<TrackedQuantity>,
    /// Desired quantities the host already shows; refresh their state.
    pub update: Vec<TrackedQuantity>,
    /// Ids the host shows that the core no longer produces, sorted.
    pub orphaned: Vec<String>,
}

impl HostPlan {
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.orphaned.is_empty()
    }
}

/// Partitions `desired` by whether the host already shows each id.
///
/// `create` and `update` keep the order of `desired`.
pub fn plan_host_changes<'a, I>(shown_ids: I, desired: &[TrackedQuantity]) -> HostPlan
where
    I: IntoIterator<Item = &'a str>,
{
    let shown: HashSet<&str> = shown_ids.into_iter().collect();
    let wanted: HashSet<&str> = desired.iter().map(|q| q.unique_id.as_str()).collect();

    let (update, create): (Vec<_>, Vec<_>) = desired
        .iter()
        .cloned()
        .partition(|q| shown.contains(q.unique_id.as_str()));

    let mut orphaned: Vec<String> = shown
        .into_iter()
        .filter(|id| !wanted.contains(id))
        .map(str::to_string)
        .collect();
    orphaned.sort();

    HostPlan {
        create,
        update,
        orphaned,
    }
}
