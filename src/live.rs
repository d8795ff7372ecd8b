//! Read-only view of the live system's current set inventory.
//!
//! The composer probes this view for id collisions and for the current
//! member lists of sets it is about to extend. The real implementation
//! sits in the status-parsing layer; the in-memory one backs tests and
//! embedded use.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::rsc_set::ResourceSet;

/// What the composer needs to know about the live cluster's sets.
pub trait LiveView: Send + Sync {
    /// True if any live constraint already owns a set with this id.
    fn has_set_id(&self, set_id: &str) -> bool;

    /// The current sets recorded under a constraint id, in report order.
    fn sets_for_constraint(&self, constraint_id: &str) -> Vec<ResourceSet>;
}

/// Trivial live view over an in-memory inventory.
#[derive(Debug, Default)]
pub struct InMemoryLiveView {
    by_constraint: RwLock<BTreeMap<String, Vec<ResourceSet>>>,
}

impl InMemoryLiveView {
    /// Creates an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a set under a constraint id.
    pub fn record(&self, constraint_id: impl Into<String>, set: ResourceSet) {
        if let Ok(mut map) = self.by_constraint.write() {
            map.entry(constraint_id.into()).or_default().push(set);
        }
    }
}

impl LiveView for InMemoryLiveView {
    fn has_set_id(&self, set_id: &str) -> bool {
        self.by_constraint
            .read()
            .map(|map| {
                map.values()
                    .any(|sets| sets.iter().any(|s| s.id == set_id))
            })
            .unwrap_or(false)
    }

    fn sets_for_constraint(&self, constraint_id: &str) -> Vec<ResourceSet> {
        self.by_constraint
            .read()
            .ok()
            .and_then(|map| map.get(constraint_id).cloned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceId;

    #[test]
    fn test_in_memory_live_view() {
        let live = InMemoryLiveView::new();
        assert!(!live.has_set_id("c5"));

        let set = ResourceSet::with_members("c5", vec![ResourceId::new("a")]);
        live.record("colocation_5", set.clone());

        assert!(live.has_set_id("c5"));
        assert_eq!(live.sets_for_constraint("colocation_5"), vec![set]);
        assert!(live.sets_for_constraint("other").is_empty());
    }
}
