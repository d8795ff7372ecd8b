//! The reconciliation engine.
//!
//! On every status refresh the live cluster reports a flat list of
//! constraint records with no stable object identity. `reconcile` matches
//! each record to a previously-created placeholder (so selections, open
//! panels, and layout survive refreshes), detects flipped directions,
//! and reports everything as a diff against an immutable registry
//! snapshot. A single owner applies the diff; readers keep their
//! snapshots.

mod matcher;

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::chain::GroupId;
use crate::connection::{ConstraintKind, ResourceSetConnection};
use crate::graph::{GraphEvent, NodeRef};
use crate::placeholder::ConstraintPlaceholder;
use crate::registry::{PlaceholderHandle, RegistrySnapshot};
use crate::resource::ResourceId;

/// Diff produced by one `reconcile` call.
///
/// Created placeholders are reported separately from updated ones because
/// the graph sink must add a vertex for them, not just update one. Their
/// handles are pre-assigned from the snapshot's next-handle counter, so
/// edges can reference them before the diff is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Existing placeholders whose state changed.
    pub updated: Vec<(PlaceholderHandle, ConstraintPlaceholder)>,

    /// Placeholders created for unmatched live records.
    pub created: Vec<(PlaceholderHandle, ConstraintPlaceholder)>,

    /// Placeholders absent from the live batch with no local edit.
    pub removed: Vec<PlaceholderHandle>,

    /// Graph mutation events to publish after the diff is applied.
    pub events: Vec<GraphEvent>,

    /// Constraint ids that joined an existing chain group through
    /// carry-over matching, for the group aggregator to absorb.
    pub group_joins: Vec<(GroupId, ConstraintKind, String)>,

    /// Count of malformed (both-sides-empty) records dropped.
    pub dropped_malformed: usize,
}

impl ReconcileOutcome {
    /// True when applying this outcome would change nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.updated.is_empty()
            && self.created.is_empty()
            && self.removed.is_empty()
            && self.events.is_empty()
    }
}

pub(crate) struct Entry {
    pub(crate) handle: PlaceholderHandle,
    pub(crate) placeholder: ConstraintPlaceholder,
    pub(crate) existing: bool,
    pub(crate) changed: bool,
    pub(crate) touched: bool,
}

/// Reconciles one live batch against a registry snapshot.
///
/// Records are processed in report order and placeholders scanned in
/// registration order; both are load-bearing for the first-match
/// semantics of constraint-id carry-over. Members missing from
/// `known_resources` produce no edge but the attachment proceeds; they
/// become visible once the resource appears in a later batch.
#[must_use]
pub fn reconcile(
    live: &[ResourceSetConnection],
    snapshot: &RegistrySnapshot,
    known_resources: &HashSet<ResourceId>,
) -> ReconcileOutcome {
    let mut entries: Vec<Entry> = snapshot
        .entries()
        .iter()
        .map(|(handle, ph)| Entry {
            handle: *handle,
            placeholder: ph.clone(),
            existing: true,
            changed: false,
            touched: false,
        })
        .collect();

    let mut next_handle = snapshot.next_handle();
    let mut events = Vec::new();
    let mut group_joins = Vec::new();
    let mut dropped_malformed = 0usize;
    let mut attached_this_cycle: Vec<ResourceSetConnection> = Vec::new();

    for conn in live {
        // Malformed records are dropped with a diagnostic, never matched.
        if conn.is_malformed() {
            warn!(
                constraint_id = %conn.constraint_id,
                kind = conn.kind.name(),
                "dropping connection with both resource-set sides empty"
            );
            dropped_malformed += 1;
            continue;
        }

        // Priority 1: identity. The engine re-processed its own output
        // within this cycle.
        if attached_this_cycle.iter().any(|c| c == conn) {
            continue;
        }

        // Priority 2: equality or reversed-equality.
        if let Some((idx, via_reversal)) = matcher::find_same_connection(&entries, conn) {
            let entry = &mut entries[idx];
            if via_reversal {
                let mut incoming = conn.clone();
                incoming.reverse();
                entry.placeholder.attach(conn.kind, incoming, true);
                entry.changed = true;
            } else if entry.placeholder.reversed(conn.kind) {
                // The source went back to the original orientation.
                entry.placeholder.attach(conn.kind, conn.clone(), false);
                entry.changed = true;
            }
            // Members that were unknown when the connection attached get
            // their edges the cycle they resolve, even though the stored
            // record itself is unchanged.
            if emit_resolved_edges(&mut events, entry, conn.kind, known_resources) {
                entry.changed = true;
            }
            entry.touched = true;
            attached_this_cycle.push(conn.clone());
            continue;
        }

        // Priority 3: constraint-id carry-over (subset growth or a new
        // placeholder that committed under this id).
        if let Some(idx) = matcher::find_carry_over(&entries, conn) {
            let entry = &mut entries[idx];
            entry.placeholder.replace_connection(conn.kind, conn.clone());
            entry.changed = true;
            entry.touched = true;
            if let Some(group) = entry.placeholder.group {
                group_joins.push((group, conn.kind, conn.constraint_id.clone()));
            }
            let unresolved = emit_edges(&mut events, entry.handle, conn, known_resources);
            *entry.placeholder.unresolved_mut(conn.kind) = unresolved;
            attached_this_cycle.push(conn.clone());
            continue;
        }

        // Priority 4: consume an unused pre-existing new placeholder.
        if let Some(idx) = matcher::find_adoptable(&entries, conn) {
            let entry = &mut entries[idx];
            entry.placeholder.write_connection(conn.kind, conn.clone());
            entry.changed = true;
            entry.touched = true;
            let stored = entry
                .placeholder
                .connection(conn.kind)
                .cloned()
                .unwrap_or_else(|| conn.clone());
            let unresolved = emit_edges(&mut events, entry.handle, &stored, known_resources);
            *entry.placeholder.unresolved_mut(conn.kind) = unresolved;
            attached_this_cycle.push(conn.clone());
            continue;
        }

        // Priority 5: create. Never an error; this is the common "first
        // ever constraint" case.
        let mut placeholder = ConstraintPlaceholder::from_live(conn.clone());
        let handle = PlaceholderHandle::new(next_handle);
        next_handle += 1;
        events.push(GraphEvent::AddVertex {
            placeholder: handle,
            label: placeholder.main_label().to_string(),
        });
        let unresolved = emit_edges(&mut events, handle, conn, known_resources);
        *placeholder.unresolved_mut(conn.kind) = unresolved;
        entries.push(Entry {
            handle,
            placeholder,
            existing: false,
            changed: true,
            touched: true,
        });
        attached_this_cycle.push(conn.clone());
    }

    let mut outcome = ReconcileOutcome {
        group_joins,
        dropped_malformed,
        ..Default::default()
    };

    for entry in entries {
        if entry.existing {
            if entry.touched {
                if entry.changed {
                    outcome.updated.push((entry.handle, entry.placeholder));
                }
            } else if !entry.placeholder.is_new
                && !entry.placeholder.has_pending_edit()
                && !entry.placeholder.is_empty()
            {
                // Gone from the live snapshot with no kept local edit.
                outcome.removed.push(entry.handle);
                events.push(GraphEvent::RemoveVertex {
                    placeholder: entry.handle,
                });
            }
        } else {
            outcome.created.push((entry.handle, entry.placeholder));
        }
    }

    outcome.events = events;
    outcome
}

/// Emits edges for resolvable members and returns the members whose
/// edges were withheld, so the caller can record them for retry.
fn emit_edges(
    events: &mut Vec<GraphEvent>,
    handle: PlaceholderHandle,
    conn: &ResourceSetConnection,
    known_resources: &HashSet<ResourceId>,
) -> BTreeSet<ResourceId> {
    let mut unresolved = BTreeSet::new();
    // set1 members point into the placeholder, the placeholder points
    // into set2 members; the convention is the same for both kinds.
    for member in conn.members_side1() {
        if known_resources.contains(member) {
            events.push(GraphEvent::AddEdge {
                from: NodeRef::Resource(member.clone()),
                to: NodeRef::Placeholder(handle),
                constraint_id: conn.constraint_id.clone(),
            });
        } else {
            debug!(member = %member, "skipping edge for unresolved member");
            unresolved.insert(member.clone());
        }
    }
    for member in conn.members_side2() {
        if known_resources.contains(member) {
            events.push(GraphEvent::AddEdge {
                from: NodeRef::Placeholder(handle),
                to: NodeRef::Resource(member.clone()),
                constraint_id: conn.constraint_id.clone(),
            });
        } else {
            debug!(member = %member, "skipping edge for unresolved member");
            unresolved.insert(member.clone());
        }
    }
    unresolved
}

/// Emits the withheld edges of `entry`'s connection of `kind` whose
/// members have since appeared in `known_resources`. Returns whether any
/// edge was emitted (the entry changed).
fn emit_resolved_edges(
    events: &mut Vec<GraphEvent>,
    entry: &mut Entry,
    kind: ConstraintKind,
    known_resources: &HashSet<ResourceId>,
) -> bool {
    if entry.placeholder.unresolved(kind).is_empty() {
        return false;
    }
    let Some(conn) = entry.placeholder.connection(kind).cloned() else {
        return false;
    };

    let mut resolved = Vec::new();
    for member in conn.members_side1() {
        if entry.placeholder.unresolved(kind).contains(member)
            && known_resources.contains(member)
        {
            events.push(GraphEvent::AddEdge {
                from: NodeRef::Resource(member.clone()),
                to: NodeRef::Placeholder(entry.handle),
                constraint_id: conn.constraint_id.clone(),
            });
            resolved.push(member.clone());
        }
    }
    for member in conn.members_side2() {
        if entry.placeholder.unresolved(kind).contains(member)
            && known_resources.contains(member)
        {
            events.push(GraphEvent::AddEdge {
                from: NodeRef::Placeholder(entry.handle),
                to: NodeRef::Resource(member.clone()),
                constraint_id: conn.constraint_id.clone(),
            });
            resolved.push(member.clone());
        }
    }

    if resolved.is_empty() {
        return false;
    }
    let pending = entry.placeholder.unresolved_mut(kind);
    for member in &resolved {
        pending.remove(member);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholder::Preference;
    use crate::registry::PlaceholderRegistry;
    use crate::rsc_set::ResourceSet;

    fn rid(id: &str) -> ResourceId {
        ResourceId::new(id)
    }

    fn known(ids: &[&str]) -> HashSet<ResourceId> {
        ids.iter().map(|i| rid(i)).collect()
    }

    fn col(id: &str, s1: &[&str], s2: &[&str]) -> ResourceSetConnection {
        ResourceSetConnection::with_sets(
            ConstraintKind::Colocation,
            id,
            ResourceSet::with_members("s1", s1.iter().map(|m| rid(m)).collect()),
            ResourceSet::with_members("s2", s2.iter().map(|m| rid(m)).collect()),
        )
    }

    #[test]
    fn test_create_from_empty_registry() {
        let live = vec![col("c1", &["svcA"], &["svcB"])];
        let snap = RegistrySnapshot::empty();
        let outcome = reconcile(&live, &snap, &known(&["svcA", "svcB"]));

        assert_eq!(outcome.created.len(), 1);
        assert!(outcome.updated.is_empty());
        let (handle, ph) = &outcome.created[0];
        assert_eq!(handle.value(), 1);
        assert_eq!(
            ph.connection(ConstraintKind::Colocation).unwrap().constraint_id,
            "c1"
        );
        assert!(!ph.is_new);

        // AddVertex, svcA -> PH, PH -> svcB.
        assert_eq!(outcome.events.len(), 3);
        assert!(matches!(outcome.events[0], GraphEvent::AddVertex { .. }));
        assert_eq!(
            outcome.events[1],
            GraphEvent::AddEdge {
                from: NodeRef::Resource(rid("svcA")),
                to: NodeRef::Placeholder(*handle),
                constraint_id: "c1".to_string(),
            }
        );
        assert_eq!(
            outcome.events[2],
            GraphEvent::AddEdge {
                from: NodeRef::Placeholder(*handle),
                to: NodeRef::Resource(rid("svcB")),
                constraint_id: "c1".to_string(),
            }
        );
    }

    #[test]
    fn test_idempotent_second_pass() {
        let reg = PlaceholderRegistry::new();
        let live = vec![col("c1", &["svcA"], &["svcB"])];
        let res = known(&["svcA", "svcB"]);

        let first = reconcile(&live, &reg.snapshot().unwrap(), &res);
        reg.apply(&first).unwrap();

        let second = reconcile(&live, &reg.snapshot().unwrap(), &res);
        assert!(second.is_noop(), "second pass produced {second:?}");
    }

    #[test]
    fn test_reversed_equality_reuses_placeholder() {
        let reg = PlaceholderRegistry::new();
        let c = col("c1", &["svcA"], &["svcB"]);
        let res = known(&["svcA", "svcB"]);

        let first = reconcile(std::slice::from_ref(&c), &reg.snapshot().unwrap(), &res);
        reg.apply(&first).unwrap();

        let flipped = c.reversed();
        let second = reconcile(
            std::slice::from_ref(&flipped),
            &reg.snapshot().unwrap(),
            &res,
        );
        assert!(second.created.is_empty());
        assert_eq!(second.updated.len(), 1);
        let (_, ph) = &second.updated[0];
        assert!(ph.reversed_colocation);
        // Stored orientation is unchanged, so no edges re-emit.
        assert!(second.events.is_empty());
        reg.apply(&second).unwrap();

        // Original orientation again clears the flag.
        let third = reconcile(std::slice::from_ref(&c), &reg.snapshot().unwrap(), &res);
        assert_eq!(third.updated.len(), 1);
        assert!(!third.updated[0].1.reversed_colocation);
    }

    #[test]
    fn test_malformed_connection_dropped() {
        let bad = ResourceSetConnection::new(ConstraintKind::Order);
        let outcome = reconcile(
            std::slice::from_ref(&bad),
            &RegistrySnapshot::empty(),
            &known(&[]),
        );
        assert_eq!(outcome.dropped_malformed, 1);
        assert!(outcome.created.is_empty());
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_unresolved_member_skips_edge_but_attaches() {
        let live = vec![col("c1", &["svcA"], &["ghost"])];
        let outcome = reconcile(&live, &RegistrySnapshot::empty(), &known(&["svcA"]));

        assert_eq!(outcome.created.len(), 1);
        let edges: Vec<_> = outcome
            .events
            .iter()
            .filter(|e| matches!(e, GraphEvent::AddEdge { .. }))
            .collect();
        assert_eq!(edges.len(), 1); // only svcA -> PH
    }

    #[test]
    fn test_unresolved_member_edge_emitted_once_resolved() {
        let reg = PlaceholderRegistry::new();
        let c = col("c1", &["svcA"], &["ghost"]);

        let first = reconcile(
            std::slice::from_ref(&c),
            &reg.snapshot().unwrap(),
            &known(&["svcA"]),
        );
        reg.apply(&first).unwrap();
        let handle = first.created[0].0;
        assert_eq!(
            first.created[0].1.unresolved(ConstraintKind::Colocation).len(),
            1
        );

        // "ghost" appears; the withheld edge emits on this cycle even
        // though the live record is unchanged.
        let second = reconcile(
            std::slice::from_ref(&c),
            &reg.snapshot().unwrap(),
            &known(&["svcA", "ghost"]),
        );
        assert_eq!(
            second.events,
            vec![GraphEvent::AddEdge {
                from: NodeRef::Placeholder(handle),
                to: NodeRef::Resource(rid("ghost")),
                constraint_id: "c1".to_string(),
            }]
        );
        assert_eq!(second.updated.len(), 1);
        assert!(second.updated[0]
            .1
            .unresolved(ConstraintKind::Colocation)
            .is_empty());
        reg.apply(&second).unwrap();

        // Settled: a further identical refresh is a no-op.
        let third = reconcile(
            std::slice::from_ref(&c),
            &reg.snapshot().unwrap(),
            &known(&["svcA", "ghost"]),
        );
        assert!(third.is_noop(), "third pass produced {third:?}");
    }

    #[test]
    fn test_carry_over_grows_connection() {
        let reg = PlaceholderRegistry::new();
        let res = known(&["svcA", "svcB", "svcC"]);

        let first = reconcile(
            &[col("c1", &["svcA"], &["svcB"])],
            &reg.snapshot().unwrap(),
            &res,
        );
        reg.apply(&first).unwrap();

        let grown = col("c1", &["svcA", "svcC"], &["svcB"]);
        let second = reconcile(
            std::slice::from_ref(&grown),
            &reg.snapshot().unwrap(),
            &res,
        );
        assert!(second.created.is_empty());
        assert_eq!(second.updated.len(), 1);
        let (_, ph) = &second.updated[0];
        assert_eq!(
            ph.connection(ConstraintKind::Colocation)
                .unwrap()
                .members_side1()
                .count(),
            2
        );
    }

    #[test]
    fn test_carry_over_on_grouped_placeholder_feeds_its_group() {
        use crate::chain::{GroupId, PlaceholderGroup};

        let reg = PlaceholderRegistry::new();
        let res = known(&["svcA", "svcB", "svcC"]);
        let gid = GroupId::new(7);

        // A chain member committed earlier: grouped, not new, holding the
        // colocation under its CRM-assigned id.
        let mut member = ConstraintPlaceholder::new(Preference::And);
        member.is_new = false;
        member.group = Some(gid);
        member.attach(
            ConstraintKind::Colocation,
            col("colocation_1", &["svcA"], &["svcB"]),
            false,
        );
        let h = reg.insert(member).unwrap();
        let mut group = PlaceholderGroup::new(gid);
        group.add_member(h);
        reg.store_group(group).unwrap();

        // The live record grew; carry-over reports the join.
        let grown = col("colocation_1", &["svcA", "svcC"], &["svcB"]);
        let outcome = reconcile(
            std::slice::from_ref(&grown),
            &reg.snapshot().unwrap(),
            &res,
        );
        assert_eq!(
            outcome.group_joins,
            vec![(gid, ConstraintKind::Colocation, "colocation_1".to_string())]
        );

        // Applying the diff extends the persisted group.
        reg.apply(&outcome).unwrap();
        let stored = reg.group(gid).unwrap().unwrap();
        assert!(stored
            .constraint_ids(ConstraintKind::Colocation)
            .contains("colocation_1"));
    }

    #[test]
    fn test_adopts_unused_new_placeholder() {
        let reg = PlaceholderRegistry::new();
        let h = reg.insert(ConstraintPlaceholder::new(Preference::Or)).unwrap();
        let res = known(&["svcA", "svcB"]);

        let outcome = reconcile(
            &[col("c9", &["svcA"], &["svcB"])],
            &reg.snapshot().unwrap(),
            &res,
        );
        assert!(outcome.created.is_empty());
        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(outcome.updated[0].0, h);
        assert!(outcome.updated[0]
            .1
            .connection(ConstraintKind::Colocation)
            .is_some());
    }

    #[test]
    fn test_vanished_placeholder_is_removed() {
        let reg = PlaceholderRegistry::new();
        let res = known(&["svcA", "svcB"]);
        let first = reconcile(
            &[col("c1", &["svcA"], &["svcB"])],
            &reg.snapshot().unwrap(),
            &res,
        );
        reg.apply(&first).unwrap();

        let outcome = reconcile(&[], &reg.snapshot().unwrap(), &res);
        assert_eq!(outcome.removed.len(), 1);
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, GraphEvent::RemoveVertex { .. })));
        reg.apply(&outcome).unwrap();
        assert_eq!(reg.len().unwrap(), 0);
    }

    #[test]
    fn test_new_empty_placeholder_survives_empty_batch() {
        let reg = PlaceholderRegistry::new();
        reg.insert(ConstraintPlaceholder::new(Preference::And)).unwrap();

        let outcome = reconcile(&[], &reg.snapshot().unwrap(), &known(&[]));
        assert!(outcome.removed.is_empty());
    }

    #[test]
    fn test_duplicate_record_in_one_batch_is_skipped() {
        let c = col("c1", &["svcA"], &["svcB"]);
        let outcome = reconcile(
            &[c.clone(), c],
            &RegistrySnapshot::empty(),
            &known(&["svcA", "svcB"]),
        );
        assert_eq!(outcome.created.len(), 1);
    }

    #[test]
    fn test_order_and_colocation_share_one_placeholder_via_adoption() {
        let reg = PlaceholderRegistry::new();
        reg.insert(ConstraintPlaceholder::new(Preference::And)).unwrap();
        let res = known(&["svcA", "svcB"]);

        let c = col("c1", &["svcA"], &["svcB"]);
        let mut o = c.clone();
        o.kind = ConstraintKind::Order;
        o.constraint_id = "o1".to_string();

        let outcome = reconcile(&[c, o], &reg.snapshot().unwrap(), &res);
        assert!(outcome.created.is_empty());
        assert_eq!(outcome.updated.len(), 1);
        let ph = &outcome.updated[0].1;
        assert!(ph.connection(ConstraintKind::Colocation).is_some());
        assert!(ph.connection(ConstraintKind::Order).is_some());
    }
}
