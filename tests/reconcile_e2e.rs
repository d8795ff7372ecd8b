use std::collections::HashSet;

use crmsets::graph::InMemoryGraph;
use crmsets::{
    reconcile, ConstraintKind, ConstraintPlaceholder, GraphAdjacency, GraphEvent, GraphEventHub,
    NodeRef, PlaceholderRegistry, Preference, ResourceId, ResourceSet, ResourceSetConnection,
};

fn rid(id: &str) -> ResourceId {
    ResourceId::new(id)
}

fn known(ids: &[&str]) -> HashSet<ResourceId> {
    ids.iter().map(|i| rid(i)).collect()
}

fn conn(kind: ConstraintKind, id: &str, s1: &[&str], s2: &[&str]) -> ResourceSetConnection {
    ResourceSetConnection::with_sets(
        kind,
        id,
        ResourceSet::with_members(format!("{id}-1"), s1.iter().map(|m| rid(m)).collect()),
        ResourceSet::with_members(format!("{id}-2"), s2.iter().map(|m| rid(m)).collect()),
    )
}

#[test]
fn refresh_cycle_creates_then_settles() {
    let registry = PlaceholderRegistry::new();
    let graph = InMemoryGraph::new();
    let resources = known(&["web", "db"]);

    let live = vec![
        conn(ConstraintKind::Colocation, "c1", &["web"], &["db"]),
        conn(ConstraintKind::Order, "o1", &["db"], &["web"]),
    ];

    let first = reconcile(&live, &registry.snapshot().unwrap(), &resources);
    assert_eq!(first.created.len(), 2);
    assert!(first.updated.is_empty());
    registry.apply(&first).unwrap();
    graph.apply_events(&first.events);

    // The colocation placeholder is reachable from "web" in the graph.
    let children = graph.children_of(&NodeRef::Resource(rid("web")));
    assert!(children
        .iter()
        .any(|n| n.as_placeholder().is_some()));

    // A refresh reporting the same records changes nothing.
    let second = reconcile(&live, &registry.snapshot().unwrap(), &resources);
    assert!(second.is_noop(), "second pass produced {second:?}");
}

#[test]
fn direction_flip_round_trips() {
    let registry = PlaceholderRegistry::new();
    let resources = known(&["web", "db"]);
    let original = conn(ConstraintKind::Order, "o1", &["db"], &["web"]);

    let first = reconcile(
        std::slice::from_ref(&original),
        &registry.snapshot().unwrap(),
        &resources,
    );
    registry.apply(&first).unwrap();
    let handle = first.created[0].0;

    // The live system reports the record with the sides swapped.
    let flipped = original.reversed();
    let second = reconcile(
        std::slice::from_ref(&flipped),
        &registry.snapshot().unwrap(),
        &resources,
    );
    assert!(second.created.is_empty());
    assert_eq!(second.updated.len(), 1);
    assert_eq!(second.updated[0].0, handle);
    assert!(second.updated[0].1.reversed(ConstraintKind::Order));
    // Stored orientation is unchanged, so no graph churn.
    assert!(second.events.is_empty());
    registry.apply(&second).unwrap();

    // Back to the original orientation: the flag clears, still no churn.
    let third = reconcile(
        std::slice::from_ref(&original),
        &registry.snapshot().unwrap(),
        &resources,
    );
    assert_eq!(third.updated.len(), 1);
    assert!(!third.updated[0].1.reversed(ConstraintKind::Order));
    assert!(third.events.is_empty());
    registry.apply(&third).unwrap();

    let fourth = reconcile(
        std::slice::from_ref(&original),
        &registry.snapshot().unwrap(),
        &resources,
    );
    assert!(fourth.is_noop());
}

#[test]
fn growth_keeps_placeholder_identity() {
    let registry = PlaceholderRegistry::new();
    let resources = known(&["web", "db", "cache"]);

    let first = reconcile(
        &[conn(ConstraintKind::Colocation, "c1", &["web"], &["db"])],
        &registry.snapshot().unwrap(),
        &resources,
    );
    registry.apply(&first).unwrap();
    let handle = first.created[0].0;

    let grown = conn(ConstraintKind::Colocation, "c1", &["web", "cache"], &["db"]);
    let second = reconcile(
        std::slice::from_ref(&grown),
        &registry.snapshot().unwrap(),
        &resources,
    );
    assert!(second.created.is_empty());
    assert_eq!(second.updated.len(), 1);
    assert_eq!(second.updated[0].0, handle);

    let stored = second.updated[0]
        .1
        .connection(ConstraintKind::Colocation)
        .unwrap();
    let side1: Vec<_> = stored.members_side1().map(ResourceId::as_str).collect();
    assert_eq!(side1, vec!["web", "cache"]);
}

#[test]
fn vanished_record_removes_placeholder_but_keeps_local_edits() {
    let registry = PlaceholderRegistry::new();
    let resources = known(&["web", "db"]);

    let first = reconcile(
        &[conn(ConstraintKind::Order, "o1", &["web"], &["db"])],
        &registry.snapshot().unwrap(),
        &resources,
    );
    registry.apply(&first).unwrap();
    let committed = first.created[0].0;

    // A placeholder the user just composed must survive any refresh.
    let drafted = registry
        .insert(ConstraintPlaceholder::new(Preference::Or))
        .unwrap();

    let second = reconcile(&[], &registry.snapshot().unwrap(), &resources);
    assert_eq!(second.removed, vec![committed]);
    registry.apply(&second).unwrap();

    assert!(registry.get(committed).unwrap().is_none());
    assert!(registry.get(drafted).unwrap().is_some());
}

#[test]
fn events_reach_subscribers_on_apply() {
    let registry = PlaceholderRegistry::new();
    let hub = GraphEventHub::new();
    let stream = hub.subscribe(64).unwrap();
    let resources = known(&["web", "db"]);

    let outcome = reconcile(
        &[conn(ConstraintKind::Colocation, "c1", &["web"], &["db"])],
        &registry.snapshot().unwrap(),
        &resources,
    );
    registry.apply_and_publish(&outcome, &hub).unwrap();

    let received = stream.drain();
    assert_eq!(received, outcome.events);
    assert!(received
        .iter()
        .any(|e| matches!(e, GraphEvent::AddVertex { .. })));
}

#[test]
fn stale_snapshot_is_rejected_on_apply() {
    let registry = PlaceholderRegistry::new();
    let resources = known(&["web", "db"]);
    let snapshot = registry.snapshot().unwrap();

    // The registry advances between snapshot and apply.
    registry
        .insert(ConstraintPlaceholder::new(Preference::And))
        .unwrap();

    let outcome = reconcile(
        &[conn(ConstraintKind::Colocation, "c1", &["web"], &["db"])],
        &snapshot,
        &resources,
    );
    let err = registry.apply(&outcome).unwrap_err();
    assert!(err.is_reconcile());

    // Re-running against a fresh snapshot succeeds.
    let retry = reconcile(
        &[conn(ConstraintKind::Colocation, "c1", &["web"], &["db"])],
        &registry.snapshot().unwrap(),
        &resources,
    );
    registry.apply(&retry).unwrap();
}

#[test]
fn malformed_and_unresolved_records_degrade_gracefully() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let registry = PlaceholderRegistry::new();
    let resources = known(&["web"]);

    let live = vec![
        ResourceSetConnection::new(ConstraintKind::Order),
        conn(ConstraintKind::Colocation, "c1", &["web"], &["ghost"]),
    ];
    let outcome = reconcile(&live, &registry.snapshot().unwrap(), &resources);

    assert_eq!(outcome.dropped_malformed, 1);
    assert_eq!(outcome.created.len(), 1);
    // Only the edge towards the known resource is emitted; the
    // attachment itself proceeds so "ghost" appears once it resolves.
    let edges = outcome
        .events
        .iter()
        .filter(|e| matches!(e, GraphEvent::AddEdge { .. }))
        .count();
    assert_eq!(edges, 1);
}
