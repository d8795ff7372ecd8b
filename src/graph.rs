//! Interactive-graph interfaces: adjacency queries in, mutation events out.
//!
//! The rendering layer owns the real graph. This crate only queries
//! parent/child adjacency (for chain detection and composition inputs) and
//! emits vertex/edge mutation events for the renderer to apply.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::error::{CrmError, CrmResult, ReconcileError};
use crate::registry::PlaceholderHandle;
use crate::resource::ResourceId;

/// A node in the interactive graph: a resource or a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "node", content = "id", rename_all = "snake_case")]
pub enum NodeRef {
    /// A CRM resource vertex.
    Resource(ResourceId),
    /// A placeholder vertex.
    Placeholder(PlaceholderHandle),
}

impl NodeRef {
    /// Returns the placeholder handle, if this node is a placeholder.
    #[must_use]
    pub const fn as_placeholder(&self) -> Option<PlaceholderHandle> {
        match self {
            Self::Placeholder(h) => Some(*h),
            Self::Resource(_) => None,
        }
    }

    /// Returns the resource id, if this node is a resource.
    #[must_use]
    pub const fn as_resource(&self) -> Option<&ResourceId> {
        match self {
            Self::Resource(id) => Some(id),
            Self::Placeholder(_) => None,
        }
    }
}

/// Graph mutation events emitted towards the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEvent {
    /// A placeholder vertex appeared.
    AddVertex {
        /// Handle of the new placeholder.
        placeholder: PlaceholderHandle,
        /// Its display label at creation time.
        label: String,
    },
    /// A directed edge appeared.
    AddEdge {
        /// Source node.
        from: NodeRef,
        /// Target node.
        to: NodeRef,
        /// Constraint id the edge belongs to (may be empty for pending
        /// local compositions).
        constraint_id: String,
    },
    /// A placeholder vertex disappeared.
    RemoveVertex {
        /// Handle of the removed placeholder.
        placeholder: PlaceholderHandle,
    },
}

/// Directed adjacency over the interactive graph.
///
/// Implemented by the rendering layer; the chain committer uses it for
/// structural chain detection and the composer for its initial inputs.
pub trait GraphAdjacency: Send + Sync {
    /// Nodes with an edge into `node`.
    fn parents_of(&self, node: &NodeRef) -> Vec<NodeRef>;

    /// Nodes `node` has an edge into.
    fn children_of(&self, node: &NodeRef) -> Vec<NodeRef>;
}

/// A subscription stream for graph mutation events.
///
/// Events are delivered best-effort over a bounded channel; a saturated
/// subscriber loses events rather than blocking the engine.
#[derive(Debug)]
pub struct GraphEventStream {
    rx: Receiver<GraphEvent>,
}

impl GraphEventStream {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> CrmResult<GraphEvent> {
        self.rx.recv().map_err(|_| {
            CrmError::Reconcile(ReconcileError::RegistryPoisoned {
                context: "graph event stream disconnected",
            })
        })
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> CrmResult<GraphEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => CrmError::internal("graph event stream timeout"),
            RecvTimeoutError::Disconnected => {
                CrmError::Reconcile(ReconcileError::RegistryPoisoned {
                    context: "graph event stream disconnected",
                })
            }
        })
    }

    /// Drains whatever events are currently queued.
    pub fn drain(&self) -> Vec<GraphEvent> {
        self.rx.try_iter().collect()
    }
}

/// Fan-out hub publishing graph events to subscribers.
#[derive(Debug, Default)]
pub struct GraphEventHub {
    subscribers: RwLock<Vec<Sender<GraphEvent>>>,
}

impl GraphEventHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber with the given channel capacity.
    pub fn subscribe(&self, capacity: usize) -> CrmResult<GraphEventStream> {
        let (tx, rx) = bounded(capacity);
        let mut subs = self.subscribers.write().map_err(|_| {
            CrmError::Reconcile(ReconcileError::RegistryPoisoned {
                context: "graph hub subscribe",
            })
        })?;
        subs.push(tx);
        Ok(GraphEventStream { rx })
    }

    /// Publishes events to all live subscribers, dropping what does not
    /// fit and pruning disconnected subscribers.
    pub fn publish(&self, events: &[GraphEvent]) -> CrmResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut subs = self.subscribers.write().map_err(|_| {
            CrmError::Reconcile(ReconcileError::RegistryPoisoned {
                context: "graph hub publish",
            })
        })?;
        subs.retain(|tx| {
            for ev in events {
                if let Err(crossbeam_channel::TrySendError::Disconnected(_)) =
                    tx.try_send(ev.clone())
                {
                    return false;
                }
            }
            true
        });
        Ok(())
    }
}

/// In-memory adjacency, used by tests and embedded callers that do not
/// run a real renderer.
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    edges: RwLock<BTreeMap<NodeRef, BTreeSet<NodeRef>>>,
    redges: RwLock<BTreeMap<NodeRef, BTreeSet<NodeRef>>>,
}

impl InMemoryGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directed edge.
    pub fn add_edge(&self, from: NodeRef, to: NodeRef) {
        if let Ok(mut edges) = self.edges.write() {
            edges.entry(from.clone()).or_default().insert(to.clone());
        }
        if let Ok(mut redges) = self.redges.write() {
            redges.entry(to).or_default().insert(from);
        }
    }

    /// Applies an event batch (vertex events are no-ops here; only edges
    /// carry adjacency).
    pub fn apply_events(&self, events: &[GraphEvent]) {
        for ev in events {
            if let GraphEvent::AddEdge { from, to, .. } = ev {
                self.add_edge(from.clone(), to.clone());
            }
        }
    }
}

impl GraphAdjacency for InMemoryGraph {
    fn parents_of(&self, node: &NodeRef) -> Vec<NodeRef> {
        self.redges
            .read()
            .ok()
            .and_then(|m| m.get(node).map(|s| s.iter().cloned().collect()))
            .unwrap_or_default()
    }

    fn children_of(&self, node: &NodeRef) -> Vec<NodeRef> {
        self.edges
            .read()
            .ok()
            .and_then(|m| m.get(node).map(|s| s.iter().cloned().collect()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(id: &str) -> NodeRef {
        NodeRef::Resource(ResourceId::new(id))
    }

    #[test]
    fn test_in_memory_graph_adjacency() {
        let g = InMemoryGraph::new();
        let ph = NodeRef::Placeholder(PlaceholderHandle::new(1));
        g.add_edge(res("a"), ph.clone());
        g.add_edge(ph.clone(), res("b"));

        assert_eq!(g.parents_of(&ph), vec![res("a")]);
        assert_eq!(g.children_of(&ph), vec![res("b")]);
        assert!(g.parents_of(&res("a")).is_empty());
    }

    #[test]
    fn test_hub_delivers_events() {
        let hub = GraphEventHub::new();
        let stream = hub.subscribe(16).unwrap();

        let ev = GraphEvent::AddEdge {
            from: res("a"),
            to: res("b"),
            constraint_id: "c1".to_string(),
        };
        hub.publish(std::slice::from_ref(&ev)).unwrap();
        assert_eq!(stream.drain(), vec![ev]);
    }

    #[test]
    fn test_hub_drops_overflow_without_blocking() {
        let hub = GraphEventHub::new();
        let stream = hub.subscribe(1).unwrap();

        let evs: Vec<GraphEvent> = (0..3)
            .map(|i| GraphEvent::RemoveVertex {
                placeholder: PlaceholderHandle::new(i),
            })
            .collect();
        hub.publish(&evs).unwrap();
        // Capacity 1: only the first event fits.
        assert_eq!(stream.drain().len(), 1);
    }

    #[test]
    fn test_node_ref_accessors() {
        let r = res("a");
        assert!(r.as_placeholder().is_none());
        assert_eq!(r.as_resource().unwrap().as_str(), "a");

        let p = NodeRef::Placeholder(PlaceholderHandle::new(7));
        assert_eq!(p.as_placeholder().unwrap().value(), 7);
        assert!(p.as_resource().is_none());
    }
}
