//! Chain detection and single-directive commit.
//!
//! Placeholders connected transitively through the interactive graph
//! (resources between them acting as boundary sets) commit as one
//! combined CRM command per chain, not one per edge. The group aggregator
//! remembers which physical links were already composed so the composer
//! is never invoked twice for the same link.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::compose::Composer;
use crate::connection::ConstraintKind;
use crate::directive::{ApplySetsDirective, DirectiveSet, DirectiveSink};
use crate::error::{ComposeError, CrmError, CrmResult, ReconcileError};
use crate::graph::{GraphAdjacency, NodeRef};
use crate::live::LiveView;
use crate::placeholder::ConstraintPlaceholder;
use crate::registry::{PlaceholderHandle, PlaceholderRegistry};
use crate::resource::ResourceId;
use crate::rsc_set::ResourceSet;
use crate::version::CrmVersion;

/// Identifier of a placeholder chain group.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GroupId(u64);

impl GroupId {
    /// Wraps a raw group id.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grp#{}", self.0)
    }
}

/// Bookkeeping for one chain of placeholders.
///
/// Tracks membership, the physical links already composed in the current
/// chain, and the constraint ids the chain spans per kind.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderGroup {
    id: GroupId,
    members: Vec<PlaceholderHandle>,
    matched_links: HashSet<(u64, u64)>,
    colocation_ids: BTreeSet<String>,
    order_ids: BTreeSet<String>,
}

impl PlaceholderGroup {
    /// Creates an empty group.
    #[must_use]
    pub fn new(id: GroupId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// The group id.
    #[must_use]
    pub const fn id(&self) -> GroupId {
        self.id
    }

    /// Adds a member placeholder, ignoring duplicates.
    pub fn add_member(&mut self, handle: PlaceholderHandle) {
        if !self.members.contains(&handle) {
            self.members.push(handle);
        }
    }

    /// Member placeholders in chain order.
    #[must_use]
    pub fn members(&self) -> &[PlaceholderHandle] {
        &self.members
    }

    /// Marks a physical link as composed. Returns false when the link was
    /// already matched in this chain (the composer must not run again).
    pub fn link_matched(&mut self, parent: PlaceholderHandle, child: PlaceholderHandle) -> bool {
        self.matched_links.insert((parent.value(), child.value()))
    }

    /// Records a constraint id the chain now spans.
    pub fn absorb(&mut self, kind: ConstraintKind, constraint_id: impl Into<String>) {
        let id = constraint_id.into();
        if id.is_empty() {
            return;
        }
        match kind {
            ConstraintKind::Colocation => self.colocation_ids.insert(id),
            ConstraintKind::Order => self.order_ids.insert(id),
        };
    }

    /// Absorbs the carry-over joins a reconcile pass reported for this
    /// group, so later sets extend one group rather than duplicating it.
    pub fn absorb_joins(&mut self, joins: &[(GroupId, ConstraintKind, String)]) {
        for (gid, kind, id) in joins {
            if *gid == self.id {
                self.absorb(*kind, id.clone());
            }
        }
    }

    /// Constraint ids spanned per kind.
    #[must_use]
    pub fn constraint_ids(&self, kind: ConstraintKind) -> &BTreeSet<String> {
        match kind {
            ConstraintKind::Colocation => &self.colocation_ids,
            ConstraintKind::Order => &self.order_ids,
        }
    }
}

/// Live view overlay marking ids composed earlier in the same commit as
/// taken. The real inventory only learns about a set once the directive
/// lands, so without this a later hop could reuse an id the head just
/// synthesized.
struct ReservingView<'a> {
    inner: &'a dyn LiveView,
    reserved: Mutex<HashSet<String>>,
}

impl<'a> ReservingView<'a> {
    fn new(inner: &'a dyn LiveView) -> Self {
        Self {
            inner,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    fn reserve(&self, set: Option<&ResourceSet>) {
        if let (Some(set), Ok(mut ids)) = (set, self.reserved.lock()) {
            ids.insert(set.id.clone());
        }
    }
}

impl LiveView for ReservingView<'_> {
    fn has_set_id(&self, set_id: &str) -> bool {
        self.reserved
            .lock()
            .map(|ids| ids.contains(set_id))
            .unwrap_or(false)
            || self.inner.has_set_id(set_id)
    }

    fn sets_for_constraint(&self, constraint_id: &str) -> Vec<ResourceSet> {
        self.inner.sets_for_constraint(constraint_id)
    }
}

/// Walks a placeholder chain and commits it as one batched directive.
pub struct ChainCommitter<'a> {
    registry: &'a PlaceholderRegistry,
    graph: &'a dyn GraphAdjacency,
    live: &'a dyn LiveView,
    version: Option<CrmVersion>,
}

impl<'a> ChainCommitter<'a> {
    /// Creates a committer over the given collaborators.
    #[must_use]
    pub fn new(
        registry: &'a PlaceholderRegistry,
        graph: &'a dyn GraphAdjacency,
        live: &'a dyn LiveView,
        version: Option<CrmVersion>,
    ) -> Self {
        Self {
            registry,
            graph,
            live,
            version,
        }
    }

    /// Commits the chain starting at `head`.
    ///
    /// The chain is walked forward while the next element is an unlinked
    /// new placeholder whose graph-parents are exactly the current
    /// placeholder's graph-children. Each hop is composed once (guarded
    /// by the group's link bookkeeping) and the whole chain goes out as a
    /// single directive: one order id accumulated front-to-back, the
    /// colocation sets structurally mirrored. A chain of length 1 is the
    /// ordinary two-set composition.
    ///
    /// # Errors
    /// `ComposeError::NotChainHead` when `head` has placeholder parents;
    /// `ComposeError::SinkRejected` when the transport declines the
    /// directive (the registry is left untouched in that case).
    pub fn commit(
        &self,
        head: PlaceholderHandle,
        sink: &dyn DirectiveSink,
    ) -> CrmResult<ApplySetsDirective> {
        let head_node = NodeRef::Placeholder(head);
        if self
            .graph
            .parents_of(&head_node)
            .iter()
            .any(|p| p.as_placeholder().is_some())
        {
            return Err(CrmError::Compose(ComposeError::NotChainHead {
                placeholder: head.to_string(),
            }));
        }

        let chain = self.walk_chain(head)?;

        // A head that already belongs to a group (an earlier commit, or a
        // carry-over join) extends that group; otherwise the chain founds
        // one keyed by the head's handle.
        let head_ph = self
            .registry
            .get(head)?
            .ok_or(CrmError::Reconcile(ReconcileError::UnknownHandle {
                handle: head.value(),
            }))?;
        let group_id = head_ph
            .group
            .unwrap_or_else(|| GroupId::new(head.value()));
        let mut group = self
            .registry
            .group(group_id)?
            .unwrap_or_else(|| PlaceholderGroup::new(group_id));
        for h in &chain {
            group.add_member(*h);
        }

        // Exclusive sections for every chain member, taken in chain order,
        // so reconcile never races a commit of the same placeholder.
        let sections = chain
            .iter()
            .map(|h| self.registry.commit_section(*h))
            .collect::<CrmResult<Vec<_>>>()?;
        let _guards = sections
            .iter()
            .map(|s| s.enter())
            .collect::<CrmResult<Vec<_>>>()?;

        let reserving = ReservingView::new(self.live);
        let composer = Composer::new(&reserving, self.version);
        let mut updated: Vec<(PlaceholderHandle, ConstraintPlaceholder)> = Vec::new();
        let mut order_sets: Vec<DirectiveSet> = Vec::new();
        let mut colocation_sets: Vec<DirectiveSet> = Vec::new();
        let mut directive = ApplySetsDirective::default();

        for (idx, handle) in chain.iter().enumerate() {
            let mut ph = self
                .registry
                .get(*handle)?
                .ok_or(CrmError::Reconcile(ReconcileError::UnknownHandle {
                    handle: handle.value(),
                }))?;
            ph.group = Some(group.id());

            let parents = self.resource_neighbors(*handle, true);
            let children = self.resource_neighbors(*handle, false);

            if idx == 0 {
                let existed_col = ph.colocation.is_some();
                let existed_ord = ph.order.is_some();

                let mut adjacent = parents.clone();
                adjacent.extend(children.iter().cloned());
                let from_side: HashSet<ResourceId> = parents.iter().cloned().collect();
                let composed =
                    composer.compose(&mut ph, handle.value(), &adjacent, &from_side, true, true)?;

                let col = ph.colocation.as_ref().expect("head composed colocation");
                let ord = ph.order.as_ref().expect("head composed order");
                directive.colocation_id = Some(col.constraint_id.clone());
                directive.create_colocation = !existed_col;
                directive.order_id = Some(ord.constraint_id.clone());
                directive.create_order = !existed_ord;
                group.absorb(ConstraintKind::Colocation, col.constraint_id.clone());
                group.absorb(ConstraintKind::Order, ord.constraint_id.clone());

                reserving.reserve(composed.col1.as_ref());
                reserving.reserve(composed.col2.as_ref());
                reserving.reserve(composed.ord1.as_ref());
                reserving.reserve(composed.ord2.as_ref());

                push_set(&mut order_sets, composed.ord1);
                push_set(&mut order_sets, composed.ord2);
                push_set(&mut colocation_sets, composed.col2);
                push_set(&mut colocation_sets, composed.col1);
            } else {
                let parent = chain[idx - 1];
                let prev = updated
                    .last()
                    .map(|(_, p)| p)
                    .expect("chain hops follow the head");

                if group.link_matched(parent, *handle) {
                    let prev_ord = prev.order.clone().expect("chain predecessor has order");
                    let (_, ord2) = composer.compose_next_hop(
                        &mut ph,
                        ConstraintKind::Order,
                        &prev_ord,
                        prev_ord.position + 1,
                        &children,
                        handle.value(),
                    )?;
                    reserving.reserve(Some(&ord2));
                    push_set(&mut order_sets, Some(ord2));

                    let prev_col = prev
                        .colocation
                        .clone()
                        .expect("chain predecessor has colocation");
                    let (_, col2) = composer.compose_next_hop(
                        &mut ph,
                        ConstraintKind::Colocation,
                        &prev_col,
                        prev_col.position + 1,
                        &children,
                        handle.value(),
                    )?;
                    // Colocation mirrors the order chain structurally.
                    reserving.reserve(Some(&col2));
                    colocation_sets.insert(0, DirectiveSet::plain(col2));
                } else {
                    // Link composed by an earlier commit of this group: its
                    // stored far sides still ride along so the outbound
                    // write covers the whole chain.
                    if let Some(far) = ph.order.as_ref().and_then(|c| c.set2.clone()) {
                        reserving.reserve(Some(&far));
                        push_set(&mut order_sets, Some(far));
                    }
                    if let Some(far) = ph.colocation.as_ref().and_then(|c| c.set2.clone()) {
                        reserving.reserve(Some(&far));
                        colocation_sets.insert(0, DirectiveSet::plain(far));
                    }
                }
            }

            ph.is_new = false;
            updated.push((*handle, ph));
        }

        directive.order_sets = order_sets;
        directive.colocation_sets = colocation_sets;

        sink.apply_resource_sets(directive.clone()).map_err(|e| {
            CrmError::Compose(ComposeError::SinkRejected {
                message: e.to_string(),
            })
        })?;

        // The sink accepted the batch: the chain is live now.
        for (handle, ph) in updated {
            self.registry.update(handle, ph)?;
        }
        self.registry.store_group(group)?;

        Ok(directive)
    }

    /// Structural chain walk: the next element is an unlinked new
    /// placeholder whose resource parents are exactly the current
    /// placeholder's resource children.
    fn walk_chain(&self, head: PlaceholderHandle) -> CrmResult<Vec<PlaceholderHandle>> {
        let snapshot = self.registry.snapshot()?;
        let mut chain = vec![head];
        let mut current = head;

        loop {
            let boundary: BTreeSet<ResourceId> = self
                .resource_neighbors(current, false)
                .into_iter()
                .collect();
            if boundary.is_empty() {
                break;
            }

            let next = snapshot.entries().iter().find(|(handle, ph)| {
                if chain.contains(handle) || !ph.is_new || !ph.is_empty() {
                    return false;
                }
                let parents: BTreeSet<ResourceId> = self
                    .resource_neighbors(*handle, true)
                    .into_iter()
                    .collect();
                !parents.is_empty() && parents == boundary
            });

            match next {
                Some((handle, _)) => {
                    chain.push(*handle);
                    current = *handle;
                }
                None => break,
            }
        }

        Ok(chain)
    }

    fn resource_neighbors(&self, handle: PlaceholderHandle, parents: bool) -> Vec<ResourceId> {
        let node = NodeRef::Placeholder(handle);
        let nodes = if parents {
            self.graph.parents_of(&node)
        } else {
            self.graph.children_of(&node)
        };
        nodes
            .into_iter()
            .filter_map(|n| n.as_resource().cloned())
            .collect()
    }
}

fn push_set(sets: &mut Vec<DirectiveSet>, set: Option<ResourceSet>) {
    if let Some(set) = set {
        sets.push(DirectiveSet::plain(set));
    }
}
