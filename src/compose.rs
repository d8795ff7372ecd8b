//! Constraint-set composition.
//!
//! Given a placeholder and the resources adjacent to it in the
//! interactive graph, the composer builds or extends the underlying
//! `ResourceSet` pair for colocation and for order, allocating fresh
//! identifiers when none exist and probing the live inventory to avoid
//! colliding with concurrently created sets.
//!
//! Composition is deterministic and idempotent: composing twice with the
//! same inputs against an unchanged live view produces identical sets.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::connection::{ConstraintKind, ResourceSetConnection};
use crate::error::{ComposeError, CrmError, CrmResult};
use crate::live::LiveView;
use crate::placeholder::ConstraintPlaceholder;
use crate::resource::ResourceId;
use crate::rsc_set::ResourceSet;
use crate::version::{require_all_allowed, CrmVersion};

/// The up-to-four sets produced by one composition. Slots for a kind
/// that was not requested stay `None` and must be omitted from the
/// outbound directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedSets {
    /// Colocation from-side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub col1: Option<ResourceSet>,
    /// Colocation far side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub col2: Option<ResourceSet>,
    /// Order from-side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ord1: Option<ResourceSet>,
    /// Order far side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ord2: Option<ResourceSet>,
}

impl ComposedSets {
    /// True when no set was produced.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.col1.is_none() && self.col2.is_none() && self.ord1.is_none() && self.ord2.is_none()
    }
}

/// Builds and grows the resource-set pairs behind a placeholder.
pub struct Composer<'a> {
    live: &'a dyn LiveView,
    version: Option<CrmVersion>,
}

impl<'a> Composer<'a> {
    /// Creates a composer over the given live view. An unknown version
    /// suppresses version-gated attributes rather than failing.
    #[must_use]
    pub fn new(live: &'a dyn LiveView, version: Option<CrmVersion>) -> Self {
        Self { live, version }
    }

    /// Composes the requested kinds for `placeholder`.
    ///
    /// `adjacent` lists every resource attached to the placeholder in the
    /// interactive graph, in attachment order; `from_side` marks which of
    /// them sit on the incoming side. The placeholder's connections are
    /// updated in place so later compositions grow the same pair.
    ///
    /// # Errors
    /// `ComposeError::NothingRequested` when neither kind is requested.
    ///
    /// # Panics
    /// When `from_side` contains a resource not present in `adjacent`;
    /// that is a programming error in the caller.
    pub fn compose(
        &self,
        placeholder: &mut ConstraintPlaceholder,
        seed: u64,
        adjacent: &[ResourceId],
        from_side: &HashSet<ResourceId>,
        want_colocation: bool,
        want_order: bool,
    ) -> CrmResult<ComposedSets> {
        if !want_colocation && !want_order {
            return Err(CrmError::Compose(ComposeError::NothingRequested));
        }
        assert!(
            from_side.iter().all(|r| adjacent.contains(r)),
            "from_side must be drawn from the adjacent resources"
        );

        let mut out = ComposedSets::default();
        if want_colocation {
            let (s1, s2) =
                self.compose_kind(ConstraintKind::Colocation, placeholder, seed, adjacent, from_side);
            out.col1 = Some(s1);
            out.col2 = Some(s2);
        }
        if want_order {
            let (s1, s2) =
                self.compose_kind(ConstraintKind::Order, placeholder, seed, adjacent, from_side);
            out.ord1 = Some(s1);
            out.ord2 = Some(s2);
        }
        Ok(out)
    }

    /// Extends a chain by one hop: the new connection shares the previous
    /// hop's constraint id, its from-side is the previous far side (the
    /// boundary set), and its far side is a fresh set holding `members`.
    pub fn compose_next_hop(
        &self,
        placeholder: &mut ConstraintPlaceholder,
        kind: ConstraintKind,
        prev: &ResourceSetConnection,
        position: i32,
        members: &[ResourceId],
        seed: u64,
    ) -> CrmResult<(ResourceSet, ResourceSet)> {
        if let Some(existing) = placeholder.connection(kind) {
            // Already linked into this constraint: grow the far side only.
            if existing.constraint_id == prev.constraint_id {
                let mut conn = existing.clone();
                if let Some(far) = conn.set2.as_mut() {
                    for m in members {
                        far.append_member(m.clone());
                    }
                }
                placeholder.replace_connection(kind, conn);
                return Ok(stored_pair(placeholder, kind));
            }
        }

        let boundary = prev
            .set2
            .clone()
            .expect("chain predecessor has a far side");
        let (far_id, _) = self.fresh_id(kind.id_prefix(), seed);
        let mut far = self.blank_set(far_id, placeholder.preference.require_all());
        for m in members {
            far.append_member(m.clone());
        }

        let conn = ResourceSetConnection {
            constraint_id: prev.constraint_id.clone(),
            kind,
            set1: Some(boundary),
            set2: Some(far),
            position,
        };
        placeholder.write_connection(kind, conn);
        Ok(stored_pair(placeholder, kind))
    }

    fn compose_kind(
        &self,
        kind: ConstraintKind,
        placeholder: &mut ConstraintPlaceholder,
        seed: u64,
        adjacent: &[ResourceId],
        from_side: &HashSet<ResourceId>,
    ) -> (ResourceSet, ResourceSet) {
        if placeholder.connection(kind).is_none() {
            self.create_pair(kind, placeholder, seed);
        }
        self.grow_pair(kind, placeholder, seed, adjacent, from_side);
        stored_pair(placeholder, kind)
    }

    /// Fresh pair. The from-side is forced `require-all`
    /// (all sources must be satisfied) and non-sequential; the far side
    /// carries the placeholder's AND/OR-derived `require-all` and starts
    /// empty, to be grown as resources attach.
    fn create_pair(&self, kind: ConstraintKind, placeholder: &mut ConstraintPlaceholder, seed: u64) {
        let prefix = kind.id_prefix();
        let (id1, n1) = self.fresh_id(prefix, seed);
        let (id2, _) = self.fresh_id(prefix, n1 + 1);

        // Both sides start empty; the grow pass places the members, so
        // ordering rules live in exactly one place.
        let set1 = self.blank_set(id1, true);
        let set2 = self.blank_set(id2, placeholder.preference.require_all());

        let conn = ResourceSetConnection {
            constraint_id: format!("{}_{n1}", kind.name()),
            kind,
            set1: Some(set1),
            set2: Some(set2),
            position: 0,
        };
        placeholder.write_connection(kind, conn);
    }

    /// Growth pass: place each adjacent resource on its side, matching a
    /// live set with the same computed attributes where one exists,
    /// otherwise extending the previously known side. Colocation
    /// from-side members prepend; everything else appends.
    fn grow_pair(
        &self,
        kind: ConstraintKind,
        placeholder: &mut ConstraintPlaceholder,
        seed: u64,
        adjacent: &[ResourceId],
        from_side: &HashSet<ResourceId>,
    ) {
        let Some(existing) = placeholder.connection(kind).cloned() else {
            return;
        };
        let live_sets = if existing.has_constraint_id() {
            self.live.sets_for_constraint(&existing.constraint_id)
        } else {
            Vec::new()
        };

        let mut conn = existing;
        for rsc in adjacent {
            let on_from_side = from_side.contains(rsc);
            let template = if on_from_side {
                self.blank_set(String::new(), true)
            } else {
                self.blank_set(String::new(), placeholder.preference.require_all())
            };

            let side = if on_from_side {
                &mut conn.set1
            } else {
                &mut conn.set2
            };

            match side.as_mut() {
                Some(set) => {
                    // Pick up concurrent growth the live system reports
                    // under the same set id.
                    if let Some(live_set) = live_sets.iter().find(|s| s.id == set.id) {
                        if live_set.members.len() > set.members.len()
                            && set.is_member_subset_of(live_set)
                        {
                            *set = live_set.clone();
                        }
                    }
                    place_member(set, rsc.clone(), kind, on_from_side);
                }
                None => {
                    // No set on this side yet: join a live set with the
                    // same attributes, else synthesize a fresh one.
                    let mut set = live_sets
                        .iter()
                        .find(|s| s.same_attributes(&template))
                        .cloned()
                        .unwrap_or_else(|| {
                            let (id, _) = self.fresh_id(kind.id_prefix(), seed);
                            let mut s = template.clone();
                            s.id = id;
                            s
                        });
                    place_member(&mut set, rsc.clone(), kind, on_from_side);
                    *side = Some(set);
                }
            }
        }

        placeholder.replace_connection(kind, conn);
    }

    fn blank_set(&self, id: String, require_all: bool) -> ResourceSet {
        let mut set = ResourceSet::new(id);
        set.sequential = false;
        set.require_all = require_all_allowed(self.version).then_some(require_all);
        set
    }

    /// Probes the live inventory for the first free numeric-suffixed id
    /// at or above `start`.
    fn fresh_id(&self, prefix: &str, start: u64) -> (String, u64) {
        let mut n = start;
        loop {
            let id = format!("{prefix}{n}");
            if !self.live.has_set_id(&id) {
                return (id, n);
            }
            n += 1;
        }
    }
}

fn place_member(set: &mut ResourceSet, member: ResourceId, kind: ConstraintKind, from_side: bool) {
    if kind == ConstraintKind::Colocation && from_side {
        set.prepend_member(member);
    } else {
        set.append_member(member);
    }
}

fn stored_pair(placeholder: &ConstraintPlaceholder, kind: ConstraintKind) -> (ResourceSet, ResourceSet) {
    let conn = placeholder
        .connection(kind)
        .expect("composition just attached this connection");
    (
        conn.set1.clone().expect("composed connection has a from-side"),
        conn.set2.clone().expect("composed connection has a far side"),
    )
}
