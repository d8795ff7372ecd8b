//! Constraint placeholders: the AND/OR combinator nodes.
//!
//! A placeholder stands in for a resource-set boundary in the interactive
//! graph, letting several resources share one order/colocation
//! relationship without pairwise duplication. It holds at most one
//! colocation connection and one order connection, plus the reversal
//! bookkeeping the reconciliation engine needs to keep the directional UI
//! model consistent with the CRM's symmetric records.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::chain::GroupId;
use crate::connection::{ConstraintKind, ResourceSetConnection};
use crate::resource::ResourceId;

/// Boolean combinator carried by a placeholder.
///
/// Degenerates to the CRM's `require-all` attribute: AND means every
/// member of the far side must be satisfiable, OR means any one suffices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    /// All members must be satisfiable (`require-all=true`).
    And,
    /// Any member suffices (`require-all=false`).
    Or,
}

impl Preference {
    /// The `require-all` value this preference maps to.
    #[must_use]
    pub const fn require_all(self) -> bool {
        matches!(self, Self::And)
    }

    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// A named AND/OR combinator owning up to one connection per kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintPlaceholder {
    /// AND/OR combinator.
    pub preference: Preference,

    /// The colocation relationship this placeholder participates in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colocation: Option<ResourceSetConnection>,

    /// The order relationship this placeholder participates in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<ResourceSetConnection>,

    /// The next write to the colocation side must be reversed.
    #[serde(default)]
    pub reverse_colocation_pending: bool,

    /// The next write to the order side must be reversed.
    #[serde(default)]
    pub reverse_order_pending: bool,

    /// The last write to the colocation side was reversed (display-only).
    #[serde(default)]
    pub reversed_colocation: bool,

    /// The last write to the order side was reversed (display-only).
    #[serde(default)]
    pub reversed_order: bool,

    /// Colocation members whose graph edges are withheld because the
    /// resource was unknown when the connection attached. Their edges
    /// emit on the cycle the resource appears.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub unresolved_colocation: BTreeSet<ResourceId>,

    /// Order members whose graph edges are withheld likewise.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub unresolved_order: BTreeSet<ResourceId>,

    /// True from creation until the first successful commit to the live
    /// system. New placeholders participate in matching differently.
    #[serde(default)]
    pub is_new: bool,

    /// Chain group this placeholder belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,

    // Derived id, fixed on first access.
    #[serde(skip)]
    id_cell: OnceLock<String>,
}

impl PartialEq for ConstraintPlaceholder {
    fn eq(&self, other: &Self) -> bool {
        self.preference == other.preference
            && self.colocation == other.colocation
            && self.order == other.order
            && self.reverse_colocation_pending == other.reverse_colocation_pending
            && self.reverse_order_pending == other.reverse_order_pending
            && self.reversed_colocation == other.reversed_colocation
            && self.reversed_order == other.reversed_order
            && self.unresolved_colocation == other.unresolved_colocation
            && self.unresolved_order == other.unresolved_order
            && self.is_new == other.is_new
            && self.group == other.group
    }
}

impl Eq for ConstraintPlaceholder {}

impl ConstraintPlaceholder {
    /// Creates a user-composed placeholder with no connections yet.
    #[must_use]
    pub fn new(preference: Preference) -> Self {
        Self {
            preference,
            colocation: None,
            order: None,
            reverse_colocation_pending: false,
            reverse_order_pending: false,
            reversed_colocation: false,
            reversed_order: false,
            unresolved_colocation: BTreeSet::new(),
            unresolved_order: BTreeSet::new(),
            is_new: true,
            group: None,
            id_cell: OnceLock::new(),
        }
    }

    /// Creates a placeholder for a live record no existing placeholder
    /// matched. Engine-created placeholders are not "new": they mirror
    /// state that already exists on the cluster.
    #[must_use]
    pub fn from_live(connection: ResourceSetConnection) -> Self {
        let mut ph = Self::new(Preference::And);
        ph.is_new = false;
        ph.attach(connection.kind, connection, false);
        ph
    }

    /// Derived placeholder id: `ph_<order composite>_<colocation composite>`.
    ///
    /// Computed from the component constraint ids on first access and
    /// fixed thereafter, so the id survives later drift of the components
    /// (including the `is_new` transition while both ids are unset).
    pub fn id(&self) -> &str {
        self.id_cell.get_or_init(|| {
            let order_part = self.order.as_ref().map(ResourceSetConnection::composite_id);
            let col_part = self
                .colocation
                .as_ref()
                .map(ResourceSetConnection::composite_id);
            format!(
                "ph_{}_{}",
                order_part.unwrap_or_default(),
                col_part.unwrap_or_default()
            )
        })
    }

    /// The connection of the given kind, if attached.
    #[must_use]
    pub fn connection(&self, kind: ConstraintKind) -> Option<&ResourceSetConnection> {
        match kind {
            ConstraintKind::Colocation => self.colocation.as_ref(),
            ConstraintKind::Order => self.order.as_ref(),
        }
    }

    /// Mutable access to the connection of the given kind.
    pub fn connection_mut(&mut self, kind: ConstraintKind) -> Option<&mut ResourceSetConnection> {
        match kind {
            ConstraintKind::Colocation => self.colocation.as_mut(),
            ConstraintKind::Order => self.order.as_mut(),
        }
    }

    /// Attaches a connection, recording whether this write was reversed.
    /// Clears any pending reversal on that side.
    pub fn attach(&mut self, kind: ConstraintKind, connection: ResourceSetConnection, reversed: bool) {
        match kind {
            ConstraintKind::Colocation => {
                self.colocation = Some(connection);
                self.reversed_colocation = reversed;
                self.reverse_colocation_pending = false;
            }
            ConstraintKind::Order => {
                self.order = Some(connection);
                self.reversed_order = reversed;
                self.reverse_order_pending = false;
            }
        }
    }

    /// Writes a connection honoring a pending reversal request: when the
    /// side is flagged, the connection is reversed before attachment and
    /// the reversed marker is raised.
    pub fn write_connection(&mut self, kind: ConstraintKind, mut connection: ResourceSetConnection) {
        let pending = self.reverse_pending(kind);
        if pending {
            connection.reverse();
        }
        self.attach(kind, connection, pending);
    }

    /// Replaces the connection of the given kind without touching the
    /// reversal flags. Used by constraint-id carry-over, where a grown
    /// live record updates the stored sets but the side orientation (and
    /// any pending user edit) must survive.
    pub fn replace_connection(&mut self, kind: ConstraintKind, connection: ResourceSetConnection) {
        match kind {
            ConstraintKind::Colocation => self.colocation = Some(connection),
            ConstraintKind::Order => self.order = Some(connection),
        }
    }

    /// Requests that the next write to the given side be reversed.
    pub fn request_reverse(&mut self, kind: ConstraintKind) {
        match kind {
            ConstraintKind::Colocation => self.reverse_colocation_pending = true,
            ConstraintKind::Order => self.reverse_order_pending = true,
        }
    }

    /// Whether a reversal is pending on the given side.
    #[must_use]
    pub const fn reverse_pending(&self, kind: ConstraintKind) -> bool {
        match kind {
            ConstraintKind::Colocation => self.reverse_colocation_pending,
            ConstraintKind::Order => self.reverse_order_pending,
        }
    }

    /// Whether the last write to the given side was reversed.
    #[must_use]
    pub const fn reversed(&self, kind: ConstraintKind) -> bool {
        match kind {
            ConstraintKind::Colocation => self.reversed_colocation,
            ConstraintKind::Order => self.reversed_order,
        }
    }

    /// Members of the given side whose graph edges are still withheld.
    #[must_use]
    pub const fn unresolved(&self, kind: ConstraintKind) -> &BTreeSet<ResourceId> {
        match kind {
            ConstraintKind::Colocation => &self.unresolved_colocation,
            ConstraintKind::Order => &self.unresolved_order,
        }
    }

    /// Mutable access to the withheld-member set of the given side.
    pub fn unresolved_mut(&mut self, kind: ConstraintKind) -> &mut BTreeSet<ResourceId> {
        match kind {
            ConstraintKind::Colocation => &mut self.unresolved_colocation,
            ConstraintKind::Order => &mut self.unresolved_order,
        }
    }

    /// True when neither connection is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colocation.is_none() && self.order.is_none()
    }

    /// True when any side carries a pending reversal (a local edit the
    /// user has not committed yet).
    #[must_use]
    pub const fn has_pending_edit(&self) -> bool {
        self.reverse_colocation_pending || self.reverse_order_pending
    }

    /// Display label for the combinator.
    ///
    /// A plain (single-member-per-side, non-sequential) colocation always
    /// displays as AND: `require-all` has no effect when paired with an
    /// unconditional colocation.
    #[must_use]
    pub fn main_label(&self) -> &'static str {
        if self.is_new {
            return self.preference.label();
        }
        if let Some(col) = &self.colocation {
            let plain_side = |s: &Option<crate::rsc_set::ResourceSet>| {
                s.as_ref()
                    .map_or(true, |set| set.members.len() <= 1 && !set.sequential)
            };
            if plain_side(&col.set1) && plain_side(&col.set2) {
                return Preference::And.label();
            }
        }
        self.preference.label()
    }

    /// True when the placeholder's connection of the given kind has no
    /// assigned constraint id yet, or its id textually equals the other's.
    #[must_use]
    pub fn same_constraint_id(&self, kind: ConstraintKind, other: &ResourceSetConnection) -> bool {
        match self.connection(kind) {
            None => true,
            Some(own) if !own.has_constraint_id() => true,
            Some(own) => own.constraint_id == other.constraint_id,
        }
    }

    /// The member after `member` in a sequential set on the given side.
    ///
    /// Lets the interactive graph draw intra-set ordering without a full
    /// constraint object per adjacent pair.
    #[must_use]
    pub fn next_in_sequence(
        &self,
        member: &ResourceId,
        colocation_side: bool,
    ) -> Option<&ResourceId> {
        let kind = if colocation_side {
            ConstraintKind::Colocation
        } else {
            ConstraintKind::Order
        };
        let conn = self.connection(kind)?;
        conn.set1
            .as_ref()
            .and_then(|s| s.next_member(member))
            .or_else(|| conn.set2.as_ref().and_then(|s| s.next_member(member)))
    }

    /// The member before `member` in a sequential set on the given side.
    #[must_use]
    pub fn prev_in_sequence(
        &self,
        member: &ResourceId,
        colocation_side: bool,
    ) -> Option<&ResourceId> {
        let kind = if colocation_side {
            ConstraintKind::Colocation
        } else {
            ConstraintKind::Order
        };
        let conn = self.connection(kind)?;
        conn.set1
            .as_ref()
            .and_then(|s| s.prev_member(member))
            .or_else(|| conn.set2.as_ref().and_then(|s| s.prev_member(member)))
    }
}
