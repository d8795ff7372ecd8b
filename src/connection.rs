//! Resource-set connections: the wire-shaped constraint records.
//!
//! The status parser (out of scope here) turns the CRM's native XML into
//! flat `ResourceSetConnection` records with no stable object identity.
//! The reconciliation engine re-attaches them to placeholders on every
//! refresh; the matching helpers in this module (`equals_although_reversed`,
//! `is_subset_of`, `can_use_same_placeholder`) are what that matching is
//! built from.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::resource::ResourceId;
use crate::rsc_set::ResourceSet;

/// Which constraint relationship a connection expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Start/stop ordering between the two sides.
    Order,
    /// Same-node (or anti-) placement between the two sides.
    Colocation,
}

impl ConstraintKind {
    /// Short id prefix used when composing fresh set ids.
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::Order => "o",
            Self::Colocation => "c",
        }
    }

    /// Long name used when deriving fresh constraint ids.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Colocation => "colocation",
        }
    }
}

/// One order or colocation relationship between two resource sets.
///
/// A connection may have only one side populated while it is dangling
/// (not yet linked to a target). Both sides empty is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSetConnection {
    /// CRM constraint id; empty until assigned by the live system or by
    /// this engine.
    #[serde(default)]
    pub constraint_id: String,

    /// Order or colocation.
    pub kind: ConstraintKind,

    /// The "from" side (sources of the relationship).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set1: Option<ResourceSet>,

    /// The "to" side (targets of the relationship).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set2: Option<ResourceSet>,

    /// Disambiguates set-pairs sharing one constraint id.
    #[serde(default)]
    pub position: i32,
}

fn side_is_empty(side: Option<&ResourceSet>) -> bool {
    side.map_or(true, ResourceSet::is_empty)
}

impl ResourceSetConnection {
    /// Creates a dangling connection of the given kind with no sides.
    ///
    /// The result is malformed until at least one side is populated;
    /// callers are expected to fill a side before handing it onward.
    #[must_use]
    pub fn new(kind: ConstraintKind) -> Self {
        Self {
            constraint_id: String::new(),
            kind,
            set1: None,
            set2: None,
            position: 0,
        }
    }

    /// Creates a connection with both sides populated.
    #[must_use]
    pub fn with_sets(
        kind: ConstraintKind,
        constraint_id: impl Into<String>,
        set1: ResourceSet,
        set2: ResourceSet,
    ) -> Self {
        Self {
            constraint_id: constraint_id.into(),
            kind,
            set1: Some(set1),
            set2: Some(set2),
            position: 0,
        }
    }

    /// Rejects connections with both sides empty, and sides with empty or
    /// duplicated members.
    ///
    /// # Errors
    /// `ValidationError::MalformedConnection` when neither side holds a
    /// member; otherwise whatever the side sets reject.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_malformed() {
            return Err(ValidationError::MalformedConnection {
                constraint_id: self.constraint_id.clone(),
            });
        }
        if let Some(set) = &self.set1 {
            set.validate()?;
        }
        if let Some(set) = &self.set2 {
            set.validate()?;
        }
        Ok(())
    }

    /// True when both sides are absent or memberless.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        side_is_empty(self.set1.as_ref()) && side_is_empty(self.set2.as_ref())
    }

    /// True when this connection has a CRM-assigned constraint id.
    #[must_use]
    pub fn has_constraint_id(&self) -> bool {
        !self.constraint_id.is_empty()
    }

    /// Swaps the two sides in place.
    pub fn reverse(&mut self) {
        std::mem::swap(&mut self.set1, &mut self.set2);
    }

    /// Returns a side-swapped copy.
    #[must_use]
    pub fn reversed(&self) -> Self {
        let mut out = self.clone();
        out.reverse();
        out
    }

    /// True when `self` and `other` describe the same relationship with
    /// the sides flipped: set1 equals the other's set2 and vice versa.
    #[must_use]
    pub fn equals_although_reversed(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.constraint_id == other.constraint_id
            && self.set1 == other.set2
            && self.set2 == other.set1
    }

    /// True when every populated side of `self` is a member-subset of the
    /// corresponding side of `other`.
    ///
    /// Used for incremental growth: a live record that gained members is
    /// a superset of the connection a placeholder already holds.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        if self.kind != other.kind {
            return false;
        }
        let side_subset = |a: Option<&ResourceSet>, b: Option<&ResourceSet>| match (a, b) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a.is_member_subset_of(b),
        };
        side_subset(self.set1.as_ref(), other.set1.as_ref())
            && side_subset(self.set2.as_ref(), other.set2.as_ref())
    }

    /// True when `self` and `other` can be represented by one placeholder:
    /// equal, reversed-equal, or a subset/superset pair.
    #[must_use]
    pub fn can_use_same_placeholder(&self, other: &Self) -> bool {
        self == other
            || self.equals_although_reversed(other)
            || self.is_subset_of(other)
            || other.is_subset_of(self)
    }

    /// Composite id disambiguated by position, used when deriving
    /// placeholder ids. Empty while no constraint id is assigned.
    #[must_use]
    pub fn composite_id(&self) -> String {
        if self.constraint_id.is_empty() {
            String::new()
        } else if self.position != 0 {
            format!("{}-{}", self.constraint_id, self.position)
        } else {
            self.constraint_id.clone()
        }
    }

    /// Members of set1, empty when the side is absent.
    pub fn members_side1(&self) -> impl Iterator<Item = &ResourceId> {
        self.set1.iter().flat_map(|s| s.members.iter())
    }

    /// Members of set2, empty when the side is absent.
    pub fn members_side2(&self) -> impl Iterator<Item = &ResourceId> {
        self.set2.iter().flat_map(|s| s.members.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rset(id: &str, members: &[&str]) -> ResourceSet {
        ResourceSet::with_members(id, members.iter().map(|m| ResourceId::new(*m)).collect())
    }

    fn conn(id: &str, s1: &[&str], s2: &[&str]) -> ResourceSetConnection {
        ResourceSetConnection::with_sets(
            ConstraintKind::Colocation,
            id,
            rset("s1", s1),
            rset("s2", s2),
        )
    }

    #[test]
    fn test_both_empty_is_malformed() {
        let c = ResourceSetConnection::new(ConstraintKind::Order);
        assert!(c.is_malformed());
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_one_side_populated_is_valid() {
        let mut c = ResourceSetConnection::new(ConstraintKind::Order);
        c.set1 = Some(rset("s1", &["a"]));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_empty_member_lists_are_malformed() {
        let mut c = ResourceSetConnection::new(ConstraintKind::Colocation);
        c.set1 = Some(rset("s1", &[]));
        c.set2 = Some(rset("s2", &[]));
        assert!(c.is_malformed());
    }

    #[test]
    fn test_reverse_swaps_sides() {
        let mut c = conn("c1", &["a"], &["b"]);
        c.reverse();
        assert_eq!(c.set1.as_ref().unwrap().members[0].as_str(), "b");
        assert_eq!(c.set2.as_ref().unwrap().members[0].as_str(), "a");
    }

    #[test]
    fn test_equals_although_reversed() {
        let c = conn("c1", &["a"], &["b"]);
        let flipped = c.reversed();
        assert!(c.equals_although_reversed(&flipped));
        assert!(flipped.equals_although_reversed(&c));
        assert!(!c.equals_although_reversed(&c));
    }

    #[test]
    fn test_subset_growth_matches() {
        let small = conn("c1", &["a"], &["b"]);
        let grown = conn("c1", &["a", "x"], &["b"]);
        assert!(small.is_subset_of(&grown));
        assert!(!grown.is_subset_of(&small));
        assert!(small.can_use_same_placeholder(&grown));
    }

    #[test]
    fn test_subset_requires_matching_kind() {
        let a = conn("c1", &["a"], &["b"]);
        let mut b = conn("c1", &["a"], &["b"]);
        b.kind = ConstraintKind::Order;
        assert!(!a.is_subset_of(&b));
    }

    #[test]
    fn test_dangling_side_is_subset_of_populated() {
        let mut dangling = ResourceSetConnection::new(ConstraintKind::Colocation);
        dangling.constraint_id = "c1".to_string();
        dangling.set1 = Some(rset("s1", &["a"]));
        let full = conn("c1", &["a"], &["b"]);
        assert!(dangling.is_subset_of(&full));
        assert!(!full.is_subset_of(&dangling));
    }

    #[test]
    fn test_composite_id() {
        let mut c = conn("c1", &["a"], &["b"]);
        assert_eq!(c.composite_id(), "c1");
        c.position = 2;
        assert_eq!(c.composite_id(), "c1-2");
        c.constraint_id = String::new();
        assert_eq!(c.composite_id(), "");
    }

    #[test]
    fn test_kind_prefixes() {
        assert_eq!(ConstraintKind::Colocation.id_prefix(), "c");
        assert_eq!(ConstraintKind::Order.id_prefix(), "o");
        assert_eq!(ConstraintKind::Order.name(), "order");
    }
}
