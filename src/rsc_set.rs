//! Resource sets: one ordered side of a set constraint.
//!
//! A `ResourceSet` is an ordered group of resources treated as a single
//! side of an order or colocation relationship. Member order matters when
//! `sequential` is true (members start/stop in list order).

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::resource::ResourceId;

/// One ordered member list of a set constraint.
///
/// Equality is structural over the id, the ordered member list, and the
/// flags; it is used for matching live records, not for object identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSet {
    /// Set id, unique within the owning connection's constraint id.
    pub id: String,

    /// Ordered member resource ids; unique within the set.
    pub members: Vec<ResourceId>,

    /// Whether members execute in list order (true) or in parallel.
    #[serde(default)]
    pub sequential: bool,

    /// Colocation-only tri-state: whether every member must be
    /// satisfiable. `None` means the attribute is unset/omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_all: Option<bool>,

    /// CRM action tag for order semantics (e.g. "start", "stop").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_action: Option<String>,

    /// CRM role tag for colocation semantics (e.g. "Master").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colocation_role: Option<String>,
}

impl ResourceSet {
    /// Creates an empty set with the given id and default flags.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: Vec::new(),
            sequential: false,
            require_all: None,
            order_action: None,
            colocation_role: None,
        }
    }

    /// Creates a set with the given id and members.
    #[must_use]
    pub fn with_members(id: impl Into<String>, members: Vec<ResourceId>) -> Self {
        Self {
            members,
            ..Self::new(id)
        }
    }

    /// Returns true if the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Rejects empty member ids and duplicate members.
    ///
    /// # Errors
    /// `ValidationError::EmptyResourceId` or
    /// `ValidationError::DuplicateMember` respectively.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (idx, member) in self.members.iter().enumerate() {
            if member.is_empty() {
                return Err(ValidationError::EmptyResourceId);
            }
            if self.members[..idx].contains(member) {
                return Err(ValidationError::DuplicateMember {
                    set_id: self.id.clone(),
                    member: member.as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns true if `member` is in the set.
    #[must_use]
    pub fn contains(&self, member: &ResourceId) -> bool {
        self.members.contains(member)
    }

    /// Appends a member unless it is already present. Returns whether the
    /// set changed.
    pub fn append_member(&mut self, member: ResourceId) -> bool {
        if self.contains(&member) {
            return false;
        }
        self.members.push(member);
        true
    }

    /// Prepends a member unless it is already present. Returns whether the
    /// set changed.
    pub fn prepend_member(&mut self, member: ResourceId) -> bool {
        if self.contains(&member) {
            return false;
        }
        self.members.insert(0, member);
        true
    }

    /// Returns true if every member of `self` appears in `other`.
    /// Order is not significant for containment.
    #[must_use]
    pub fn is_member_subset_of(&self, other: &Self) -> bool {
        self.members.iter().all(|m| other.contains(m))
    }

    /// Returns true if the flag attributes (everything except id and
    /// members) match. Used to find a live set a new member can join.
    #[must_use]
    pub fn same_attributes(&self, other: &Self) -> bool {
        self.sequential == other.sequential
            && self.require_all == other.require_all
            && self.order_action == other.order_action
            && self.colocation_role == other.colocation_role
    }

    /// The member immediately after `member` in list order, when the set
    /// is sequential.
    #[must_use]
    pub fn next_member(&self, member: &ResourceId) -> Option<&ResourceId> {
        if !self.sequential {
            return None;
        }
        let idx = self.members.iter().position(|m| m == member)?;
        self.members.get(idx + 1)
    }

    /// The member immediately before `member` in list order, when the set
    /// is sequential.
    #[must_use]
    pub fn prev_member(&self, member: &ResourceId) -> Option<&ResourceId> {
        if !self.sequential {
            return None;
        }
        let idx = self.members.iter().position(|m| m == member)?;
        idx.checked_sub(1).and_then(|i| self.members.get(i))
    }
}
