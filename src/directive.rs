//! Outbound CRM directives.
//!
//! A commit produces a single batched "apply resource sets" command
//! covering colocation and order together. The transport that actually
//! delivers it to a cluster node is an external collaborator behind
//! [`DirectiveSink`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CrmResult;
use crate::rsc_set::ResourceSet;

/// Named attributes attached to one outbound set (e.g. score).
pub type SetAttrs = BTreeMap<String, String>;

/// One entry in an outbound set list: the set plus attributes for it.
/// `attrs` is `None` except on the set actually receiving new named
/// attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveSet {
    /// The resource set to write.
    pub set: ResourceSet,

    /// Attributes for this set, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attrs: Option<SetAttrs>,
}

impl DirectiveSet {
    /// A set entry with no extra attributes.
    #[must_use]
    pub const fn plain(set: ResourceSet) -> Self {
        Self { set, attrs: None }
    }
}

/// The single batched "apply resource sets" command emitted per commit.
///
/// Unused slots are `None` and are omitted from the serialized form, never
/// sent as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySetsDirective {
    /// Colocation constraint id, when colocation is part of this commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colocation_id: Option<String>,

    /// Whether the colocation constraint must be created (vs. updated).
    #[serde(default)]
    pub create_colocation: bool,

    /// Order constraint id, when order is part of this commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,

    /// Whether the order constraint must be created (vs. updated).
    #[serde(default)]
    pub create_order: bool,

    /// Ordered colocation sets to write.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub colocation_sets: Vec<DirectiveSet>,

    /// Ordered order sets to write.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_sets: Vec<DirectiveSet>,

    /// Extra constraint-level attributes (e.g. score) keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_attributes: BTreeMap<String, String>,
}

impl ApplySetsDirective {
    /// True when the directive carries nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colocation_sets.is_empty() && self.order_sets.is_empty()
    }
}

/// Serializes a directive to pretty-printed JSON for the transport layer.
pub fn to_json_pretty(directive: &ApplySetsDirective) -> CrmResult<String> {
    serde_json::to_string_pretty(directive)
        .map_err(|e| crate::error::CrmError::internal(format!("directive serialization: {e}")))
}

/// Deserializes a directive from JSON.
pub fn from_json(json: &str) -> CrmResult<ApplySetsDirective> {
    serde_json::from_str(json)
        .map_err(|e| crate::error::CrmError::internal(format!("directive deserialization: {e}")))
}

/// The outbound transport seam: applies one batched directive against the
/// live cluster.
pub trait DirectiveSink: Send + Sync {
    /// Applies the directive.
    ///
    /// # Errors
    /// Transport failures surface as `ComposeError::SinkRejected` wrapped
    /// by the caller.
    fn apply_resource_sets(&self, directive: ApplySetsDirective) -> CrmResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceId;

    fn rset(id: &str, members: &[&str]) -> ResourceSet {
        ResourceSet::with_members(id, members.iter().map(|m| ResourceId::new(*m)).collect())
    }

    #[test]
    fn test_empty_directive() {
        let d = ApplySetsDirective::default();
        assert!(d.is_empty());
        assert!(d.colocation_id.is_none());
    }

    #[test]
    fn test_unused_slots_are_omitted_from_json() {
        let d = ApplySetsDirective {
            order_id: Some("o1".to_string()),
            create_order: true,
            order_sets: vec![DirectiveSet::plain(rset("o1a", &["a"]))],
            ..Default::default()
        };
        let json = to_json_pretty(&d).unwrap();
        assert!(!json.contains("colocation_id"));
        assert!(!json.contains("colocation_sets"));
        assert!(json.contains("\"order_id\""));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut attrs = SetAttrs::new();
        attrs.insert("score".to_string(), "INFINITY".to_string());
        let d = ApplySetsDirective {
            colocation_id: Some("c1".to_string()),
            create_colocation: false,
            colocation_sets: vec![DirectiveSet {
                set: rset("c1a", &["a", "b"]),
                attrs: Some(attrs),
            }],
            ..Default::default()
        };
        let back = from_json(&to_json_pretty(&d).unwrap()).unwrap();
        assert_eq!(back, d);
    }
}
