//! Resource identity.
//!
//! Resources are the cluster manager's unit of placement. This crate only
//! ever sees their identifiers; creation, agents, and operation history
//! belong to the excluded management layers. Identifiers are assigned by
//! the live system and are plain strings, so the newtype wraps `String`
//! rather than a generated UUID.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a CRM resource, stable for the resource's lifetime.
///
/// # Examples
///
/// ```
/// use crmsets::ResourceId;
///
/// let id = ResourceId::new("vip-1");
/// assert_eq!(id.as_str(), "vip-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates a resource id from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is empty (never valid on a live resource).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_roundtrip() {
        let id = ResourceId::new("svcA");
        assert_eq!(id.as_str(), "svcA");
        assert_eq!(format!("{id}"), "svcA");
        assert!(!id.is_empty());
    }

    #[test]
    fn test_resource_id_conversions() {
        let a: ResourceId = "svcA".into();
        let b = ResourceId::from("svcA".to_string());
        assert_eq!(a, b);
        let s: String = a.into();
        assert_eq!(s, "svcA");
    }

    #[test]
    fn test_resource_id_serialization() {
        let id = ResourceId::new("db-master");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"db-master\"");
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
