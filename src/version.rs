//! Cluster-manager version gating.
//!
//! Some set attributes are only understood by newer cluster managers.
//! When the live version is unknown or too old the composer omits the
//! attribute instead of failing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A parsed `major.minor.patch` CRM version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CrmVersion {
    /// Major version component.
    pub major: u32,
    /// Minor version component.
    pub minor: u32,
    /// Patch version component.
    pub patch: u32,
}

impl CrmVersion {
    /// First version understanding the `require-all` set attribute.
    pub const REQUIRE_ALL_MIN: Self = Self {
        major: 1,
        minor: 1,
        patch: 12,
    };

    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether this version understands `require-all`.
    #[must_use]
    pub fn supports_require_all(&self) -> bool {
        *self >= Self::REQUIRE_ALL_MIN
    }
}

/// Whether `require-all` may be emitted for an optionally-known version.
/// Unknown versions are treated as unsupported.
#[must_use]
pub fn require_all_allowed(version: Option<CrmVersion>) -> bool {
    version.is_some_and(|v| v.supports_require_all())
}

impl fmt::Display for CrmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for CrmVersion {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidVersion { raw: s.to_string() };

        // Tolerate build suffixes like "1.1.12-rc1".
        let core = s.split(['-', '+']).next().unwrap_or("");
        let mut parts = core.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let patch = match parts.next() {
            None => 0,
            Some(p) => p.parse().map_err(|_| invalid())?,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_version() {
        let v: CrmVersion = "1.1.12".parse().unwrap();
        assert_eq!(v, CrmVersion::new(1, 1, 12));
    }

    #[test]
    fn test_parse_without_patch() {
        let v: CrmVersion = "2.0".parse().unwrap();
        assert_eq!(v, CrmVersion::new(2, 0, 0));
    }

    #[test]
    fn test_parse_with_suffix() {
        let v: CrmVersion = "1.1.12-rc1".parse().unwrap();
        assert_eq!(v, CrmVersion::new(1, 1, 12));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<CrmVersion>().is_err());
        assert!("abc".parse::<CrmVersion>().is_err());
        assert!("1.2.3.4".parse::<CrmVersion>().is_err());
    }

    #[test]
    fn test_require_all_gate() {
        assert!(CrmVersion::new(1, 1, 12).supports_require_all());
        assert!(CrmVersion::new(2, 0, 0).supports_require_all());
        assert!(!CrmVersion::new(1, 1, 11).supports_require_all());
    }

    #[test]
    fn test_unknown_version_disallows_require_all() {
        assert!(!require_all_allowed(None));
        assert!(require_all_allowed(Some(CrmVersion::new(1, 1, 12))));
        assert!(!require_all_allowed(Some(CrmVersion::new(0, 9, 0))));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", CrmVersion::new(1, 1, 12)), "1.1.12");
    }
}
