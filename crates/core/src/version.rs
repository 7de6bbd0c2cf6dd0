//! Build-version compatibility.
//!
//! Hub and satellite must agree on major.minor before any replication payload
//! is applied; a mismatch is a hard rejection with no partial tolerance.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A `major.minor.patch` build version.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl BuildVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Two builds may exchange replication traffic iff major.minor match.
    /// Patch level is deliberately ignored.
    pub fn compatible_with(&self, other: &BuildVersion) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl FromStr for BuildVersion {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '.');
        let mut next = |name: &str| -> Result<u32, DomainError> {
            parts
                .next()
                .ok_or_else(|| DomainError::validation(format!("version missing {name}: {s}")))?
                .parse::<u32>()
                .map_err(|e| DomainError::validation(format!("bad version {name} in {s}: {e}")))
        };
        Ok(Self {
            major: next("major")?,
            minor: next("minor")?,
            patch: next("patch")?,
        })
    }
}

impl TryFrom<String> for BuildVersion {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BuildVersion> for String {
    fn from(v: BuildVersion) -> Self {
        v.to_string()
    }
}

impl core::fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_semver_triple() {
        let v: BuildVersion = "1.4.12".parse().unwrap();
        assert_eq!(v, BuildVersion::new(1, 4, 12));
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!("1.4".parse::<BuildVersion>().is_err());
        assert!("a.b.c".parse::<BuildVersion>().is_err());
        assert!("".parse::<BuildVersion>().is_err());
    }

    #[test]
    fn compatibility_ignores_patch_only() {
        let local = BuildVersion::new(1, 4, 0);
        assert!(local.compatible_with(&BuildVersion::new(1, 4, 9)));
        assert!(!local.compatible_with(&BuildVersion::new(1, 5, 0)));
        assert!(!local.compatible_with(&BuildVersion::new(2, 4, 0)));
    }
}
