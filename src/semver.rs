//! Semantic API versions.
//!
//! Versions follow `v<major>.<minor>` or `v<major>.<minor>.<patch>` with a
//! mandatory `v` prefix and non-negative integer components. APIs whose
//! version does not parse are routed by their exact version string only;
//! floating-alias routing is skipped for them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::errors::Error;

/// A parsed semantic API version.
///
/// Ordering is lexicographic over `(major, minor, patch)`. An absent patch
/// sorts below any present patch, so `v1.2 < v1.2.0 < v1.2.1`. Equality
/// ignores the raw string the version was parsed from.
#[derive(Debug, Clone, Eq)]
pub struct SemanticVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
    raw: String,
}

impl SemanticVersion {
    /// The version string as it appeared in the API definition.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Key of the major floating-alias range this version competes in, e.g. `v1`.
    pub fn major_range_key(&self) -> String {
        format!("v{}", self.major)
    }

    /// Key of the minor floating-alias range this version competes in, e.g. `v1.2`.
    pub fn minor_range_key(&self) -> String {
        format!("v{}.{}", self.major, self.minor)
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        self.major == other.major && self.minor == other.minor && self.patch == other.patch
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for SemanticVersion {
    type Err = Error;

    fn from_str(version: &str) -> Result<Self, Self::Err> {
        let numbers = version.strip_prefix('v').ok_or_else(|| {
            Error::version(
                version,
                "expected the format v<major>.<minor> or v<major>.<minor>.<patch>",
            )
        })?;

        let components: Vec<&str> = numbers.split('.').collect();
        if components.len() < 2 || components.len() > 3 {
            return Err(Error::version(
                version,
                "expected two or three dot-separated integer components",
            ));
        }

        let major: u32 = components[0]
            .parse()
            .map_err(|_| Error::version(version, "major component is not a non-negative integer"))?;
        let minor: u32 = components[1]
            .parse()
            .map_err(|_| Error::version(version, "minor component is not a non-negative integer"))?;
        let patch: Option<u32> = match components.get(2) {
            Some(raw_patch) => Some(raw_patch.parse().map_err(|_| {
                Error::version(version, "patch component is not a non-negative integer")
            })?),
            None => None,
        };

        Ok(Self { major, minor, patch, raw: version.to_string() })
    }
}
