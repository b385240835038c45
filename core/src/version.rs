//! Record version numbers for optimistic concurrency control.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Optimistic concurrency token carried by every persisted record.
///
/// A record is created at [`Version::INITIAL`] and every transition returns a
/// snapshot at [`Version::next`]. Stores accept a conditional write only when
/// the version they hold still equals the version the caller last read:
///
/// - The caller reads a record at version `n`
/// - A transition produces a new snapshot at version `n + 1`
/// - The write is issued with expected version `n`
/// - If someone else wrote in between, the stored version is no longer `n`
///   and the write is rejected
///
/// # Examples
///
/// ```
/// use boxoffice_core::version::Version;
///
/// let v0 = Version::INITIAL;
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
/// assert_eq!(v1.value(), 1);
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The version of a freshly created record.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    ///
    /// Saturates at `u64::MAX`, which no record will ever reach.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_version() {
        assert_eq!(Version::INITIAL, Version::new(0));
        assert!(Version::INITIAL.is_initial());
        assert!(!Version::new(1).is_initial());
    }

    #[test]
    fn next_version() {
        let v1 = Version::INITIAL.next();
        let v2 = v1.next();

        assert_eq!(v1, Version::new(1));
        assert_eq!(v2, Version::new(2));
        assert!(v1 < v2);
    }

    #[test]
    fn next_saturates() {
        assert_eq!(Version::new(u64::MAX).next(), Version::new(u64::MAX));
    }

    #[test]
    fn version_from_u64() {
        let version = Version::from(42_u64);
        let num: u64 = version.into();
        assert_eq!(num, 42);
        assert_eq!(format!("{version}"), "42");
    }
}
