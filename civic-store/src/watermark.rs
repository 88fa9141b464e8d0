//! Store version watermark.
//!
//! Every change to the rendered state of the store advances the version by
//! one. Views compare versions to decide whether a projection they hold is
//! still current.

use std::fmt;

/// Monotonically increasing version of the store's rendered state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StoreVersion(u64);

impl StoreVersion {
    /// Version of a store that has never changed.
    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn sequence(&self) -> u64 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Check if this version is newer than another.
    pub fn is_newer_than(&self, other: &StoreVersion) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for StoreVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
