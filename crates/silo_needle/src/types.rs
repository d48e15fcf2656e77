//! Needle identity types.

use std::fmt;

/// Content key of a needle, unique per volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NeedleId(pub u64);

impl NeedleId {
    /// Creates a new needle ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NeedleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Random anti-enumeration token paired with a needle ID.
///
/// A reader must present the matching cookie; guessing sequential IDs is
/// useless without it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cookie(pub u64);

impl Cookie {
    /// Creates a cookie from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Generates a random cookie.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Returns the raw cookie value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needle_id_ordering() {
        assert!(NeedleId::new(1) < NeedleId::new(2));
    }

    #[test]
    fn needle_id_display_is_hex() {
        assert_eq!(format!("{}", NeedleId::new(255)), "ff");
    }

    #[test]
    fn random_cookies_differ() {
        // Two consecutive draws colliding would be a one-in-2^64 event.
        assert_ne!(Cookie::random(), Cookie::random());
    }
}
