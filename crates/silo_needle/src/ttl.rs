//! Time-to-live encoding.
//!
//! A TTL is persisted as two bytes: a count and a unit. This keeps the
//! superblock and needle layouts fixed-size while still covering ranges from
//! one minute to 255 years.

use std::fmt;

/// Unit of a [`Ttl`] count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtlUnit {
    /// No TTL.
    #[default]
    Empty,
    /// Minutes.
    Minute,
    /// Hours.
    Hour,
    /// Days.
    Day,
    /// Weeks.
    Week,
    /// Months (30 days).
    Month,
    /// Years (365 days).
    Year,
}

impl TtlUnit {
    fn from_byte(b: u8) -> Self {
        match b {
            b'm' => Self::Minute,
            b'h' => Self::Hour,
            b'd' => Self::Day,
            b'w' => Self::Week,
            b'M' => Self::Month,
            b'y' => Self::Year,
            _ => Self::Empty,
        }
    }

    const fn as_byte(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Minute => b'm',
            Self::Hour => b'h',
            Self::Day => b'd',
            Self::Week => b'w',
            Self::Month => b'M',
            Self::Year => b'y',
        }
    }

    const fn minutes(self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Minute => 1,
            Self::Hour => 60,
            Self::Day => 24 * 60,
            Self::Week => 7 * 24 * 60,
            Self::Month => 30 * 24 * 60,
            Self::Year => 365 * 24 * 60,
        }
    }
}

/// Time-to-live of a needle or volume, two bytes on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ttl {
    count: u8,
    unit: TtlUnit,
}

impl Ttl {
    /// The empty TTL: objects never expire.
    pub const EMPTY: Self = Self {
        count: 0,
        unit: TtlUnit::Empty,
    };

    /// Creates a TTL from a count and unit.
    #[must_use]
    pub const fn new(count: u8, unit: TtlUnit) -> Self {
        Self { count, unit }
    }

    /// Decodes a TTL from its two-byte representation.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self {
            count: bytes[0],
            unit: TtlUnit::from_byte(bytes[1]),
        }
    }

    /// Encodes the TTL to its two-byte representation.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 2] {
        [self.count, self.unit.as_byte()]
    }

    /// Returns the TTL in minutes; zero means "never expires".
    #[must_use]
    pub const fn minutes(self) -> u32 {
        self.count as u32 * self.unit.minutes()
    }

    /// Whether this TTL expires at all.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.minutes() == 0
    }

    /// Whether an object last modified at `last_modified_secs` (unix seconds)
    /// has expired as of `now_secs`.
    #[must_use]
    pub fn is_expired(self, last_modified_secs: u64, now_secs: u64) -> bool {
        if self.is_empty() {
            return false;
        }
        now_secs >= last_modified_secs + u64::from(self.minutes()) * 60
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}{}", self.count, self.unit.as_byte() as char)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_roundtrip() {
        for ttl in [
            Ttl::EMPTY,
            Ttl::new(5, TtlUnit::Minute),
            Ttl::new(3, TtlUnit::Hour),
            Ttl::new(30, TtlUnit::Day),
            Ttl::new(2, TtlUnit::Week),
            Ttl::new(6, TtlUnit::Month),
            Ttl::new(1, TtlUnit::Year),
        ] {
            assert_eq!(Ttl::from_bytes(ttl.to_bytes()), ttl);
        }
    }

    #[test]
    fn ttl_minutes() {
        assert_eq!(Ttl::EMPTY.minutes(), 0);
        assert_eq!(Ttl::new(5, TtlUnit::Minute).minutes(), 5);
        assert_eq!(Ttl::new(2, TtlUnit::Hour).minutes(), 120);
        assert_eq!(Ttl::new(1, TtlUnit::Day).minutes(), 1440);
    }

    #[test]
    fn ttl_expiry() {
        let ttl = Ttl::new(1, TtlUnit::Minute);
        assert!(!ttl.is_expired(1000, 1000));
        assert!(!ttl.is_expired(1000, 1059));
        assert!(ttl.is_expired(1000, 1060));

        assert!(!Ttl::EMPTY.is_expired(0, u64::MAX));
    }

    #[test]
    fn ttl_display() {
        assert_eq!(Ttl::EMPTY.to_string(), "none");
        assert_eq!(Ttl::new(5, TtlUnit::Minute).to_string(), "5m");
        assert_eq!(Ttl::new(6, TtlUnit::Month).to_string(), "6M");
    }

    #[test]
    fn unknown_unit_decodes_as_empty() {
        let ttl = Ttl::from_bytes([7, b'z']);
        assert!(ttl.is_empty());
    }
}
