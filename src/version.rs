//! Bounded app-version space with a dense integer encoding.
//!
//! The firmware API is keyed by the version string of the mobile app. Every
//! valid version `major.minor.patch` lies between [`Version::MIN`] and
//! [`Version::MAX`], and each field is a digit in a fixed mixed radix
//! (`MAX.field + 1`). That makes [`Version::encode`] a bijection between the
//! version space and `0..=Version::MAX.encode()`, so midpoints and other
//! arithmetic can be done on plain integers.
//!
//! # Example
//!
//! ```
//! use etube_core::version::Version;
//!
//! let low = Version::parse("2.2.3").unwrap();
//! let mid = Version::midpoint(low, Version::MAX).unwrap();
//! assert_eq!(mid.to_string(), "6.11.11");
//! assert_eq!(Version::decode(mid.encode()).unwrap(), mid);
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Radix of the patch digit.
const PATCH_RADIX: u64 = Version::MAX.patch as u64 + 1;

/// Radix of the minor digit.
const MINOR_RADIX: u64 = Version::MAX.minor as u64 + 1;

/// Radix of the major digit.
const MAJOR_RADIX: u64 = Version::MAX.major as u64 + 1;

/// Errors raised when a value falls outside the version space.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// The input is not three dot-separated non-negative integers.
    #[error("malformed version '{input}': expected MAJOR.MINOR.PATCH")]
    Malformed {
        /// The rejected input.
        input: String,
    },

    /// The version is well-formed but lies outside the supported bounds.
    #[error("version {version} is out of range ({min}..={max})")]
    OutOfRange {
        /// The rejected version.
        version: String,
        /// Lower bound.
        min: Version,
        /// Upper bound.
        max: Version,
    },

    /// The integer cannot be represented with the fixed radices.
    #[error("version encoding {value} overflows the version space (max {max})")]
    Overflow {
        /// The rejected encoded value.
        value: u64,
        /// Largest valid encoding.
        max: u64,
    },

    /// Subtraction would produce a negative encoding.
    #[error("version subtraction {lhs} - {rhs} underflows")]
    Underflow {
        /// Encoded left-hand side.
        lhs: u64,
        /// Encoded right-hand side.
        rhs: u64,
    },

    /// Floor division by zero.
    #[error("version division by zero")]
    DivisionByZero,

    /// A range whose lower bound lies above its upper bound.
    #[error("empty version range {low}..={high}")]
    EmptyRange {
        /// Lower bound.
        low: Version,
        /// Upper bound.
        high: Version,
    },
}

/// An app version inside the supported version space.
///
/// Ordering is lexicographic on `(major, minor, patch)`, which agrees with
/// the ordering of the integer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    major: u32,
    minor: u32,
    patch: u32,
}

impl Version {
    /// Smallest version in the space.
    pub const MIN: Version = Version::unchecked(0, 0, 0);

    /// Largest version in the space; its fields also fix the radices.
    pub const MAX: Version = Version::unchecked(10, 20, 20);

    /// Oldest app version the firmware API answers for.
    pub const API_MIN: Version = Version::unchecked(2, 2, 3);

    /// Newest app version worth probing.
    pub const API_MAX: Version = Version::unchecked(9, 9, 19);

    const fn unchecked(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Builds a version from its fields.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::OutOfRange`] when the triplet is outside the space.
    pub fn new(major: u32, minor: u32, patch: u32) -> Result<Self, VersionError> {
        let version = Self::unchecked(major, minor, patch);
        if version.in_bounds() {
            Ok(version)
        } else {
            Err(VersionError::OutOfRange {
                version: version.to_string(),
                min: Self::MIN,
                max: Self::MAX,
            })
        }
    }

    /// Parses `MAJOR.MINOR.PATCH`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Malformed`] for anything but three dot-separated
    /// integers and [`VersionError::OutOfRange`] for versions outside the space.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let malformed = || VersionError::Malformed {
            input: input.to_string(),
        };
        let mut fields = [0u32; 3];
        let mut parts = input.trim().split('.');
        for field in &mut fields {
            let part = parts.next().ok_or_else(malformed)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            *field = part.parse().map_err(|_| malformed())?;
        }
        if parts.next().is_some() {
            return Err(malformed());
        }
        Self::new(fields[0], fields[1], fields[2])
    }

    /// Major field.
    #[must_use]
    pub fn major(self) -> u32 {
        self.major
    }

    /// Minor field.
    #[must_use]
    pub fn minor(self) -> u32 {
        self.minor
    }

    /// Patch field.
    #[must_use]
    pub fn patch(self) -> u32 {
        self.patch
    }

    fn in_bounds(self) -> bool {
        self >= Self::MIN
            && self <= Self::MAX
            && self.minor <= Self::MAX.minor
            && self.patch <= Self::MAX.patch
    }

    /// Dense integer encoding of this version.
    #[must_use]
    pub fn encode(self) -> u64 {
        u64::from(self.patch)
            + u64::from(self.minor) * PATCH_RADIX
            + u64::from(self.major) * PATCH_RADIX * MINOR_RADIX
    }

    /// Inverse of [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Overflow`] when the major digit would not fit
    /// its radix.
    pub fn decode(value: u64) -> Result<Self, VersionError> {
        let (rest, patch) = (value / PATCH_RADIX, value % PATCH_RADIX);
        let (rest, minor) = (rest / MINOR_RADIX, rest % MINOR_RADIX);
        let (rest, major) = (rest / MAJOR_RADIX, rest % MAJOR_RADIX);
        if rest != 0 {
            return Err(VersionError::Overflow {
                value,
                max: Self::MAX.encode(),
            });
        }
        // Each digit is below its radix, so all three fit in u32 and the
        // triplet is inside the space.
        Self::new(
            u32::try_from(major).unwrap_or(u32::MAX),
            u32::try_from(minor).unwrap_or(u32::MAX),
            u32::try_from(patch).unwrap_or(u32::MAX),
        )
    }

    /// Version halfway between `low` and `high`, rounding down.
    ///
    /// # Errors
    ///
    /// Never fails for versions inside the space; the error is the one
    /// [`decode`](Self::decode) would report.
    pub fn midpoint(low: Version, high: Version) -> Result<Self, VersionError> {
        Self::decode((low.encode() + high.encode()) / 2)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A value usable on the right-hand side of version arithmetic.
///
/// Versions contribute their encoding, plain integers themselves.
pub trait Operand {
    /// Integer value of the operand.
    fn encoded(&self) -> u64;
}

impl Operand for Version {
    fn encoded(&self) -> u64 {
        self.encode()
    }
}

impl Operand for u64 {
    fn encoded(&self) -> u64 {
        *self
    }
}

/// `lhs + rhs` over the encoding.
///
/// # Errors
///
/// Returns [`VersionError::Overflow`] when the sum leaves the space.
pub fn add(lhs: Version, rhs: impl Operand) -> Result<Version, VersionError> {
    let value = lhs
        .encode()
        .checked_add(rhs.encoded())
        .ok_or(VersionError::Overflow {
            value: u64::MAX,
            max: Version::MAX.encode(),
        })?;
    Version::decode(value)
}

/// `lhs - rhs` over the encoding.
///
/// # Errors
///
/// Returns [`VersionError::Underflow`] when `rhs` encodes above `lhs`.
pub fn sub(lhs: Version, rhs: impl Operand) -> Result<Version, VersionError> {
    let (left, right) = (lhs.encode(), rhs.encoded());
    let value = left.checked_sub(right).ok_or(VersionError::Underflow {
        lhs: left,
        rhs: right,
    })?;
    Version::decode(value)
}

/// `lhs * rhs` over the encoding.
///
/// # Errors
///
/// Returns [`VersionError::Overflow`] when the product leaves the space.
pub fn mul(lhs: Version, rhs: impl Operand) -> Result<Version, VersionError> {
    let value = lhs
        .encode()
        .checked_mul(rhs.encoded())
        .ok_or(VersionError::Overflow {
            value: u64::MAX,
            max: Version::MAX.encode(),
        })?;
    Version::decode(value)
}

/// `lhs // rhs` over the encoding.
///
/// # Errors
///
/// Returns [`VersionError::DivisionByZero`] when `rhs` encodes to zero.
pub fn floor_div(lhs: Version, rhs: impl Operand) -> Result<Version, VersionError> {
    let value = lhs
        .encode()
        .checked_div(rhs.encoded())
        .ok_or(VersionError::DivisionByZero)?;
    Version::decode(value)
}
