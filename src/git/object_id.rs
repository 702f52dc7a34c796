//! Object id type for SHA-1 repositories.
//!
//! `Oid` is a fixed 20-byte, zero-heap identifier. It is used for object
//! hashes and for packfile ids (the pack checksum that names
//! `pack-<id>.pack`).
//!
//! # Text Form
//! - `Display` renders lowercase hex, matching Git's canonical rendering.
//! - `from_hex` accepts upper- or lowercase hex; `from_canonical_hex`
//!   accepts only the exact lowercase rendering. Selector pushdown uses the
//!   strict form so a pushed-down lookup can never return a row whose hash
//!   text differs from the literal it was selected by.

use std::fmt;
use std::str::FromStr;

/// Errors from parsing a textual object id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum OidParseError {
    /// Text has the wrong number of characters.
    #[error("invalid object id length: {len} (expected {expected})")]
    InvalidLength { len: usize, expected: usize },
    /// Text contains a non-hex character.
    #[error("invalid hex in object id")]
    InvalidHex,
}

/// A SHA-1 object id.
///
/// Ordering is lexicographic over the raw bytes, which is the order Git
/// uses for pack index tables.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; 20]);

impl Oid {
    /// Raw id length in bytes.
    pub const LEN: usize = 20;
    /// Hex id length in characters.
    pub const HEX_LEN: usize = 40;
    /// The all-zero id.
    pub const NULL: Self = Self([0u8; 20]);

    /// Wraps raw id bytes.
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an id from a slice, returning `None` for wrong lengths.
    #[must_use]
    pub fn try_from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Parses a 40-character hex id (either case).
    ///
    /// # Errors
    /// Returns `OidParseError` for wrong lengths or non-hex characters.
    pub fn from_hex(text: &str) -> Result<Self, OidParseError> {
        if text.len() != Self::HEX_LEN {
            return Err(OidParseError::InvalidLength {
                len: text.len(),
                expected: Self::HEX_LEN,
            });
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(text, &mut out).map_err(|_| OidParseError::InvalidHex)?;
        Ok(Self(out))
    }

    /// Parses an id only if `text` is its exact lowercase rendering.
    #[must_use]
    pub fn from_canonical_hex(text: &str) -> Option<Self> {
        if text.bytes().any(|b| b.is_ascii_uppercase()) {
            return None;
        }
        Self::from_hex(text).ok()
    }

    /// Returns the raw id bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the first byte (pack index fanout bucket).
    #[inline]
    #[must_use]
    pub const fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Returns true if this is the all-zero id.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Returns the lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.to_hex())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Oid {
    type Err = OidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
