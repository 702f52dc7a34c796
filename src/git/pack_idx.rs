//! Parser for Git pack index (`.idx`) v2 files.
//!
//! A `PackIdx` owns its bytes (usually an mmap) and validates the layout
//! once at open; lookups afterwards are bounds-safe slice reads.
//!
//! # Scope
//! - Supports pack index version 2, SHA-1 only.
//! - Validates header, fanout monotonicity and table sizes.
//! - Does **not** validate checksums; CRC entries are skipped.
//!
//! # Complexity
//! - `object_count()` is O(1) from cached fanout[255].
//! - `find()` is O(log n) within the fanout bucket of the first id byte.
//! - `offset_at()` is O(1), may follow large offset indirection.

use super::bytes::BytesView;
use super::object_id::Oid;

/// Pack index magic bytes for v2 format.
const IDX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
const IDX_VERSION: u32 = 2;
/// Header size (4 magic + 4 version).
const IDX_HEADER_SIZE: usize = 8;
const FANOUT_ENTRIES: usize = 256;
const FANOUT_SIZE: usize = FANOUT_ENTRIES * 4;
/// MSB marks large offset indirection.
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;
/// Offsets must fit a signed 64-bit integer for index keys.
const MAX_OFFSET: u64 = i64::MAX as u64;

/// Errors from pack index parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum IdxError {
    #[error("corrupt pack index: {detail}")]
    Corrupt { detail: &'static str },
    #[error("unsupported pack index version: {version} (expected 2)")]
    UnsupportedVersion { version: u32 },
    #[error("large offset index out of bounds: {index} >= {count}")]
    LargeOffsetOutOfBounds { index: u32, count: u32 },
}

impl IdxError {
    #[inline]
    pub const fn corrupt(detail: &'static str) -> Self {
        Self::Corrupt { detail }
    }
}

/// Validated pack index v2.
///
/// # Layout (v2 format)
/// ```text
/// +----------------+
/// | Magic (4B)     |  0xff 't' 'O' 'c'
/// | Version (4B)   |  Big-endian 2
/// +----------------+
/// | Fanout (1024B) |  256 * u32 BE cumulative counts
/// +----------------+
/// | OID Table      |  N * 20 bytes (sorted)
/// | CRC Table      |  N * 4 bytes
/// | Offset Table   |  N * 4 bytes (MSB=1 -> large offset)
/// | Large Offsets  |  M * 8 bytes (optional)
/// +----------------+
/// | Pack Checksum  |  20 bytes
/// | Idx Checksum   |  20 bytes
/// +----------------+
/// ```
#[derive(Debug, Clone)]
pub struct PackIdx {
    bytes: BytesView,
    object_count: u32,
    oid_table: usize,
    offset_table: usize,
    large_offsets: usize,
    large_offset_count: u32,
}

impl PackIdx {
    /// Parses and validates a pack index.
    ///
    /// # Errors
    /// Returns `IdxError` if the file is malformed or has an unsupported
    /// version.
    pub fn parse(bytes: BytesView) -> Result<Self, IdxError> {
        let data = bytes.as_slice();
        let checksums = 2 * Oid::LEN;

        if data.len() < IDX_HEADER_SIZE + FANOUT_SIZE + checksums {
            return Err(IdxError::corrupt("file too small"));
        }
        if data[0..4] != IDX_MAGIC {
            return Err(IdxError::corrupt("invalid magic"));
        }
        let version = be_u32(data, 4);
        if version != IDX_VERSION {
            return Err(IdxError::UnsupportedVersion { version });
        }

        let object_count = validate_fanout(&data[IDX_HEADER_SIZE..IDX_HEADER_SIZE + FANOUT_SIZE])?;
        let n = object_count as usize;

        let oid_table = IDX_HEADER_SIZE + FANOUT_SIZE;
        let crc_table = oid_table + n * Oid::LEN;
        let offset_table = crc_table + n * 4;
        let large_offsets = offset_table + n * 4;
        let trailer = data.len() - checksums;

        if large_offsets > trailer {
            return Err(IdxError::corrupt("tables exceed file size"));
        }
        let large_len = trailer - large_offsets;
        if large_len % 8 != 0 {
            return Err(IdxError::corrupt(
                "large offset table not multiple of 8 bytes",
            ));
        }

        Ok(Self {
            bytes,
            object_count,
            oid_table,
            offset_table,
            large_offsets,
            large_offset_count: (large_len / 8) as u32,
        })
    }

    /// Returns the number of objects indexed.
    #[inline]
    #[must_use]
    pub fn object_count(&self) -> u32 {
        self.object_count
    }

    /// Returns the id of the pack this index describes (its trailer
    /// checksum).
    #[must_use]
    pub fn pack_checksum(&self) -> Oid {
        let data = self.bytes.as_slice();
        let start = data.len() - 2 * Oid::LEN;
        Oid::try_from_slice(&data[start..start + Oid::LEN]).unwrap_or_default()
    }

    /// Returns the object id at position `idx` (sorted order).
    ///
    /// # Panics
    /// Panics if `idx >= object_count()`.
    #[must_use]
    pub fn oid_at(&self, idx: u32) -> Oid {
        assert!(idx < self.object_count, "OID index out of bounds");
        let start = self.oid_table + idx as usize * Oid::LEN;
        let mut out = [0u8; 20];
        out.copy_from_slice(&self.bytes.as_slice()[start..start + Oid::LEN]);
        Oid::new(out)
    }

    /// Returns the pack offset of the object at position `idx`.
    ///
    /// # Errors
    /// `LargeOffsetOutOfBounds` for a dangling indirection, `Corrupt` for
    /// offsets that do not fit a signed 64-bit integer.
    pub fn offset_at(&self, idx: u32) -> Result<u64, IdxError> {
        debug_assert!(idx < self.object_count, "offset index out of bounds");
        let data = self.bytes.as_slice();
        let raw = be_u32(data, self.offset_table + idx as usize * 4);

        if raw & LARGE_OFFSET_FLAG == 0 {
            return Ok(u64::from(raw));
        }

        let loff_idx = raw & !LARGE_OFFSET_FLAG;
        if loff_idx >= self.large_offset_count {
            return Err(IdxError::LargeOffsetOutOfBounds {
                index: loff_idx,
                count: self.large_offset_count,
            });
        }
        let start = self.large_offsets + loff_idx as usize * 8;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&data[start..start + 8]);
        let offset = u64::from_be_bytes(buf);
        if offset > MAX_OFFSET {
            return Err(IdxError::corrupt("pack offset exceeds i64 range"));
        }
        Ok(offset)
    }

    /// Looks up an object's pack offset.
    ///
    /// Returns `Ok(None)` if the id is not in this index.
    ///
    /// # Errors
    /// Propagates `offset_at` errors for a found entry.
    pub fn find(&self, oid: &Oid) -> Result<Option<u64>, IdxError> {
        let data = self.bytes.as_slice();
        let first = oid.first_byte() as usize;
        let hi = be_u32(data, IDX_HEADER_SIZE + first * 4);
        let lo = if first == 0 {
            0
        } else {
            be_u32(data, IDX_HEADER_SIZE + (first - 1) * 4)
        };

        let (mut lo, mut hi) = (lo, hi);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let start = self.oid_table + mid as usize * Oid::LEN;
            match data[start..start + Oid::LEN].cmp(oid.as_bytes().as_slice()) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return self.offset_at(mid).map(Some),
            }
        }
        Ok(None)
    }

    /// Returns true if the index contains `oid`.
    #[must_use]
    pub fn contains(&self, oid: &Oid) -> bool {
        matches!(self.find(oid), Ok(Some(_)))
    }
}

#[inline]
fn be_u32(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

/// Validates that the fanout table is non-decreasing and returns the total
/// object count (`fanout[255]`).
fn validate_fanout(fanout: &[u8]) -> Result<u32, IdxError> {
    debug_assert!(fanout.len() == FANOUT_SIZE);
    let mut prev = 0u32;
    for i in 0..FANOUT_ENTRIES {
        let val = be_u32(fanout, i * 4);
        if val < prev {
            return Err(IdxError::corrupt("fanout not monotonic"));
        }
        prev = val;
    }
    Ok(prev)
}

/// Builds a pack index v2 file from `(oid, offset)` pairs.
///
/// The pack checksum is written into the trailer; the idx checksum is
/// zeroed (checksums are never validated by the reader).
#[must_use]
pub fn build_idx(pack_checksum: &Oid, objects: &[(Oid, u64)]) -> Vec<u8> {
    let mut objects = objects.to_vec();
    objects.sort_by(|a, b| a.0.cmp(&b.0));

    let mut counts = [0u32; FANOUT_ENTRIES];
    for (oid, _) in &objects {
        counts[oid.first_byte() as usize] += 1;
    }

    let mut out = Vec::new();
    out.extend_from_slice(&IDX_MAGIC);
    out.extend_from_slice(&IDX_VERSION.to_be_bytes());
    let mut running = 0u32;
    for count in counts {
        running += count;
        out.extend_from_slice(&running.to_be_bytes());
    }
    for (oid, _) in &objects {
        out.extend_from_slice(oid.as_bytes());
    }
    out.extend(std::iter::repeat(0u8).take(objects.len() * 4));

    let mut large = Vec::new();
    for (_, offset) in &objects {
        if *offset >= u64::from(LARGE_OFFSET_FLAG) {
            let loff_idx = (large.len() / 8) as u32;
            out.extend_from_slice(&(LARGE_OFFSET_FLAG | loff_idx).to_be_bytes());
            large.extend_from_slice(&offset.to_be_bytes());
        } else {
            out.extend_from_slice(&(*offset as u32).to_be_bytes());
        }
    }
    out.extend_from_slice(&large);
    out.extend_from_slice(pack_checksum.as_bytes());
    out.extend_from_slice(&[0u8; 20]);
    out
}
