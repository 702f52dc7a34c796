//! Pack entry parsing, bounded inflation and delta application.
//!
//! # Scope
//! - Parses pack headers and entry headers.
//! - Inflates zlib streams with hard output caps.
//! - Applies Git's delta encoding (OFS_DELTA and REF_DELTA payloads).
//! - Does **not** verify pack checksums or object CRCs.
//!
//! # Caller Expectations
//! - Offsets passed to `entry_header_at` must point at entry headers
//!   (typically from `.idx` offset tables).
//! - Delta chain depth and base selection are the caller's concern.

use flate2::{Decompress, FlushDecompress, Status};

use super::bytes::BytesView;
use super::object::ObjectKind;
use super::object_id::Oid;

/// Pack header size: magic(4) + version(4) + object_count(4).
pub const PACK_HEADER_SIZE: usize = 12;

/// Maximum OFS encoding bytes (negative offset varint).
const MAX_OFS_BYTES: usize = 10;

/// Scratch buffer size for one inflate step.
const INFLATE_BUF_SIZE: usize = 32 * 1024;

/// Leading delta bytes that always hold both size varints.
pub const DELTA_HEADER_MAX_BYTES: usize = 20;

/// Parsed pack entry kind from header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// Non-delta object (commit, tree, blob, tag).
    NonDelta { kind: ObjectKind },
    /// OFS_DELTA: base at backward offset in same pack.
    OfsDelta { base_offset: u64 },
    /// REF_DELTA: base identified by id.
    RefDelta { base_oid: Oid },
}

/// Pack header parse errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PackParseError {
    #[error("pack too small")]
    TooSmall,
    #[error("bad pack signature")]
    BadSignature,
    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),
    #[error("offset {0} out of range")]
    OffsetOutOfRange(u64),
    #[error("header exceeded safety bound")]
    HeaderTooLong,
    #[error("truncated pack data")]
    Truncated,
    #[error("bad object type {0}")]
    BadObjType(u8),
    #[error("OFS_DELTA base underflow")]
    OfsUnderflow,
}

/// Inflate errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InflateError {
    #[error("inflate limit exceeded")]
    LimitExceeded,
    #[error("truncated input")]
    TruncatedInput,
    #[error("inflate stalled")]
    Stalled,
    #[error("inflate backend error")]
    Backend,
}

/// Delta application errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    #[error("delta truncated")]
    Truncated,
    #[error("delta varint overflow")]
    VarintOverflow,
    #[error("delta base size mismatch")]
    BaseSizeMismatch,
    #[error("delta result size mismatch")]
    ResultSizeMismatch,
    #[error("delta command zero")]
    BadCommandZero,
    #[error("delta copy out of range")]
    CopyOutOfRange,
    #[error("delta output overrun")]
    OutputOverrun,
    #[error("delta chain too deep (max {max})")]
    ChainTooDeep { max: u32 },
}

/// Entry header parsed from a pack file.
///
/// `data_start` points at the zlib stream. For delta entries, `size` is the
/// inflated delta payload size, not the final object size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryHeader {
    pub size: u64,
    pub data_start: usize,
    pub kind: EntryKind,
}

/// View over a whole pack file.
///
/// The trailing checksum is excluded from `data_end` so it can never be
/// misparsed as object data.
#[derive(Debug, Clone)]
pub struct PackFile {
    bytes: BytesView,
    data_end: usize,
}

impl PackFile {
    /// Validates the pack header.
    ///
    /// # Errors
    /// `TooSmall`, `BadSignature` or `UnsupportedVersion`.
    pub fn parse(bytes: BytesView) -> Result<Self, PackParseError> {
        let data = bytes.as_slice();
        if data.len() < PACK_HEADER_SIZE + Oid::LEN {
            return Err(PackParseError::TooSmall);
        }
        if &data[0..4] != b"PACK" {
            return Err(PackParseError::BadSignature);
        }
        let ver = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if ver != 2 && ver != 3 {
            return Err(PackParseError::UnsupportedVersion(ver));
        }
        let data_end = data.len() - Oid::LEN;
        Ok(Self { bytes, data_end })
    }

    /// Returns the pack trailer checksum (the pack id).
    #[must_use]
    pub fn checksum(&self) -> Oid {
        Oid::try_from_slice(&self.bytes.as_slice()[self.data_end..]).unwrap_or_default()
    }

    /// Parses the entry header at `offset`.
    ///
    /// # Errors
    /// Returns `PackParseError` for out-of-range offsets or malformed headers.
    pub fn entry_header_at(
        &self,
        offset: u64,
        max_header_bytes: usize,
    ) -> Result<EntryHeader, PackParseError> {
        let start = usize::try_from(offset).map_err(|_| PackParseError::OffsetOutOfRange(offset))?;
        if start < PACK_HEADER_SIZE || start >= self.data_end {
            return Err(PackParseError::OffsetOutOfRange(offset));
        }
        let mut pos = start;

        let first = self.byte_at(pos)?;
        pos += 1;
        let obj_type = (first >> 4) & 0x07;
        let mut size = u64::from(first & 0x0f);
        let mut shift: u32 = 4;

        let mut byte = first;
        while byte & 0x80 != 0 {
            if pos - start >= max_header_bytes {
                return Err(PackParseError::HeaderTooLong);
            }
            byte = self.byte_at(pos)?;
            pos += 1;
            size |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            if shift > 63 {
                return Err(PackParseError::HeaderTooLong);
            }
        }

        let kind = match obj_type {
            1..=4 => EntryKind::NonDelta {
                kind: ObjectKind::from_pack_type(obj_type).ok_or(PackParseError::BadObjType(obj_type))?,
            },
            6 => {
                let (base_offset, new_pos) = self.parse_ofs_base(offset, pos)?;
                pos = new_pos;
                EntryKind::OfsDelta { base_offset }
            }
            7 => {
                let end = pos + Oid::LEN;
                if end > self.data_end {
                    return Err(PackParseError::Truncated);
                }
                let base_oid = Oid::try_from_slice(&self.bytes.as_slice()[pos..end])
                    .ok_or(PackParseError::Truncated)?;
                pos = end;
                EntryKind::RefDelta { base_oid }
            }
            x => return Err(PackParseError::BadObjType(x)),
        };

        Ok(EntryHeader {
            size,
            data_start: pos,
            kind,
        })
    }

    /// Raw bytes from `start` to the end of the data region.
    #[inline]
    #[must_use]
    pub fn slice_from(&self, start: usize) -> &[u8] {
        &self.bytes.as_slice()[start.min(self.data_end)..self.data_end]
    }

    #[inline]
    fn byte_at(&self, pos: usize) -> Result<u8, PackParseError> {
        if pos >= self.data_end {
            return Err(PackParseError::Truncated);
        }
        Ok(self.bytes.as_slice()[pos])
    }

    /// Parses the OFS_DELTA negative offset encoding (`gitformat-pack(5)`).
    fn parse_ofs_base(&self, delta_offset: u64, mut pos: usize) -> Result<(u64, usize), PackParseError> {
        let mut c = self.byte_at(pos)?;
        pos += 1;
        let mut val = u64::from(c & 0x7f);
        let mut bytes_read = 1usize;

        while c & 0x80 != 0 {
            if bytes_read >= MAX_OFS_BYTES {
                return Err(PackParseError::HeaderTooLong);
            }
            c = self.byte_at(pos)?;
            pos += 1;
            bytes_read += 1;
            val = ((val + 1) << 7) | u64::from(c & 0x7f);
        }

        if val >= delta_offset {
            return Err(PackParseError::OfsUnderflow);
        }
        Ok((delta_offset - val, pos))
    }
}

/// Inflates a zlib stream with a hard output cap.
///
/// Returns the inflated bytes. The stream must end within `max_out` bytes.
///
/// # Errors
/// `LimitExceeded` if output would exceed `max_out`, `TruncatedInput` if
/// the input ends before the stream does, `Backend` on zlib errors.
pub fn inflate_limited(input: &[u8], max_out: usize) -> Result<Vec<u8>, InflateError> {
    let mut de = Decompress::new(true);
    let mut buf = vec![0u8; INFLATE_BUF_SIZE];
    let mut out = Vec::new();
    let mut in_pos = 0usize;

    loop {
        let before_in = de.total_in() as usize;
        let before_out = de.total_out() as usize;

        let status = de
            .decompress(&input[in_pos..], &mut buf, FlushDecompress::None)
            .map_err(|_| InflateError::Backend)?;

        let consumed = de.total_in() as usize - before_in;
        let produced = de.total_out() as usize - before_out;
        in_pos += consumed;

        if produced != 0 {
            if out.len() + produced > max_out {
                return Err(InflateError::LimitExceeded);
            }
            out.extend_from_slice(&buf[..produced]);
        }

        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok => {
                if consumed == 0 && produced == 0 {
                    if in_pos >= input.len() {
                        return Err(InflateError::TruncatedInput);
                    }
                    return Err(InflateError::Stalled);
                }
            }
            Status::BufError => {
                if in_pos >= input.len() {
                    return Err(InflateError::TruncatedInput);
                }
            }
        }
    }
}

/// Inflates a zlib stream expecting exactly `expected` output bytes.
///
/// # Errors
/// As `inflate_limited`, plus `TruncatedInput` for short output.
pub fn inflate_exact(input: &[u8], expected: usize) -> Result<Vec<u8>, InflateError> {
    let out = inflate_limited(input, expected)?;
    if out.len() != expected {
        return Err(InflateError::TruncatedInput);
    }
    Ok(out)
}

/// Inflates at most the first `len` bytes of a zlib stream.
///
/// Returns fewer bytes only when the stream ends first. Input past the
/// inflated prefix is never touched, so this is the cheap way to read
/// object and delta headers.
///
/// # Errors
/// `TruncatedInput` if the input ends before `len` bytes or the stream end,
/// `Stalled` if zlib makes no progress, `Backend` on zlib errors.
pub fn inflate_prefix(input: &[u8], len: usize) -> Result<Vec<u8>, InflateError> {
    let mut de = Decompress::new(true);
    let mut out = vec![0u8; len];
    let mut filled = 0usize;
    let mut in_pos = 0usize;

    while filled < len {
        let before_in = de.total_in() as usize;
        let before_out = de.total_out() as usize;

        let status = de
            .decompress(&input[in_pos..], &mut out[filled..], FlushDecompress::None)
            .map_err(|_| InflateError::Backend)?;

        let consumed = de.total_in() as usize - before_in;
        let produced = de.total_out() as usize - before_out;
        in_pos += consumed;
        filled += produced;

        if status == Status::StreamEnd {
            break;
        }
        if consumed == 0 && produced == 0 {
            if in_pos >= input.len() {
                return Err(InflateError::TruncatedInput);
            }
            return Err(InflateError::Stalled);
        }
    }

    out.truncate(filled);
    Ok(out)
}

/// Reads the result size declared at the start of a delta payload.
///
/// `delta` needs only its first `DELTA_HEADER_MAX_BYTES` bytes.
///
/// # Errors
/// `Truncated` or `VarintOverflow` for malformed size varints.
pub fn delta_result_size(delta: &[u8]) -> Result<u64, DeltaError> {
    let mut pos = 0usize;
    read_leb128_u64(delta, &mut pos)?;
    read_leb128_u64(delta, &mut pos)
}

/// Reads a delta size varint (little-endian base-128).
fn read_leb128_u64(data: &[u8], pos: &mut usize) -> Result<u64, DeltaError> {
    let mut shift: u32 = 0;
    let mut result: u64 = 0;
    for _ in 0..10 {
        let b = *data.get(*pos).ok_or(DeltaError::Truncated)?;
        *pos += 1;
        result |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift > 63 {
            return Err(DeltaError::VarintOverflow);
        }
    }
    Err(DeltaError::VarintOverflow)
}

/// Applies a Git delta buffer to `base`.
///
/// `max_out` is a hard cap against corrupt deltas declaring huge results.
///
/// # Errors
/// Returns `DeltaError` for truncated input, size mismatches or bounds
/// violations.
pub fn apply_delta(base: &[u8], delta: &[u8], max_out: usize) -> Result<Vec<u8>, DeltaError> {
    let mut pos = 0usize;
    let base_size = read_leb128_u64(delta, &mut pos)? as usize;
    let result_size = read_leb128_u64(delta, &mut pos)? as usize;
    if base_size != base.len() {
        return Err(DeltaError::BaseSizeMismatch);
    }
    if result_size > max_out {
        return Err(DeltaError::OutputOverrun);
    }

    let mut out = Vec::with_capacity(result_size);
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            let (off, size) = decode_copy_params(delta, &mut pos, cmd)?;
            let end = off.checked_add(size).ok_or(DeltaError::CopyOutOfRange)?;
            if end > base.len() {
                return Err(DeltaError::CopyOutOfRange);
            }
            if out.len() + size > result_size {
                return Err(DeltaError::OutputOverrun);
            }
            out.extend_from_slice(&base[off..end]);
        } else if cmd != 0 {
            let size = cmd as usize;
            if pos + size > delta.len() {
                return Err(DeltaError::Truncated);
            }
            if out.len() + size > result_size {
                return Err(DeltaError::OutputOverrun);
            }
            out.extend_from_slice(&delta[pos..pos + size]);
            pos += size;
        } else {
            return Err(DeltaError::BadCommandZero);
        }
    }

    if out.len() != result_size {
        return Err(DeltaError::ResultSizeMismatch);
    }
    Ok(out)
}

/// Decodes copy parameters for a delta copy instruction.
///
/// Low bits select present offset bytes, high bits select present size
/// bytes (both little-endian). A zero size encodes 0x10000.
fn decode_copy_params(delta: &[u8], pos: &mut usize, cmd: u8) -> Result<(usize, usize), DeltaError> {
    let mut next = |acc: &mut usize, shift: u32| -> Result<(), DeltaError> {
        let b = *delta.get(*pos).ok_or(DeltaError::Truncated)?;
        *pos += 1;
        *acc |= (b as usize) << shift;
        Ok(())
    };

    let mut off = 0usize;
    let mut size = 0usize;
    for (bit, shift) in [(0x01, 0), (0x02, 8), (0x04, 16), (0x08, 24)] {
        if cmd & bit != 0 {
            next(&mut off, shift)?;
        }
    }
    for (bit, shift) in [(0x10, 0), (0x20, 8), (0x40, 16)] {
        if cmd & bit != 0 {
            next(&mut size, shift)?;
        }
    }
    if size == 0 {
        size = 0x10000;
    }
    Ok((off, size))
}
