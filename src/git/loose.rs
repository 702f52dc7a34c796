//! Loose object access under `objects/xx/yyyy...`.
//!
//! Loose files are zlib streams of `<kind> SP <decimal size> NUL <payload>`.
//! Inflation is capped at the configured object size plus a small header
//! allowance, and the declared size must match the payload exactly.
//!
//! `read_loose_header` inflates only the header, so kind and size checks
//! never touch the payload.
//!
//! Object ids are taken from the file path; payloads are not re-hashed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use memchr::memchr;

use super::bytes::BytesView;
use super::object::ObjectKind;
use super::object_id::Oid;
use super::pack_inflate::{inflate_limited, inflate_prefix};
use super::store::StoreError;

/// Safety allowance for loose object headers (`"blob <size>\0"`).
const LOOSE_HEADER_MAX_BYTES: usize = 64;

/// Returns the path of the loose file for `oid`.
#[must_use]
pub fn loose_path(objects_dir: &Path, oid: &Oid) -> PathBuf {
    let hex = oid.to_hex();
    let (dir, file) = hex.split_at(2);
    objects_dir.join(dir).join(file)
}

/// Reads and inflates a loose object.
///
/// Returns `Ok(None)` if no loose file exists for `oid`.
///
/// # Errors
/// `Io` for read failures other than not-found, `Inflate` for zlib errors
/// or oversized objects, `Corrupt` for malformed headers.
pub fn read_loose(
    objects_dir: &Path,
    oid: &Oid,
    max_object_bytes: usize,
) -> Result<Option<(ObjectKind, Vec<u8>)>, StoreError> {
    let path = loose_path(objects_dir, oid);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let max_out = max_object_bytes.saturating_add(LOOSE_HEADER_MAX_BYTES);
    let out = inflate_limited(&data, max_out)?;
    parse_loose_object(&out, max_object_bytes).map(Some)
}

/// Reads the kind and declared payload size of a loose object.
///
/// Returns `Ok(None)` if no loose file exists for `oid`. The file is mapped
/// and only its first `LOOSE_HEADER_MAX_BYTES` inflated bytes are produced.
///
/// # Errors
/// `Io` for read failures other than not-found, `Inflate` for zlib errors,
/// `Corrupt` for malformed headers.
pub fn read_loose_header(
    objects_dir: &Path,
    oid: &Oid,
) -> Result<Option<(ObjectKind, u64)>, StoreError> {
    let path = loose_path(objects_dir, oid);
    let data = match BytesView::map_file(&path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let prefix = inflate_prefix(data.as_slice(), LOOSE_HEADER_MAX_BYTES)?;
    let (kind, size, _) = parse_loose_header(&prefix)?;
    Ok(Some((kind, size)))
}

/// Lists every loose object id, sorted ascending.
///
/// Entries that are not `xx/<38 hex>` are ignored (`pack/`, `info/`,
/// temporary files).
///
/// # Errors
/// Returns `Io` if a fan-out directory cannot be read.
pub fn list_loose(objects_dir: &Path) -> Result<Vec<Oid>, StoreError> {
    let mut out = Vec::new();
    let top = match fs::read_dir(objects_dir) {
        Ok(top) => top,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err.into()),
    };

    for dir in top {
        let dir = dir?;
        let dir_name = dir.file_name();
        let Some(prefix) = dir_name.to_str() else {
            continue;
        };
        if prefix.len() != 2 || !dir.file_type()?.is_dir() {
            continue;
        }
        for file in fs::read_dir(dir.path())? {
            let file = file?;
            let file_name = file.file_name();
            let Some(rest) = file_name.to_str() else {
                continue;
            };
            if rest.len() != Oid::HEX_LEN - 2 {
                continue;
            }
            if let Some(oid) = Oid::from_canonical_hex(&format!("{prefix}{rest}")) {
                out.push(oid);
            }
        }
    }

    out.sort_unstable();
    Ok(out)
}

/// Encodes a loose object file body (zlib-compressed header + payload).
#[must_use]
pub fn encode_loose(kind: ObjectKind, payload: &[u8]) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut raw = Vec::with_capacity(payload.len() + 32);
    raw.extend_from_slice(kind.as_str().as_bytes());
    raw.push(b' ');
    raw.extend_from_slice(payload.len().to_string().as_bytes());
    raw.push(0);
    raw.extend_from_slice(payload);

    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail.
    let _ = enc.write_all(&raw);
    enc.finish().unwrap_or_default()
}

/// Parses `<kind> SP <size> NUL`, returning the payload start.
fn parse_loose_header(bytes: &[u8]) -> Result<(ObjectKind, u64, usize), StoreError> {
    let nul = memchr(0, bytes).ok_or(StoreError::corrupt("missing loose header terminator"))?;
    let header = &bytes[..nul];

    let space = memchr(b' ', header).ok_or(StoreError::corrupt("invalid loose header"))?;
    let kind = ObjectKind::from_name(&header[..space])
        .ok_or(StoreError::corrupt("unknown loose object type"))?;
    let size = parse_decimal(&header[space + 1..])
        .ok_or(StoreError::corrupt("invalid loose object size"))?;
    Ok((kind, size, nul + 1))
}

fn parse_loose_object(
    bytes: &[u8],
    max_payload: usize,
) -> Result<(ObjectKind, Vec<u8>), StoreError> {
    let (kind, size, start) = parse_loose_header(bytes)?;
    let size = usize::try_from(size).map_err(|_| StoreError::corrupt("loose object too large"))?;
    if size > max_payload {
        return Err(StoreError::corrupt("loose object exceeds size cap"));
    }

    let payload = &bytes[start..];
    if payload.len() != size {
        return Err(StoreError::corrupt("loose object size mismatch"));
    }
    Ok((kind, payload.to_vec()))
}

fn parse_decimal(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }
    Some(value)
}
