//! Composite index key codec.
//!
//! # Wire Format
//! All integers are big-endian.
//!
//! ```text
//! +---------------------------+
//! | repo len (u32) | repo     |  UTF-8
//! | packfile id (20B)         |  zero for loose objects
//! | packed flag (1B)          |  1 = packed, 0 = loose
//! | offset (8B) | oid (20B)   |  offset if packed, else object id
//! +---------------------------+
//! | name len (u32) | name     |  file keys only
//! | mode (i64)                |  file keys only
//! | tree id (20B)             |  file keys only
//! +---------------------------+
//! ```
//!
//! # Invariants
//! - `decode(encode(k)) == k` for every key `encode` accepts. Strings whose
//!   length does not fit the u32 prefix are rejected rather than truncated.
//! - Decoding rejects truncation, trailing bytes, flags other than 0/1,
//!   offsets above `i64::MAX`, invalid UTF-8, and a non-zero packfile id
//!   on a loose reference. Nothing decodes to a silently zeroed field.

use crate::git::{FileMode, Oid};

/// Key decoding failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyDecodeError {
    #[error("key truncated while reading {field}")]
    Truncated { field: &'static str },
    #[error("invalid packed flag {0:#04x}")]
    InvalidDiscriminator(u8),
    #[error("offset {0:#x} out of range")]
    NegativeOffset(u64),
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
    #[error("{0} trailing bytes after key")]
    TrailingBytes(usize),
    #[error("loose reference carries a packfile id")]
    LoosePackfile,
    #[error("file mode {0} out of range")]
    InvalidMode(i64),
}

/// Key encoding failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyEncodeError {
    #[error("{field} is {len} bytes, too long for a key")]
    FieldTooLong { field: &'static str, len: usize },
}

/// Physical location of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    /// Entry header at `offset` in pack `pack`.
    Packed { pack: Oid, offset: u64 },
    /// Not in any pack; resolve by id.
    Loose { oid: Oid },
}

impl ObjectRef {
    /// Offset with the negative sentinel used by loose references.
    #[must_use]
    pub fn signed_offset(&self) -> i64 {
        match self {
            // Offsets come from pack indexes, which cap them at i64::MAX.
            Self::Packed { offset, .. } => i64::try_from(*offset).unwrap_or(i64::MAX),
            Self::Loose { .. } => -1,
        }
    }

    /// Packfile id, `Oid::NULL` for loose references.
    #[must_use]
    pub fn packfile(&self) -> Oid {
        match self {
            Self::Packed { pack, .. } => *pack,
            Self::Loose { .. } => Oid::NULL,
        }
    }
}

/// Key for object rows: repository plus location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackOffsetKey {
    pub repository: String,
    pub object: ObjectRef,
}

/// Key for file rows: object key plus the tree entry it was reached by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileIndexKey {
    pub repository: String,
    pub object: ObjectRef,
    /// Full path of the entry within `tree`.
    pub name: String,
    pub mode: FileMode,
    /// Root tree the path is relative to.
    pub tree: Oid,
}

impl PackOffsetKey {
    /// # Errors
    /// `FieldTooLong` if the repository id exceeds `u32::MAX` bytes.
    pub fn encode(&self) -> Result<Vec<u8>, KeyEncodeError> {
        let mut out = Vec::with_capacity(4 + self.repository.len() + 49);
        write_string(&mut out, "repository", &self.repository)?;
        write_ref(&mut out, &self.object);
        Ok(out)
    }

    /// # Errors
    /// `KeyDecodeError` for malformed input.
    pub fn decode(data: &[u8]) -> Result<Self, KeyDecodeError> {
        let mut r = Reader::new(data);
        let repository = r.string("repository")?;
        let object = r.object_ref()?;
        r.finish()?;
        Ok(Self { repository, object })
    }
}

impl FileIndexKey {
    /// # Errors
    /// `FieldTooLong` if the repository id or name exceeds `u32::MAX` bytes.
    pub fn encode(&self) -> Result<Vec<u8>, KeyEncodeError> {
        let mut out =
            Vec::with_capacity(4 + self.repository.len() + 49 + 4 + self.name.len() + 8 + 20);
        write_string(&mut out, "repository", &self.repository)?;
        write_ref(&mut out, &self.object);
        write_string(&mut out, "name", &self.name)?;
        out.extend_from_slice(&i64::from(self.mode.raw()).to_be_bytes());
        out.extend_from_slice(self.tree.as_bytes());
        Ok(out)
    }

    /// # Errors
    /// `KeyDecodeError` for malformed input.
    pub fn decode(data: &[u8]) -> Result<Self, KeyDecodeError> {
        let mut r = Reader::new(data);
        let repository = r.string("repository")?;
        let object = r.object_ref()?;
        let name = r.string("name")?;
        let raw_mode = r.i64("mode")?;
        let mode = u32::try_from(raw_mode).map_err(|_| KeyDecodeError::InvalidMode(raw_mode))?;
        let tree = r.oid("tree")?;
        r.finish()?;
        Ok(Self {
            repository,
            object,
            name,
            mode: FileMode::new(mode),
            tree,
        })
    }
}

fn length_prefix(field: &'static str, len: usize) -> Result<[u8; 4], KeyEncodeError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| KeyEncodeError::FieldTooLong { field, len })
}

fn write_string(out: &mut Vec<u8>, field: &'static str, s: &str) -> Result<(), KeyEncodeError> {
    out.extend_from_slice(&length_prefix(field, s.len())?);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_ref(out: &mut Vec<u8>, object: &ObjectRef) {
    out.extend_from_slice(object.packfile().as_bytes());
    match object {
        ObjectRef::Packed { offset, .. } => {
            out.push(1);
            out.extend_from_slice(&offset.to_be_bytes());
        }
        ObjectRef::Loose { oid } => {
            out.push(0);
            out.extend_from_slice(oid.as_bytes());
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], KeyDecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(KeyDecodeError::Truncated { field })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], KeyDecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn string(&mut self, field: &'static str) -> Result<String, KeyDecodeError> {
        let len = u32::from_be_bytes(self.array(field)?) as usize;
        let bytes = self.take(len, field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| KeyDecodeError::InvalidUtf8 { field })
    }

    fn oid(&mut self, field: &'static str) -> Result<Oid, KeyDecodeError> {
        Ok(Oid::new(self.array(field)?))
    }

    fn i64(&mut self, field: &'static str) -> Result<i64, KeyDecodeError> {
        Ok(i64::from_be_bytes(self.array(field)?))
    }

    fn object_ref(&mut self) -> Result<ObjectRef, KeyDecodeError> {
        let pack = self.oid("packfile")?;
        let [flag] = self.array::<1>("packed flag")?;
        match flag {
            1 => {
                let offset = u64::from_be_bytes(self.array("offset")?);
                if offset > i64::MAX as u64 {
                    return Err(KeyDecodeError::NegativeOffset(offset));
                }
                Ok(ObjectRef::Packed { pack, offset })
            }
            0 => {
                let oid = self.oid("hash")?;
                if !pack.is_null() {
                    return Err(KeyDecodeError::LoosePackfile);
                }
                Ok(ObjectRef::Loose { oid })
            }
            other => Err(KeyDecodeError::InvalidDiscriminator(other)),
        }
    }

    fn finish(self) -> Result<(), KeyDecodeError> {
        match self.data.len() - self.pos {
            0 => Ok(()),
            n => Err(KeyDecodeError::TrailingBytes(n)),
        }
    }
}
