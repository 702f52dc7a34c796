//! Decoded Git objects.
//!
//! Objects are fully inflated: a `Blob` owns its bytes, a `Tree` owns its
//! parsed entries and a `Commit` keeps only the fields the relations need
//! (root tree and parents).

use std::fmt;

use super::object_id::Oid;

/// Object type as stored in loose headers and pack entry headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// Returns the name used in loose object headers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    /// Parses a loose object header type name.
    #[must_use]
    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"commit" => Some(Self::Commit),
            b"tree" => Some(Self::Tree),
            b"blob" => Some(Self::Blob),
            b"tag" => Some(Self::Tag),
            _ => None,
        }
    }

    /// Maps a pack entry type code (1..=4) to a kind.
    #[must_use]
    pub const fn from_pack_type(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw Git tree entry mode.
///
/// Git uses a subset of Unix mode bits; the high bits encode the entry type.
/// Non-canonical blob modes (e.g. `100664`) are classified by type mask and
/// executable bit rather than by exact value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileMode(u32);

impl FileMode {
    const TYPE_MASK: u32 = 0o170000;

    pub const EMPTY: Self = Self(0);
    pub const DIR: Self = Self(0o040000);
    pub const REGULAR: Self = Self(0o100644);
    pub const EXECUTABLE: Self = Self(0o100755);
    pub const SYMLINK: Self = Self(0o120000);
    pub const SUBMODULE: Self = Self(0o160000);

    /// Wraps a raw mode value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw mode value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns true for subdirectory entries.
    #[inline]
    #[must_use]
    pub const fn is_tree(self) -> bool {
        self.0 & Self::TYPE_MASK == 0o040000
    }

    /// Returns true for entries whose target is a blob: regular files,
    /// executables and symlinks. Gitlinks are excluded.
    #[inline]
    #[must_use]
    pub const fn is_blob_like(self) -> bool {
        matches!(self.0 & Self::TYPE_MASK, 0o100000 | 0o120000)
    }
}

impl fmt::Display for FileMode {
    /// Renders the mode as seven zero-padded octal digits (`0100644`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:07o}", self.0)
    }
}

impl fmt::Debug for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileMode({:07o})", self.0)
    }
}

/// A blob object.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob {
    pub oid: Oid,
    pub data: Vec<u8>,
}

impl Blob {
    #[must_use]
    pub fn new(oid: Oid, data: Vec<u8>) -> Self {
        Self { oid, data }
    }

    /// Content size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns a reader over the blob content.
    #[must_use]
    pub fn reader(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("oid", &self.oid)
            .field("size", &self.data.len())
            .finish()
    }
}

/// A single tree entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    /// Entry name (no path prefix, never contains `/`).
    pub name: String,
    pub mode: FileMode,
    pub oid: Oid,
}

/// A tree object with entries in stored order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    pub oid: Oid,
    pub entries: Vec<TreeEntry>,
}

/// A commit object, reduced to its graph fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub oid: Oid,
    pub tree: Oid,
    pub parents: Vec<Oid>,
}

/// Any decoded object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
    /// Annotated tags are enumerable but their payload is not modelled.
    Tag(Oid),
}

impl Object {
    /// Returns the object's kind.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Blob(_) => ObjectKind::Blob,
            Self::Tree(_) => ObjectKind::Tree,
            Self::Commit(_) => ObjectKind::Commit,
            Self::Tag(_) => ObjectKind::Tag,
        }
    }

    /// Returns the object's id.
    #[must_use]
    pub fn oid(&self) -> Oid {
        match self {
            Self::Blob(b) => b.oid,
            Self::Tree(t) => t.oid,
            Self::Commit(c) => c.oid,
            Self::Tag(oid) => *oid,
        }
    }
}
