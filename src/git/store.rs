//! Object store abstraction consumed by the relation layer.
//!
//! # Contract
//! - `objects(kind)` enumerates every object of one kind in a deterministic,
//!   backing-defined order. Cursors are `'static`: implementations clone
//!   whatever shared state they need so a cursor can outlive the borrow of
//!   the store it came from.
//! - `object(oid)` returns `StoreError::NotFound` for absent ids; callers
//!   doing selector lookups treat that as "no row", not as a failure.
//! - `headers(kind)` enumerates the same objects as `objects(kind)`, in the
//!   same order, reading only kind and size. `header(oid)` is the lookup
//!   counterpart. Neither inflates payloads, so neither is bound by payload
//!   size limits.
//! - `open_pack(id)` returns a handle that decodes objects by byte offset
//!   without consulting any hash index. Handles release their resources on
//!   drop.

use std::io;
use std::path::Path;
use std::sync::Arc;

use super::object::{Blob, Commit, Object, ObjectKind};
use super::object_id::Oid;
use super::object_parse::ObjectParseError;
use super::pack_idx::IdxError;
use super::pack_inflate::{DeltaError, InflateError, PackParseError};
use super::repo::RepoKind;

/// Errors from object store access.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Object id is not present in the store.
    #[error("object not found: {0}")]
    NotFound(Oid),
    /// Pack id is not present in the store.
    #[error("packfile not found: {0}")]
    PackNotFound(Oid),
    /// Object exists but has a different kind than requested.
    #[error("object {oid} is a {found}, expected {expected}")]
    UnexpectedKind {
        oid: Oid,
        expected: ObjectKind,
        found: ObjectKind,
    },
    /// Path is not a Git repository.
    #[error("not a git repository: {0}")]
    NotARepository(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    PackIndex(#[from] IdxError),
    #[error(transparent)]
    Pack(#[from] PackParseError),
    #[error(transparent)]
    Inflate(#[from] InflateError),
    #[error(transparent)]
    Delta(#[from] DeltaError),
    #[error(transparent)]
    Parse(#[from] ObjectParseError),
    /// Structural corruption not covered by a more specific variant.
    #[error("corrupt object store: {detail}")]
    Corrupt { detail: &'static str },
}

impl StoreError {
    /// Constructs a corruption error with a static detail string.
    #[inline]
    pub const fn corrupt(detail: &'static str) -> Self {
        Self::Corrupt { detail }
    }

    /// Returns true if this error means "object absent".
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Kind and payload size of an object, read without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectHeader {
    pub oid: Oid,
    pub kind: ObjectKind,
    pub size: u64,
}

/// Cursor over object headers.
pub type HeaderIter = Box<dyn Iterator<Item = Result<ObjectHeader, StoreError>> + Send>;

/// Cursor over decoded objects.
pub type ObjectIter = Box<dyn Iterator<Item = Result<Object, StoreError>> + Send>;

/// Cursor over commits.
pub type CommitIter = Box<dyn Iterator<Item = Result<Commit, StoreError>> + Send>;

/// Read-only access to one repository's objects.
pub trait ObjectStore: Send + Sync {
    /// Enumerates all objects of `kind`.
    fn objects(&self, kind: ObjectKind) -> Result<ObjectIter, StoreError>;

    /// Enumerates the headers of all objects of `kind`.
    fn headers(&self, kind: ObjectKind) -> Result<HeaderIter, StoreError>;

    /// Looks up an object by id.
    fn object(&self, oid: &Oid) -> Result<Object, StoreError>;

    /// Looks up an object's header by id.
    fn header(&self, oid: &Oid) -> Result<ObjectHeader, StoreError>;

    /// Opens a packfile for offset-addressed decoding.
    fn open_pack(&self, pack: &Oid) -> Result<Box<dyn PackHandle>, StoreError>;

    /// Enumerates all commits in object enumeration order.
    fn commits(&self) -> Result<CommitIter, StoreError> {
        let objects = self.objects(ObjectKind::Commit)?;
        Ok(Box::new(objects.map(|res| {
            res.and_then(|obj| match obj {
                Object::Commit(commit) => Ok(commit),
                other => Err(unexpected(&other, ObjectKind::Commit)),
            })
        })))
    }

    /// Looks up a blob by id.
    ///
    /// An id that names a non-blob object is reported as `NotFound`, so
    /// hash selectors never surface objects of the wrong kind.
    fn blob(&self, oid: &Oid) -> Result<Blob, StoreError> {
        match self.object(oid)? {
            Object::Blob(blob) => Ok(blob),
            _ => Err(StoreError::NotFound(*oid)),
        }
    }
}

/// An open packfile that decodes objects at byte offsets.
pub trait PackHandle: Send {
    /// Returns the id of the open pack.
    fn pack_id(&self) -> Oid;

    /// Reads the header of the object whose entry starts at `offset`.
    fn header_at(&mut self, offset: u64) -> Result<ObjectHeader, StoreError>;

    /// Decodes the object whose entry header starts at `offset`.
    fn decode_at(&mut self, offset: u64) -> Result<Object, StoreError>;
}

/// Opens an object store for a registered repository.
pub trait StoreOpener: Send + Sync {
    fn open(&self, path: &Path, kind: RepoKind) -> Result<Arc<dyn ObjectStore>, StoreError>;
}

impl<F> StoreOpener for F
where
    F: Fn(&Path, RepoKind) -> Result<Arc<dyn ObjectStore>, StoreError> + Send + Sync,
{
    fn open(&self, path: &Path, kind: RepoKind) -> Result<Arc<dyn ObjectStore>, StoreError> {
        self(path, kind)
    }
}

/// Builds an `UnexpectedKind` error for an object.
pub(crate) fn unexpected(obj: &Object, expected: ObjectKind) -> StoreError {
    StoreError::UnexpectedKind {
        oid: obj.oid(),
        expected,
        found: obj.kind(),
    }
}
