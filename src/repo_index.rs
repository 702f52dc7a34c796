//! Per-repository pack offset index.
//!
//! Answers "which pack holds this object, and at what offset" from the
//! repository's existing `.idx` files. Objects found in no index (loose,
//! or unknown) resolve to `None` and callers fall back to hash lookup.
//!
//! Built once per repository per index build; the cost is one parse of
//! every `.idx` file (fanout and table bounds only, no per-object work).

use std::path::Path;

use tracing::debug;

use crate::git::{read_pack_dir, GitRepoPaths, Oid, PackIdx, RepoKind, StoreError};
use crate::index_key::ObjectRef;
use crate::pool::Repository;

/// Location lookup over all packs of one repository.
#[derive(Debug, Default)]
pub struct PackOffsetIndex {
    /// `(pack id, index)` in pack id order.
    packs: Vec<(Oid, PackIdx)>,
}

impl PackOffsetIndex {
    /// Reads every pack index of the repository at `path`.
    ///
    /// A repository without a pack directory yields an empty index.
    ///
    /// # Errors
    /// `NotARepository` for bad layouts; `Io`/`PackIndex` if an index file
    /// cannot be read or is corrupt.
    pub fn build(path: &Path, kind: RepoKind) -> Result<Self, StoreError> {
        let paths = GitRepoPaths::with_kind(path, kind)?;
        let packs: Vec<(Oid, PackIdx)> = read_pack_dir(&paths.pack_dir)?
            .into_iter()
            .map(|p| (p.id, p.idx))
            .collect();
        debug!(
            path = %path.display(),
            packs = packs.len(),
            objects = packs.iter().map(|(_, idx)| u64::from(idx.object_count())).sum::<u64>(),
            "built pack offset index"
        );
        Ok(Self { packs })
    }

    /// Builds the index for a pooled repository.
    ///
    /// Repositories without an on-disk location get an empty index.
    ///
    /// # Errors
    /// Same as `build`.
    pub fn for_repository(repo: &Repository) -> Result<Self, StoreError> {
        match &repo.path {
            Some(path) => Self::build(path, repo.kind),
            None => Ok(Self::default()),
        }
    }

    /// Returns `(pack id, offset)` for a packed object.
    ///
    /// `Ok(None)` means the object is loose or absent; only structural
    /// index corruption is an error.
    ///
    /// # Errors
    /// `PackIndex` for corrupt offset tables.
    pub fn find(&self, oid: &Oid) -> Result<Option<(Oid, u64)>, StoreError> {
        for (id, idx) in &self.packs {
            if let Some(offset) = idx.find(oid)? {
                return Ok(Some((*id, offset)));
            }
        }
        Ok(None)
    }

    /// Resolves the reference stored in index keys for `oid`.
    ///
    /// # Errors
    /// Same as `find`.
    pub fn object_ref(&self, oid: &Oid) -> Result<ObjectRef, StoreError> {
        Ok(match self.find(oid)? {
            Some((pack, offset)) => ObjectRef::Packed { pack, offset },
            None => ObjectRef::Loose { oid: *oid },
        })
    }

    #[must_use]
    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }
}
