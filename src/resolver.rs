//! Object resolution from decoded index keys.
//!
//! Packed references are decoded directly at their pack offset through an
//! open `PackHandle`; loose references are looked up by id. The resolver
//! keeps at most one repository and one pack handle open: moving to a
//! different repository or pack releases the previous one first.
//!
//! A negative (loose) reference is always resolved by id, including keys
//! written before a repack moved the object into a pack.

use std::sync::Arc;

use tracing::trace;

use crate::errors::{Error, Result};
use crate::git::{Blob, Object, ObjectHeader, ObjectKind, ObjectStore, Oid, PackHandle, StoreError};
use crate::index_key::ObjectRef;
use crate::pool::{Repository, RepositoryPool};

/// Reconstructs objects from `(repository, reference)` pairs.
pub struct ObjectResolver {
    pool: Arc<RepositoryPool>,
    repo: Option<Repository>,
    pack: Option<Box<dyn PackHandle>>,
}

impl ObjectResolver {
    #[must_use]
    pub fn new(pool: Arc<RepositoryPool>) -> Self {
        Self {
            pool,
            repo: None,
            pack: None,
        }
    }

    /// Decodes the object `object` refers to in repository `repository`.
    ///
    /// # Errors
    /// `RepositoryNotFound` for unknown ids; store errors (including
    /// `NotFound` for a missing loose object) otherwise.
    pub fn decode(&mut self, repository: &str, object: &ObjectRef) -> Result<Object> {
        match object {
            ObjectRef::Packed { pack, offset } => {
                Ok(self.pack_handle(repository, pack)?.decode_at(*offset)?)
            }
            ObjectRef::Loose { oid } => Ok(self.store(repository)?.object(oid)?),
        }
    }

    /// Reads kind and size of the referenced object without its payload.
    ///
    /// # Errors
    /// As `decode`.
    pub fn header(&mut self, repository: &str, object: &ObjectRef) -> Result<ObjectHeader> {
        match object {
            ObjectRef::Packed { pack, offset } => {
                Ok(self.pack_handle(repository, pack)?.header_at(*offset)?)
            }
            ObjectRef::Loose { oid } => Ok(self.store(repository)?.header(oid)?),
        }
    }

    /// Reads the header of a reference that must name a blob.
    ///
    /// # Errors
    /// As `decode`, plus `InvalidObjectType` for any other kind.
    pub fn blob_header(&mut self, repository: &str, object: &ObjectRef) -> Result<ObjectHeader> {
        let header = self.header(repository, object)?;
        if header.kind != ObjectKind::Blob {
            return Err(Error::InvalidObjectType {
                expected: ObjectKind::Blob,
                found: header.kind,
            });
        }
        Ok(header)
    }

    /// Decodes a reference that must name a blob.
    ///
    /// # Errors
    /// As `decode`, plus `InvalidObjectType` for any other kind.
    pub fn decode_blob(&mut self, repository: &str, object: &ObjectRef) -> Result<Blob> {
        match self.decode(repository, object)? {
            Object::Blob(blob) => Ok(blob),
            other => Err(Error::InvalidObjectType {
                expected: ObjectKind::Blob,
                found: other.kind(),
            }),
        }
    }

    /// Releases the open pack handle and repository. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.pack = None;
        self.repo = None;
        Ok(())
    }

    /// Returns the id of the open pack, if any.
    #[must_use]
    pub fn open_pack_id(&self) -> Option<Oid> {
        self.pack.as_ref().map(|p| p.pack_id())
    }

    fn store(&mut self, repository: &str) -> Result<Arc<dyn ObjectStore>> {
        self.select_repo(repository)?;
        self.repo
            .as_ref()
            .map(|repo| Arc::clone(&repo.store))
            .ok_or_else(|| Error::RepositoryNotFound(repository.to_string()))
    }

    /// Returns the handle for `pack`, replacing any other open pack.
    fn pack_handle(&mut self, repository: &str, pack: &Oid) -> Result<&mut Box<dyn PackHandle>> {
        self.select_repo(repository)?;
        let Some(repo) = self.repo.as_ref() else {
            return Err(Error::RepositoryNotFound(repository.to_string()));
        };
        if self.pack.as_ref().map(|p| p.pack_id()) != Some(*pack) {
            self.pack = None;
            trace!(repository, pack = %pack, "opening pack");
            self.pack = Some(repo.store.open_pack(pack)?);
        }
        self.pack
            .as_mut()
            .ok_or_else(|| StoreError::PackNotFound(*pack).into())
    }

    fn select_repo(&mut self, id: &str) -> Result<()> {
        if self.repo.as_ref().is_some_and(|r| r.id == id) {
            return Ok(());
        }
        self.pack = None;
        self.repo = None;
        trace!(repository = id, "switching repository");
        self.repo = Some(self.pool.get(id)?);
        Ok(())
    }
}
